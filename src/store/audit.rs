//! 审计日志存储：每次运行一条 GenerationRecord
//!
//! 两次独立的同步写：运行开始 insert（status=running），终态 update
//! （completed 或 error）。两次写不在同一事务中，中间崩溃会把记录
//! 永久留在 running 状态；这是已接受的缺口，需要离线对账扫描来修复。

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::StoreError;

/// 运行终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            "error" => RunStatus::Error,
            _ => RunStatus::Pending,
        }
    }
}

/// 一次运行的完整审计记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub id: String,
    pub request_payload: Value,
    pub matched_descriptors: Value,
    pub routing_decision: Value,
    pub rag_results: Value,
    pub selected_template: String,
    pub resolved_prompt: String,
    pub generated_resource: String,
    pub step_timings: Value,
    pub token_usage: Value,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
}

/// 成功终态的更新载荷（全部中间产物）
#[derive(Debug, Clone, Default)]
pub struct AuditUpdate {
    pub matched_descriptors: Value,
    pub routing_decision: Value,
    pub rag_results: Value,
    pub selected_template: String,
    pub resolved_prompt: String,
    pub generated_resource: String,
    pub step_timings: Value,
    pub token_usage: Value,
}

/// 审计存储接口：开始一条、终态更新一次、可按 id 回读
pub trait AuditStore: Send + Sync {
    fn insert_running(&self, id: &str, request_payload: &Value) -> Result<(), StoreError>;
    fn mark_completed(&self, id: &str, update: &AuditUpdate) -> Result<(), StoreError>;
    /// 失败终态：错误文本写入 generated_resource 字段
    fn mark_error(&self, id: &str, message: &str) -> Result<(), StoreError>;
    fn fetch(&self, id: &str) -> Result<Option<GenerationRecord>, StoreError>;
}

/// 内存实现（测试用）
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    records: Mutex<HashMap<String, GenerationRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditStore for MemoryAuditStore {
    fn insert_running(&self, id: &str, request_payload: &Value) -> Result<(), StoreError> {
        let record = GenerationRecord {
            id: id.to_string(),
            request_payload: request_payload.clone(),
            matched_descriptors: Value::Null,
            routing_decision: Value::Null,
            rag_results: Value::Null,
            selected_template: String::new(),
            resolved_prompt: String::new(),
            generated_resource: String::new(),
            step_timings: Value::Null,
            token_usage: Value::Null,
            status: RunStatus::Running,
            created_at: Utc::now(),
        };
        self.records.lock().unwrap().insert(id.to_string(), record);
        Ok(())
    }

    fn mark_completed(&self, id: &str, update: &AuditUpdate) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::Other(format!("generation {} not found", id)))?;
        record.matched_descriptors = update.matched_descriptors.clone();
        record.routing_decision = update.routing_decision.clone();
        record.rag_results = update.rag_results.clone();
        record.selected_template = update.selected_template.clone();
        record.resolved_prompt = update.resolved_prompt.clone();
        record.generated_resource = update.generated_resource.clone();
        record.step_timings = update.step_timings.clone();
        record.token_usage = update.token_usage.clone();
        record.status = RunStatus::Completed;
        Ok(())
    }

    fn mark_error(&self, id: &str, message: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::Other(format!("generation {} not found", id)))?;
        record.status = RunStatus::Error;
        record.generated_resource = message.to_string();
        Ok(())
    }

    fn fetch(&self, id: &str) -> Result<Option<GenerationRecord>, StoreError> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }
}

/// SQLite 实现：JSON 字段以文本列存储
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS generation_logs (
                id TEXT PRIMARY KEY,
                request_payload TEXT,
                matched_descriptors TEXT,
                routing_decision TEXT,
                rag_results TEXT,
                selected_template TEXT NOT NULL DEFAULT '',
                resolved_prompt TEXT NOT NULL DEFAULT '',
                generated_resource TEXT NOT NULL DEFAULT '',
                step_timings TEXT,
                token_usage TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }
}

fn to_json_text(value: &Value) -> Result<Option<String>, StoreError> {
    if value.is_null() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(value)?))
    }
}

fn from_json_text(text: Option<String>) -> Value {
    text.and_then(|t| serde_json::from_str(&t).ok())
        .unwrap_or(Value::Null)
}

impl AuditStore for SqliteAuditStore {
    fn insert_running(&self, id: &str, request_payload: &Value) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO generation_logs (id, request_payload, status, created_at)
             VALUES (?1, ?2, 'running', ?3)",
            params![id, to_json_text(request_payload)?, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn mark_completed(&self, id: &str, update: &AuditUpdate) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE generation_logs SET
                matched_descriptors = ?2,
                routing_decision = ?3,
                rag_results = ?4,
                selected_template = ?5,
                resolved_prompt = ?6,
                generated_resource = ?7,
                step_timings = ?8,
                token_usage = ?9,
                status = 'completed'
             WHERE id = ?1",
            params![
                id,
                to_json_text(&update.matched_descriptors)?,
                to_json_text(&update.routing_decision)?,
                to_json_text(&update.rag_results)?,
                update.selected_template,
                update.resolved_prompt,
                update.generated_resource,
                to_json_text(&update.step_timings)?,
                to_json_text(&update.token_usage)?,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::Other(format!("generation {} not found", id)));
        }
        Ok(())
    }

    fn mark_error(&self, id: &str, message: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE generation_logs SET status = 'error', generated_resource = ?2 WHERE id = ?1",
            params![id, message],
        )?;
        if affected == 0 {
            return Err(StoreError::Other(format!("generation {} not found", id)));
        }
        Ok(())
    }

    fn fetch(&self, id: &str) -> Result<Option<GenerationRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, request_payload, matched_descriptors, routing_decision, rag_results,
                        selected_template, resolved_prompt, generated_resource, step_timings,
                        token_usage, status, created_at
                 FROM generation_logs WHERE id = ?1",
                params![id],
                |row| {
                    let created: String = row.get(11)?;
                    Ok(GenerationRecord {
                        id: row.get(0)?,
                        request_payload: from_json_text(row.get(1)?),
                        matched_descriptors: from_json_text(row.get(2)?),
                        routing_decision: from_json_text(row.get(3)?),
                        rag_results: from_json_text(row.get(4)?),
                        selected_template: row.get(5)?,
                        resolved_prompt: row.get(6)?,
                        generated_resource: row.get(7)?,
                        step_timings: from_json_text(row.get(8)?),
                        token_usage: from_json_text(row.get(9)?),
                        status: RunStatus::parse(&row.get::<_, String>(10)?),
                        created_at: DateTime::parse_from_rfc3339(&created)
                            .map(|d| d.with_timezone(&Utc))
                            .unwrap_or_else(|_| Utc::now()),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_lifecycle() {
        let store = MemoryAuditStore::new();
        store.insert_running("run-1", &json!({"topic": "fractions"})).unwrap();

        let record = store.fetch("run-1").unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Running);

        let update = AuditUpdate {
            selected_template: "general".to_string(),
            generated_resource: "resource text".to_string(),
            ..Default::default()
        };
        store.mark_completed("run-1", &update).unwrap();
        let record = store.fetch("run-1").unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.generated_resource, "resource text");
    }

    #[test]
    fn test_sqlite_error_terminal_state() {
        let store = SqliteAuditStore::open_in_memory().unwrap();
        store.insert_running("run-2", &json!({"topic": "algebra"})).unwrap();
        store.mark_error("run-2", "stream aborted").unwrap();

        let record = store.fetch("run-2").unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Error);
        // 错误文本写入 generated_resource 字段
        assert_eq!(record.generated_resource, "stream aborted");
        assert_eq!(record.request_payload["topic"], "algebra");
    }

    #[test]
    fn test_update_missing_record_is_error() {
        let store = SqliteAuditStore::open_in_memory().unwrap();
        assert!(store.mark_error("missing", "x").is_err());
    }
}
