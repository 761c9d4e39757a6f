//! 提示词模板存储
//!
//! 选择语义：(resource_type_slug, teaching_focus_slug, year_band) 三个维度
//! 逐项「精确匹配或模板字段为 NULL（通配）」；候选中取 priority 最高者，
//! 平手时取 id 最小者（确定性，SQLite 用 ORDER BY 编码，内存实现用排序键）。

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// 提示词模板：None 字段为通配
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: i64,
    pub name: String,
    pub resource_type_slug: Option<String>,
    pub teaching_focus_slug: Option<String>,
    pub year_band: Option<String>,
    pub template_body: String,
    pub priority: i64,
}

/// 模板选择接口
pub trait TemplateStore: Send + Sync {
    /// 返回最高优先级的匹配模板；无匹配时 None
    fn select(
        &self,
        resource_type_slug: &str,
        teaching_focus_slug: &str,
        year_band: &str,
    ) -> Result<Option<PromptTemplate>, StoreError>;
}

fn field_matches(field: &Option<String>, value: &str) -> bool {
    match field {
        None => true,
        Some(v) => v == value,
    }
}

/// 内存实现
#[derive(Debug, Default)]
pub struct MemoryTemplateStore {
    pub templates: Vec<PromptTemplate>,
}

impl MemoryTemplateStore {
    pub fn new(templates: Vec<PromptTemplate>) -> Self {
        Self { templates }
    }

    /// 演示模板：全通配、占位符覆盖全部变量
    pub fn demo() -> Self {
        Self::new(vec![PromptTemplate {
            id: 1,
            name: "general_resource".to_string(),
            resource_type_slug: None,
            teaching_focus_slug: None,
            year_band: None,
            template_body: "Create a {resource_type_name} for {year_level} mathematics.\n\n\
                Curriculum alignment:\n{content_descriptor}\n\nElaborations:\n{elaborations}\n\n\
                Achievement standard:\n{achievement_standard}\n\nStrand: {strand}\n\
                Teaching focus: {teaching_focus}\n\nPedagogical context:\n{rag_context}\n\n\
                Teacher notes: {additional_context}"
                .to_string(),
            priority: 0,
        }])
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn select(
        &self,
        resource_type_slug: &str,
        teaching_focus_slug: &str,
        year_band: &str,
    ) -> Result<Option<PromptTemplate>, StoreError> {
        let mut candidates: Vec<&PromptTemplate> = self
            .templates
            .iter()
            .filter(|t| {
                field_matches(&t.resource_type_slug, resource_type_slug)
                    && field_matches(&t.teaching_focus_slug, teaching_focus_slug)
                    && field_matches(&t.year_band, year_band)
            })
            .collect();
        candidates.sort_by_key(|t| (-t.priority, t.id));
        Ok(candidates.first().map(|t| (*t).clone()))
    }
}

/// SQLite 实现
pub struct SqliteTemplateStore {
    conn: Mutex<Connection>,
}

impl SqliteTemplateStore {
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
            "CREATE TABLE IF NOT EXISTS prompt_templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE NOT NULL,
                resource_type_slug TEXT,
                teaching_focus_slug TEXT,
                year_band TEXT,
                template_body TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0
            );",
        )?;
        Ok(())
    }

    pub fn insert(&self, template: &PromptTemplate) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO prompt_templates
                (name, resource_type_slug, teaching_focus_slug, year_band, template_body, priority)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                template.name,
                template.resource_type_slug,
                template.teaching_focus_slug,
                template.year_band,
                template.template_body,
                template.priority
            ],
        )?;
        Ok(())
    }
}

impl TemplateStore for SqliteTemplateStore {
    fn select(
        &self,
        resource_type_slug: &str,
        teaching_focus_slug: &str,
        year_band: &str,
    ) -> Result<Option<PromptTemplate>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, name, resource_type_slug, teaching_focus_slug, year_band, template_body, priority
                 FROM prompt_templates
                 WHERE (resource_type_slug IS NULL OR resource_type_slug = ?1)
                   AND (teaching_focus_slug IS NULL OR teaching_focus_slug = ?2)
                   AND (year_band IS NULL OR year_band = ?3)
                 ORDER BY priority DESC, id ASC
                 LIMIT 1",
                params![resource_type_slug, teaching_focus_slug, year_band],
                |row| {
                    Ok(PromptTemplate {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        resource_type_slug: row.get(2)?,
                        teaching_focus_slug: row.get(3)?,
                        year_band: row.get(4)?,
                        template_body: row.get(5)?,
                        priority: row.get(6)?,
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

    fn template(id: i64, name: &str, priority: i64) -> PromptTemplate {
        PromptTemplate {
            id,
            name: name.to_string(),
            resource_type_slug: None,
            teaching_focus_slug: None,
            year_band: None,
            template_body: "body".to_string(),
            priority,
        }
    }

    #[test]
    fn test_highest_priority_wins() {
        let store = MemoryTemplateStore::new(vec![
            template(1, "low", 0),
            template(2, "high", 5),
            template(3, "mid", 3),
        ]);
        let selected = store.select("any", "any", "primary").unwrap().unwrap();
        assert_eq!(selected.name, "high");
    }

    #[test]
    fn test_tie_break_by_lowest_id() {
        let store = MemoryTemplateStore::new(vec![template(7, "second", 5), template(2, "first", 5)]);
        let selected = store.select("any", "any", "primary").unwrap().unwrap();
        assert_eq!(selected.name, "first");
    }

    #[test]
    fn test_exact_fields_filter_candidates() {
        let mut exact = template(1, "exact", 0);
        exact.resource_type_slug = Some("worksheet".to_string());
        exact.year_band = Some("secondary".to_string());
        let store = MemoryTemplateStore::new(vec![exact]);

        assert!(store.select("worksheet", "planning", "secondary").unwrap().is_some());
        assert!(store.select("worksheet", "planning", "primary").unwrap().is_none());
        assert!(store.select("quiz", "planning", "secondary").unwrap().is_none());
    }

    #[test]
    fn test_sqlite_wildcard_and_ordering() {
        let store = SqliteTemplateStore::open_in_memory().unwrap();
        let mut a = template(0, "wildcard_low", 0);
        a.id = 0;
        store.insert(&a).unwrap();
        let mut b = template(0, "banded_high", 5);
        b.year_band = Some("primary".to_string());
        store.insert(&b).unwrap();

        let primary = store.select("x", "y", "primary").unwrap().unwrap();
        assert_eq!(primary.name, "banded_high");
        // secondary 不匹配带年段的模板，回落到通配模板
        let secondary = store.select("x", "y", "secondary").unwrap().unwrap();
        assert_eq!(secondary.name, "wildcard_low");
    }
}
