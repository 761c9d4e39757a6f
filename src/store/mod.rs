//! 存储层：课程参考数据、提示词模板与审计日志
//!
//! 每类存储都以 trait 为接口，提供内存实现（测试/演示）与 SQLite 实现（持久化）。

pub mod audit;
pub mod curriculum;
pub mod templates;

use thiserror::Error;

pub use audit::{AuditStore, AuditUpdate, GenerationRecord, MemoryAuditStore, RunStatus, SqliteAuditStore};
pub use curriculum::{
    AchievementStandard, CurriculumStore, Descriptor, Elaboration, MemoryCurriculumStore,
    ResourceTypeRow, SqliteCurriculumStore, TeachingFocusRow, YearLevel,
};
pub use templates::{MemoryTemplateStore, PromptTemplate, SqliteTemplateStore, TemplateStore};

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
