//! 流水线错误类型
//!
//! 局部可恢复的失败（LLM JSON 解析、检索、参考数据点查缺失）在各阶段内部
//! 降级处理，不会出现在这里；这里只保留会中止整次运行的致命错误，
//! 由编排器在唯一的边界捕获点处理。

use thiserror::Error;

use crate::store::StoreError;

/// 中止整次运行的致命错误
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Generation stream error: {0}")]
    GenerationStream(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
