//! LessonForge - 课程对齐教学资源生成器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **knowledge**: 教学法向量知识库（分块、嵌入、Top-K 检索）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **observability**: tracing 初始化
//! - **pipeline**: 六阶段生成流水线、事件翻译器与编排器（核心）
//! - **store**: 课程参考数据、提示词模板与审计日志存储

pub mod config;
pub mod knowledge;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod store;

pub use pipeline::{GenerationEvent, GenerationParams, Pipeline};
