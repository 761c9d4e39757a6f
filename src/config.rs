//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `LESSONFORGE__*` 覆盖
//! （双下划线表示嵌套，如 `LESSONFORGE__LLM__GENERATION_MODEL=gpt-4o`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub retrieval: RetrievalSection,
    #[serde(default)]
    pub stream: StreamSection,
    #[serde(default)]
    pub db: DbSection,
}

/// [llm] 段：快速模型（解析/匹配）与生成模型（最终资源）
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 阶段 1/2 使用的轻量模型
    #[serde(default = "default_fast_model")]
    pub fast_model: String,
    /// 阶段 6 使用的生成模型
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    /// 嵌入模型（教学法知识库）
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            fast_model: default_fast_model(),
            generation_model: default_generation_model(),
            embedding_model: default_embedding_model(),
            base_url: None,
        }
    }
}

fn default_fast_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_generation_model() -> String {
    "gpt-4o".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// [retrieval] 段：RAG 检索参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    /// Top-K 检索条数
    pub max_results: usize,
    /// 结果预览截断长度（字符）
    pub preview_chars: usize,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            max_results: 5,
            preview_chars: 200,
        }
    }
}

/// [stream] 段：事件翻译器参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    /// 超过此长度的内容片段视为重复的整段输出而丢弃（启发式阈值，可调）
    pub max_content_chars: usize,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            max_content_chars: 200,
        }
    }
}

/// [db] 段：SQLite 文件路径，未设置时用 ./lessonforge.db
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DbSection {
    pub path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmSection::default(),
            retrieval: RetrievalSection::default(),
            stream: StreamSection::default(),
            db: DbSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 LESSONFORGE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 LESSONFORGE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LESSONFORGE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
