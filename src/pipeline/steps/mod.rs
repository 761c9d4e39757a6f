//! 六阶段实现
//!
//! 每个阶段是 `(SharedState, 协作方) -> 摘要 JSON` 的异步函数：
//! 向共享状态写入本阶段产物，并返回小型摘要载荷（引擎把它作为
//! 内容事件上报，翻译器按键形识别）。阶段内部的局部失败
//! （解析、检索、点查缺失）就地降级，绝不向上传播。

pub mod curriculum_matcher;
pub mod input_analyzer;
pub mod pedagogy_retriever;
pub mod resource_generator;
pub mod teaching_router;
pub mod template_resolver;

use crate::llm::TokenCounts;

/// 去掉 Markdown 代码围栏（```json ... ```），模型常无视「仅返回 JSON」的指令
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // 丢掉围栏行上的语言标注
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// 按字符数截断，超出部分以 ... 结尾
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}

/// 两次累计用量读数之差（单阶段增量）
pub(crate) fn usage_delta(before: (u64, u64, u64), after: (u64, u64, u64)) -> TokenCounts {
    TokenCounts::new(
        after.0.saturating_sub(before.0),
        after.1.saturating_sub(before.1),
    )
}
