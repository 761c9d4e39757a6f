//! 阶段 4（RAG）：从向量知识库检索相关阐释与教学法段落
//!
//! 检索是尽力而为：协作方任何错误都降级为空结果，绝不中止流水线。
//! 查询串按固定顺序拼接：topic、strand、前 3 条匹配文本、teaching_path、
//! year_level，空格连接。

use serde_json::{json, Value};

use crate::knowledge::KnowledgeBase;
use crate::pipeline::state::{RetrievedPassage, SharedState};
use crate::pipeline::steps::truncate_chars;

/// 构建语义查询串（顺序固定，可重放）
fn build_query(state: &SharedState) -> String {
    let parsed = state.parsed();
    let routing = state.routing();
    let match_texts: Vec<&str> = state
        .cag_matches
        .iter()
        .take(3)
        .map(|m| m.text.as_str())
        .collect();

    format!(
        "{} {} {} {} {}",
        parsed.topic,
        parsed.strand,
        match_texts.join(" "),
        routing.teaching_path,
        parsed.year_level,
    )
}

/// 执行阶段 4，返回摘要载荷 {"num_chunks": n, "results": [...]}
pub async fn run(
    state: &mut SharedState,
    knowledge: &dyn KnowledgeBase,
    max_results: usize,
    preview_chars: usize,
) -> Value {
    let query = build_query(state);

    let docs = match knowledge.search(&query, max_results).await {
        Ok(docs) => docs,
        Err(e) => {
            tracing::warn!("pedagogy retrieval failed, continuing with empty context: {}", e);
            Vec::new()
        }
    };

    let mut results = Vec::with_capacity(docs.len());
    let mut context_parts = Vec::with_capacity(docs.len());
    for doc in docs {
        results.push(RetrievedPassage {
            content: truncate_chars(&doc.content, preview_chars),
            name: doc.name,
        });
        context_parts.push(doc.content);
    }

    state.rag_results = results;
    state.rag_context = context_parts.join("\n\n");

    json!({
        "num_chunks": state.rag_results.len(),
        "results": serde_json::to_value(&state.rag_results).unwrap_or(Value::Null),
    })
}
