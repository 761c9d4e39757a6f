//! 阶段 2（CAG）：全量内容描述符入上下文做语义匹配
//!
//! 设计取舍：不做向量/关键词预过滤，把整个描述符语料放进提示词，
//! 用提示词长度换匹配召回。模型返回 0..N 条都要容忍；空结果注入
//! 最低置信度的回退匹配，保证阶段 5 总有可解析的描述符。

use serde_json::{json, Value};

use crate::llm::LlmClient;
use crate::pipeline::error::PipelineError;
use crate::pipeline::state::{Confidence, CurriculumMatch, SharedState};
use crate::pipeline::steps::{strip_code_fence, usage_delta};
use crate::store::{CurriculumStore, Descriptor};

const SYSTEM: &str = "You are a curriculum matching expert. \
Given a teacher's topic and ALL content descriptors, find the best matches. \
Return valid JSON only.";

fn build_prompt(topic: &str, year_level: &str, strand: &str, descriptors: &[Descriptor]) -> String {
    let descriptor_text: String = descriptors
        .iter()
        .map(|d| {
            format!(
                "- [{}] ({} / {}): {}\n",
                d.code, d.year_level_code, d.strand_title, d.text
            )
        })
        .collect();

    format!(
        "You are a curriculum matching expert for the Australian Mathematics Curriculum (ACARA v9).\n\n\
         A teacher wants to teach: \"{topic}\"\n\
         Year Level preference: {year_level}\n\
         Strand preference: {strand}\n\n\
         Below are ALL content descriptors from the ACARA v9 Mathematics curriculum.\n\
         Find the 3-5 most relevant descriptors that match the teacher's topic.\n\n\
         CONTENT DESCRIPTORS:\n{descriptor_text}\n\
         Return a JSON array of matches. Each match must have:\n\
         - \"code\": the descriptor code (e.g., \"AC9M5N06\")\n\
         - \"text\": the full descriptor text\n\
         - \"year_level\": the year level code\n\
         - \"strand\": the strand title\n\
         - \"confidence\": \"high\", \"medium\", or \"low\"\n\
         - \"reason\": brief explanation of why this matches\n\n\
         Prioritise descriptors from the requested year level and strand, but include relevant\n\
         descriptors from nearby year levels if they are a strong match.\n\n\
         Return ONLY valid JSON, no markdown formatting."
    )
}

/// 解析模型回复：围栏剥离后按 JSON 数组解析；顶层不是数组或解析失败都视为空
fn parse_matches(content: &str) -> Vec<CurriculumMatch> {
    let text = strip_code_fence(content);
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    }
}

/// 空结果时的回退匹配：取语料首条；语料为空时用合成描述符
fn fallback_match(descriptors: &[Descriptor]) -> CurriculumMatch {
    match descriptors.first() {
        Some(d) => CurriculumMatch {
            code: d.code.clone(),
            text: d.text.clone(),
            year_level: d.year_level_code.clone(),
            strand: d.strand_title.clone(),
            confidence: Confidence::Low,
            reason: "Fallback match - no strong matches found".to_string(),
        },
        None => CurriculumMatch {
            code: "AC9M0X00".to_string(),
            text: "General mathematics content".to_string(),
            year_level: "MATMATY5".to_string(),
            strand: "Number".to_string(),
            confidence: Confidence::Low,
            reason: "Fallback match - descriptor corpus unavailable".to_string(),
        },
    }
}

/// 执行阶段 2，返回摘要载荷 {"matches": [...], "_token_usage": ...}
pub async fn run(
    state: &mut SharedState,
    fast_llm: &dyn LlmClient,
    store: &dyn CurriculumStore,
) -> Result<Value, PipelineError> {
    let parsed = state.parsed();
    let descriptors = store.all_descriptors()?;
    let prompt = build_prompt(&parsed.topic, &parsed.year_level, &parsed.strand, &descriptors);

    let before = fast_llm.token_usage();
    let response = fast_llm
        .complete(SYSTEM, &prompt)
        .await
        .map_err(PipelineError::Llm)?;
    let delta = usage_delta(before, fast_llm.token_usage());

    let mut matches = parse_matches(&response);
    if matches.is_empty() {
        matches = vec![fallback_match(&descriptors)];
    }

    state.primary_descriptor_code = Some(matches[0].code.clone());
    state.cag_matches = matches;

    let mut summary = json!({
        "matches": serde_json::to_value(&state.cag_matches).unwrap_or(Value::Null),
    });
    if !delta.is_empty() {
        summary["_token_usage"] = serde_json::to_value(delta).unwrap_or(Value::Null);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::pipeline::state::GenerationParams;
    use crate::store::MemoryCurriculumStore;

    #[test]
    fn test_parse_matches_array() {
        let matches = parse_matches(
            r#"[{"code":"AC9M5N06","text":"t","year_level":"MATMATY5","strand":"Number","confidence":"high","reason":"r"}]"#,
        );
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].confidence, Confidence::High);
    }

    #[test]
    fn test_parse_non_list_discarded() {
        // 顶层是对象而非数组：丢弃而非报错
        assert!(parse_matches(r#"{"code":"AC9M5N06"}"#).is_empty());
        assert!(parse_matches("not json at all").is_empty());
    }

    #[test]
    fn test_parse_fenced_array() {
        let matches = parse_matches("```json\n[{\"code\":\"X\",\"text\":\"t\"}]\n```");
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_result_injects_fallback() {
        let llm = MockLlmClient::new().with_reply("[]");
        let store = MemoryCurriculumStore::demo();
        let mut state = SharedState::new(GenerationParams::new("knitting"));

        run(&mut state, &llm, &store).await.unwrap();

        // 属性：匹配序列永不为空
        assert!(!state.cag_matches.is_empty());
        assert_eq!(state.cag_matches[0].confidence, Confidence::Low);
        assert!(state.primary_descriptor_code.is_some());
    }

    #[tokio::test]
    async fn test_empty_corpus_synthesizes_match() {
        let llm = MockLlmClient::new().with_reply("garbage");
        let store = MemoryCurriculumStore::new();
        let mut state = SharedState::new(GenerationParams::new("fractions"));

        run(&mut state, &llm, &store).await.unwrap();
        assert_eq!(state.cag_matches.len(), 1);
        assert_eq!(state.cag_matches[0].code, "AC9M0X00");
    }
}
