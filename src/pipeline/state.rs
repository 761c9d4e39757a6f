//! 每次运行的共享状态与阶段产物类型
//!
//! SharedState 由编排器独占持有，按固定阶段顺序以 &mut 传入各阶段；
//! 后续阶段只读取前序阶段写入的字段，读取未写入字段时通过访问器
//! 取确定性默认值，绝不 panic。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 一次生成请求（不可变输入）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub topic: String,
    pub year_level: String,
    pub strand: String,
    pub teaching_focus: String,
    pub resource_type: String,
    #[serde(default)]
    pub additional_context: String,
}

impl GenerationParams {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            year_level: "Year 5".to_string(),
            strand: "Number".to_string(),
            teaching_focus: "explicit_instruction".to_string(),
            resource_type: "worked_example_study".to_string(),
            additional_context: String::new(),
        }
    }
}

/// 请求意图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    #[default]
    Instruction,
    Practice,
    Assessment,
    Inquiry,
    Planning,
}

/// 阶段 1 产物：解析后的结构化请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedInput {
    pub topic: String,
    pub year_level: String,
    pub strand: String,
    #[serde(default)]
    pub intent: Intent,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl ParsedInput {
    /// LLM 输出不可解析时的确定性回退：直接取自请求字段
    pub fn fallback(params: &GenerationParams) -> Self {
        Self {
            topic: params.topic.clone(),
            year_level: params.year_level.clone(),
            strand: params.strand.clone(),
            intent: Intent::Instruction,
            keywords: vec![params.topic.clone()],
        }
    }
}

/// 匹配置信度；未知取值按 low 处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    #[default]
    #[serde(other)]
    Low,
}

/// 阶段 2 产物：一条课程描述符匹配
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurriculumMatch {
    pub code: String,
    pub text: String,
    #[serde(default)]
    pub year_level: String,
    #[serde(default)]
    pub strand: String,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub reason: String,
}

/// 年段：决定教学法语气
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum YearBand {
    EarlyYears,
    #[default]
    Primary,
    Secondary,
}

impl YearBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            YearBand::EarlyYears => "early_years",
            YearBand::Primary => "primary",
            YearBand::Secondary => "secondary",
        }
    }

    /// 参考表取值解析；未知取值按 primary 处理
    pub fn parse(s: &str) -> Self {
        match s {
            "early_years" => YearBand::EarlyYears,
            "secondary" => YearBand::Secondary,
            _ => YearBand::Primary,
        }
    }
}

/// 阶段 3 产物：路由决策（纯函数产出，可重放）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub teaching_path: String,
    pub year_band: YearBand,
    pub year_level_code: String,
    pub pedagogy_notes: String,
}

impl Default for RoutingDecision {
    fn default() -> Self {
        Self {
            teaching_path: "explicit_instruction".to_string(),
            year_band: YearBand::Primary,
            year_level_code: "MATMATY5".to_string(),
            pedagogy_notes: String::new(),
        }
    }
}

/// 阶段 4 产物：一条检索结果（content 为截断预览）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub content: String,
    pub name: String,
}

/// 贯穿六阶段的共享状态
#[derive(Debug, Clone)]
pub struct SharedState {
    pub params: GenerationParams,
    // 阶段 1
    pub parsed_input: Option<ParsedInput>,
    // 阶段 2
    pub cag_matches: Vec<CurriculumMatch>,
    pub primary_descriptor_code: Option<String>,
    // 阶段 3
    pub routing_decision: Option<RoutingDecision>,
    // 阶段 4
    pub rag_results: Vec<RetrievedPassage>,
    pub rag_context: String,
    // 阶段 5
    pub selected_template: Option<String>,
    pub template_variables: BTreeMap<String, String>,
    pub resolved_prompt: Option<String>,
    // 阶段 6
    pub generated_resource: Option<String>,
}

impl SharedState {
    pub fn new(params: GenerationParams) -> Self {
        Self {
            params,
            parsed_input: None,
            cag_matches: Vec::new(),
            primary_descriptor_code: None,
            routing_decision: None,
            rag_results: Vec::new(),
            rag_context: String::new(),
            selected_template: None,
            template_variables: BTreeMap::new(),
            resolved_prompt: None,
            generated_resource: None,
        }
    }

    /// 阶段 1 产物；未写入时退化为请求字段
    pub fn parsed(&self) -> ParsedInput {
        self.parsed_input
            .clone()
            .unwrap_or_else(|| ParsedInput::fallback(&self.params))
    }

    /// 阶段 3 产物；未写入时为默认路径/年段
    pub fn routing(&self) -> RoutingDecision {
        self.routing_decision.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_fields_have_defaults() {
        let state = SharedState::new(GenerationParams::new("fractions"));
        let parsed = state.parsed();
        assert_eq!(parsed.topic, "fractions");
        assert_eq!(parsed.intent, Intent::Instruction);
        assert_eq!(parsed.keywords, vec!["fractions".to_string()]);

        let routing = state.routing();
        assert_eq!(routing.teaching_path, "explicit_instruction");
        assert_eq!(routing.year_band, YearBand::Primary);
        assert_eq!(routing.year_level_code, "MATMATY5");
    }

    #[test]
    fn test_confidence_unknown_value_maps_to_low() {
        let m: CurriculumMatch = serde_json::from_str(
            r#"{"code":"AC9M5N06","text":"t","confidence":"very strong"}"#,
        )
        .unwrap();
        assert_eq!(m.confidence, Confidence::Low);
    }

    #[test]
    fn test_year_band_parse() {
        assert_eq!(YearBand::parse("early_years"), YearBand::EarlyYears);
        assert_eq!(YearBand::parse("secondary"), YearBand::Secondary);
        assert_eq!(YearBand::parse("unknown"), YearBand::Primary);
    }
}
