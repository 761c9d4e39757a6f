//! 阶段 3：按 (教学重点 × 年段) 的确定性决策表产出路由决策
//!
//! 无 LLM 调用。除参考表读取外无副作用；未知教学重点回落到
//! explicit_instruction，年级解析失败回落到 primary / MATMATY5，
//! 参考表不可用同样按默认年段处理——本阶段没有失败路径。

use serde_json::Value;

use crate::pipeline::state::{RoutingDecision, SharedState, YearBand};
use crate::store::CurriculumStore;

/// 五条具名路由路径（仅用于观测与标注，执行逻辑相同）
pub const ENRICHMENT_PATHS: [(&str, &str); 5] = [
    ("explicit_instruction", "explicit_instruction_enrichment"),
    ("deep_learning_inquiry", "inquiry_enrichment"),
    ("fluency_practice", "fluency_enrichment"),
    ("assessment_feedback", "assessment_enrichment"),
    ("planning", "planning_enrichment"),
];

/// 路由选择器：未知教学重点回落到 explicit_instruction 路径
pub fn select_enrichment(teaching_focus: &str) -> &'static str {
    ENRICHMENT_PATHS
        .iter()
        .find(|(slug, _)| *slug == teaching_focus)
        .map(|(_, label)| *label)
        .unwrap_or(ENRICHMENT_PATHS[0].1)
}

/// 标准化后的教学重点 slug（未知值归一到默认路径）
pub fn canonical_focus(teaching_focus: &str) -> &'static str {
    ENRICHMENT_PATHS
        .iter()
        .find(|(slug, _)| *slug == teaching_focus)
        .map(|(slug, _)| *slug)
        .unwrap_or(ENRICHMENT_PATHS[0].0)
}

fn focus_notes(teaching_focus: &str) -> &'static str {
    match teaching_focus {
        "deep_learning_inquiry" => {
            "Design for inquiry and deep thinking. Include open-ended questions, \
             thinking routines (See-Think-Wonder, Claim-Support-Question), \
             and opportunities for mathematical reasoning and justification. \
             Encourage productive struggle and multiple solution paths."
        }
        "fluency_practice" => {
            "Focus on building procedural fluency through scaffolded practice. \
             Include varied question types progressing from foundational to extension. \
             Target the Zone of Proximal Development with enabling and extending prompts. \
             Ensure sufficient repetition for skill automaticity."
        }
        "assessment_feedback" => {
            "Design for formative assessment and feedback. Include clear success criteria, \
             diagnostic questions targeting common misconceptions, and self-assessment opportunities. \
             Provide a marking guide and suggested follow-up actions based on student responses."
        }
        "planning" => {
            "Create a planning resource that maps curriculum expectations clearly. \
             Include curriculum alignment details, learning progressions, \
             and connections across strands. Support teacher understanding of the 'big ideas' \
             and how concepts develop across year levels."
        }
        // explicit_instruction 与所有未知取值
        _ => {
            "Structure the resource using the I Do / We Do / You Do framework. \
             Include clear teacher modelling, guided practice with prompting questions, \
             and independent practice with success criteria. Use worked examples to reduce cognitive load."
        }
    }
}

fn band_notes(band: YearBand) -> &'static str {
    match band {
        YearBand::EarlyYears => {
            "EARLY YEARS FOCUS: Use simple, age-appropriate language. \
             Include concrete materials (counters, blocks, ten frames). \
             Incorporate play-based and hands-on activities. \
             Use visual representations and familiar contexts."
        }
        YearBand::Primary => {
            "PRIMARY FOCUS: Balance concrete and abstract representations. \
             Include real-world contexts relevant to primary students. \
             Build on developing mathematical vocabulary. \
             Support the transition from additive to multiplicative thinking."
        }
        YearBand::Secondary => {
            "SECONDARY FOCUS: Use formal mathematical notation and terminology. \
             Include abstract reasoning and algebraic thinking. \
             Connect to real-world applications (STEM, finance, data). \
             Encourage generalisation and mathematical argumentation."
        }
    }
}

/// 年级标题 → code 的固定查找表（标题点查失败后的第二级回退）
const YEAR_CODE_MAP: [(&str, &str); 11] = [
    ("Foundation Year", "MATMATFY"),
    ("Year 1", "MATMATY1"),
    ("Year 2", "MATMATY2"),
    ("Year 3", "MATMATY3"),
    ("Year 4", "MATMATY4"),
    ("Year 5", "MATMATY5"),
    ("Year 6", "MATMATY6"),
    ("Year 7", "MATMATY7"),
    ("Year 8", "MATMATY8"),
    ("Year 9", "MATMATY9"),
    ("Year 10", "MATMATY10"),
];

/// 解析年段：标题点查 → 固定 code 表点查 → 默认 (primary, MATMATY5)
fn resolve_year_band(store: &dyn CurriculumStore, year_level_title: &str) -> (YearBand, String) {
    let by_title = store.year_level_by_title(year_level_title).ok().flatten();
    let yl = by_title.or_else(|| {
        YEAR_CODE_MAP
            .iter()
            .find(|(title, _)| *title == year_level_title)
            .and_then(|(_, code)| store.year_level_by_code(code).ok().flatten())
    });

    match yl {
        Some(y) => (YearBand::parse(&y.band), y.code),
        None => (YearBand::Primary, "MATMATY5".to_string()),
    }
}

/// 执行阶段 3，返回路由决策摘要
pub fn run(state: &mut SharedState, store: &dyn CurriculumStore) -> Value {
    let teaching_focus = canonical_focus(&state.params.teaching_focus);
    let parsed = state.parsed();
    let year_level_title = if parsed.year_level.is_empty() {
        state.params.year_level.clone()
    } else {
        parsed.year_level
    };

    let (year_band, year_level_code) = resolve_year_band(store, &year_level_title);

    let decision = RoutingDecision {
        teaching_path: teaching_focus.to_string(),
        year_band,
        year_level_code,
        pedagogy_notes: format!("{}\n\n{}", focus_notes(teaching_focus), band_notes(year_band)),
    };

    let summary = serde_json::to_value(&decision).unwrap_or(Value::Null);
    state.routing_decision = Some(decision);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::state::GenerationParams;
    use crate::store::MemoryCurriculumStore;

    fn state_with(teaching_focus: &str, year_level: &str) -> SharedState {
        let mut params = GenerationParams::new("fractions");
        params.teaching_focus = teaching_focus.to_string();
        params.year_level = year_level.to_string();
        SharedState::new(params)
    }

    #[test]
    fn test_unknown_focus_routes_to_explicit_instruction() {
        let store = MemoryCurriculumStore::demo();
        let mut state = state_with("montessori_magic", "Year 5");
        run(&mut state, &store);

        let decision = state.routing_decision.unwrap();
        assert_eq!(decision.teaching_path, "explicit_instruction");
        assert_eq!(select_enrichment("montessori_magic"), "explicit_instruction_enrichment");
    }

    #[test]
    fn test_unknown_year_level_defaults_to_primary() {
        let store = MemoryCurriculumStore::demo();
        let mut state = state_with("planning", "Grade 42");
        run(&mut state, &store);

        let decision = state.routing_decision.unwrap();
        assert_eq!(decision.year_band, YearBand::Primary);
        assert_eq!(decision.year_level_code, "MATMATY5");
    }

    #[test]
    fn test_band_resolution_by_title() {
        let store = MemoryCurriculumStore::demo();
        let mut state = state_with("fluency_practice", "Year 9");
        run(&mut state, &store);

        let decision = state.routing_decision.unwrap();
        assert_eq!(decision.year_band, YearBand::Secondary);
        assert_eq!(decision.year_level_code, "MATMATY9");
    }

    #[test]
    fn test_unavailable_store_defaults_to_primary() {
        // 空参考表等价于查不到任何行
        let store = MemoryCurriculumStore::new();
        let mut state = state_with("explicit_instruction", "Year 9");
        run(&mut state, &store);

        assert_eq!(state.routing_decision.unwrap().year_band, YearBand::Primary);
    }

    #[test]
    fn test_deterministic_across_repeated_calls() {
        let store = MemoryCurriculumStore::demo();
        let mut a = state_with("assessment_feedback", "Year 2");
        let mut b = state_with("assessment_feedback", "Year 2");
        let summary_a = run(&mut a, &store);
        let summary_b = run(&mut b, &store);
        assert_eq!(summary_a, summary_b);
    }

    #[test]
    fn test_notes_order_focus_then_band() {
        let store = MemoryCurriculumStore::demo();
        let mut state = state_with("planning", "Year 1");
        run(&mut state, &store);

        let notes = state.routing_decision.unwrap().pedagogy_notes;
        let focus_pos = notes.find("planning resource").unwrap();
        let band_pos = notes.find("EARLY YEARS FOCUS").unwrap();
        assert!(focus_pos < band_pos);
    }
}
