//! 六阶段生成流水线
//!
//! 执行链路：编排器（审计包夹）→ 引擎（按序驱动阶段，推松散事件）→
//! 翻译器（重建可信对外事件流）。阶段实现见 steps 子模块。

pub mod engine;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod state;
pub mod steps;
pub mod translator;

pub use engine::{run_engine, EngineDeps};
pub use error::PipelineError;
pub use events::{EngineEvent, GenerationEvent, StepUsage, STEP_NAMES};
pub use orchestrator::Pipeline;
pub use state::{
    Confidence, CurriculumMatch, GenerationParams, Intent, ParsedInput, RetrievedPassage,
    RoutingDecision, SharedState, YearBand,
};
pub use translator::StreamTranslator;
