//! DeepCritic core: a bounded critique/revision loop built on `graph_flow`.
//!
//! The crate owns the loop and its artifact contracts. The research agent,
//! the critic and the search API are reached only through the traits in
//! [`collaborator`]; concrete clients live in `deepcritic-agents`.

pub mod artifacts;
pub mod collaborator;
pub mod config;
pub mod critic;
mod error;
mod logging;
mod metrics;
pub mod plan;
pub mod prompts;
pub mod report;
mod security;
mod tasks;
mod telemetry;
mod trace;
mod workflow;

pub use artifacts::{
    ArtifactKind, ArtifactStore, NotesEntry, OpenQuestion, ToolCallRecord, ToolCallStatus,
};
pub use collaborator::{
    AgentRuntime, AgentTurn, ChatMessage, Role, SearchProvider, SearchRequest, SearchResult,
    SearchTopic,
};
pub use config::{Config, ConfigLoader, PlannerConfig};
pub use critic::{CriticDecision, CriticParseError, UnparseablePolicy};
pub use error::{CollaboratorError, DeepCriticError};
pub use logging::{SessionLogInput, SessionLogger, redact};
pub use metrics::{init_metrics_from_env, record_loop_metrics, record_search_metrics};
pub use plan::{PlanParseError, ResearchPlan};
pub use report::{REQUIRED_SECTIONS, ReportFormatError, ResearchReport};
pub use security::{SecretValue, require_env};
pub use tasks::{CriticTask, FinalizeTask, PlanTask, ResearchTask, StopReason};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use trace::{TraceCollector, TraceEvent, persist_trace};
pub use workflow::{LoopSettings, ResearchOutcome, RevisionController};
