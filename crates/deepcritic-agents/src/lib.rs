//! Concrete collaborators for the DeepCritic revision loop: an
//! OpenAI-compatible chat model, a tool-calling agent runtime, the Tavily
//! search client and the planner/researcher/critic roles built from them.

pub mod agent;
pub mod critic;
pub mod llm;
pub mod planner;
pub mod researcher;
pub mod search;
pub mod tools;

pub use agent::{AgentTool, ToolLoopAgent};
pub use critic::CriticAgent;
pub use llm::{ChatModel, ModelMessage, ModelReply, OpenAiChatModel, ToolCall, ToolDefinition};
pub use planner::PlannerAgent;
pub use researcher::ResearcherAgent;
pub use search::TavilySearch;
pub use tools::{SearchDefaults, SearchTool};
