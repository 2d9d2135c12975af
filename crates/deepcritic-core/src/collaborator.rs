//! Contracts for the external collaborators driven by the revision loop.
//!
//! The loop only knows two capabilities: run an agent turn over a message
//! history and get back a final message, and run a web search. Concrete
//! implementations (hosted model runtime, search API) live outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single entry of the message history handed to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Input of one agent invocation: the message history and a bound on the
/// number of internal reasoning/tool steps the agent may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTurn {
    pub messages: Vec<ChatMessage>,
    pub step_limit: u32,
}

impl AgentTurn {
    pub fn new(messages: Vec<ChatMessage>, step_limit: u32) -> Self {
        Self {
            messages,
            step_limit,
        }
    }

    /// Content of the last user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
    }
}

/// An agent that turns a message history into a final text reply.
///
/// Both the researcher and the critic are consumed through this trait.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    async fn run_turn(&self, turn: AgentTurn) -> Result<String, CollaboratorError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchTopic {
    #[default]
    General,
    News,
    Finance,
}

impl SearchTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchTopic::General => "general",
            SearchTopic::News => "news",
            SearchTopic::Finance => "finance",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: u32,
    pub topic: SearchTopic,
    pub include_raw_content: bool,
}

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default, alias = "content")]
    pub snippet: String,
    #[serde(default)]
    pub raw_content: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_user_message_skips_assistant_entries() {
        let turn = AgentTurn::new(
            vec![
                ChatMessage::system("rules"),
                ChatMessage::user("first"),
                ChatMessage::assistant("reply"),
                ChatMessage::user("second"),
                ChatMessage::assistant("reply again"),
            ],
            4,
        );
        assert_eq!(turn.last_user_message(), Some("second"));
    }

    #[test]
    fn search_result_accepts_content_alias() {
        let result: SearchResult = serde_json::from_str(
            r#"{"title":"T","url":"https://example.com","content":"snippet text","score":0.7}"#,
        )
        .expect("result decodes");
        assert_eq!(result.snippet, "snippet text");
        assert_eq!(result.raw_content, None);
        assert_eq!(result.score, Some(0.7));
    }
}
