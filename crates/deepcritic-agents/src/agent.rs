//! Tool-calling agent runtime shared by the researcher and the critic.

use std::sync::Arc;

use async_trait::async_trait;
use deepcritic_core::{AgentRuntime, AgentTurn, ChatMessage, CollaboratorError};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::llm::{ChatModel, ModelMessage, ToolDefinition};

/// A function the agent can execute on the model's behalf.
///
/// Failures are reported inside the returned payload so the model can react
/// to them; a tool never aborts the turn.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, arguments: Value) -> Value;
}

/// Runs a model with a system prompt and a tool set until it produces a
/// plain-text reply or the turn's step limit is reached.
pub struct ToolLoopAgent {
    name: String,
    instructions: String,
    model: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn AgentTool>>,
}

impl ToolLoopAgent {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            model,
            tools: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn AgentTool>) -> Self {
        self.tools.push(tool);
        self
    }

    async fn dispatch(&self, name: &str, arguments: Value) -> Value {
        for tool in &self.tools {
            if tool.definition().name == name {
                return tool.call(arguments).await;
            }
        }
        warn!(agent = %self.name, tool = name, "model requested an unknown tool");
        json!({ "error": format!("unknown tool `{name}`") })
    }
}

#[async_trait]
impl AgentRuntime for ToolLoopAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_turn(&self, turn: AgentTurn) -> Result<String, CollaboratorError> {
        let definitions: Vec<ToolDefinition> =
            self.tools.iter().map(|tool| tool.definition()).collect();

        let mut messages: Vec<ModelMessage> =
            Vec::with_capacity(turn.messages.len() + 1);
        messages.push(ChatMessage::system(self.instructions.clone()).into());
        messages.extend(turn.messages.into_iter().map(ModelMessage::from));

        for step in 1..=turn.step_limit {
            let reply = self.model.complete(&messages, &definitions).await?;
            if reply.tool_calls.is_empty() {
                debug!(agent = %self.name, step, "agent produced a final reply");
                return Ok(reply.content);
            }

            debug!(
                agent = %self.name,
                step,
                calls = reply.tool_calls.len(),
                "agent requested tool calls"
            );
            let calls = reply.tool_calls.clone();
            messages.push(ModelMessage::ToolCalls {
                content: (!reply.content.is_empty()).then(|| reply.content.clone()),
                calls: reply.tool_calls,
            });
            for call in calls {
                let output = self.dispatch(&call.name, call.arguments).await;
                messages.push(ModelMessage::ToolResult {
                    call_id: call.id,
                    content: output.to_string(),
                });
            }
        }

        Err(CollaboratorError::StepLimit {
            collaborator: self.name.clone(),
            limit: turn.step_limit,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::llm::{ModelReply, ToolCall};

    /// Chat model that replays scripted replies and records every request.
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<ModelReply>>,
        pub requests: Mutex<Vec<Vec<ModelMessage>>>,
        pub tool_sets: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<ModelReply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
                tool_sets: Mutex::new(Vec::new()),
            })
        }

        pub fn text(content: &str) -> ModelReply {
            ModelReply {
                content: content.to_string(),
                ..ModelReply::default()
            }
        }

        pub fn tool_call(id: &str, name: &str, arguments: Value) -> ModelReply {
            ModelReply {
                tool_calls: vec![ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments,
                }],
                ..ModelReply::default()
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            messages: &[ModelMessage],
            tools: &[ToolDefinition],
        ) -> Result<ModelReply, CollaboratorError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            self.tool_sets
                .lock()
                .unwrap()
                .push(tools.iter().map(|tool| tool.name.clone()).collect());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| CollaboratorError::response("scripted", "script exhausted"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::testing::ScriptedModel;
    use super::*;

    struct EchoTool {
        seen: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl AgentTool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "echoes its arguments".into(),
                parameters: json!({ "type": "object" }),
            }
        }

        async fn call(&self, arguments: Value) -> Value {
            self.seen.lock().unwrap().push(arguments.clone());
            json!({ "echo": arguments })
        }
    }

    fn turn(step_limit: u32) -> AgentTurn {
        AgentTurn::new(vec![ChatMessage::user("What is X?")], step_limit)
    }

    #[tokio::test]
    async fn returns_first_plain_reply() {
        let model = ScriptedModel::new(vec![ScriptedModel::text("final answer")]);
        let agent = ToolLoopAgent::new("research", "be precise", model.clone());

        let reply = agent.run_turn(turn(3)).await.expect("reply");
        assert_eq!(reply, "final answer");

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0][0],
            ModelMessage::Chat(ChatMessage::system("be precise"))
        );
        assert_eq!(
            requests[0][1],
            ModelMessage::Chat(ChatMessage::user("What is X?"))
        );
    }

    #[tokio::test]
    async fn executes_tool_calls_and_feeds_results_back() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::tool_call("call_1", "echo", json!({ "query": "X" })),
            ScriptedModel::text("done"),
        ]);
        let tool = Arc::new(EchoTool {
            seen: Mutex::new(Vec::new()),
        });
        let agent =
            ToolLoopAgent::new("research", "use tools", model.clone()).with_tool(tool.clone());

        let reply = agent.run_turn(turn(4)).await.expect("reply");
        assert_eq!(reply, "done");
        assert_eq!(tool.seen.lock().unwrap().as_slice(), &[json!({ "query": "X" })]);

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        match requests[1].last() {
            Some(ModelMessage::ToolResult { call_id, content }) => {
                assert_eq!(call_id, "call_1");
                assert!(content.contains("\"echo\""));
            }
            other => panic!("expected tool result, got {other:?}"),
        }
        assert_eq!(model.tool_sets.lock().unwrap()[0], vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_the_model() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::tool_call("call_1", "missing", json!({})),
            ScriptedModel::text("recovered"),
        ]);
        let agent = ToolLoopAgent::new("research", "", model.clone());

        assert_eq!(agent.run_turn(turn(2)).await.expect("reply"), "recovered");
        let requests = model.requests.lock().unwrap();
        match requests[1].last() {
            Some(ModelMessage::ToolResult { content, .. }) => {
                assert!(content.contains("unknown tool"));
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn gives_up_after_step_limit() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::tool_call("call_1", "echo", json!({})),
            ScriptedModel::tool_call("call_2", "echo", json!({})),
        ]);
        let tool = Arc::new(EchoTool {
            seen: Mutex::new(Vec::new()),
        });
        let agent = ToolLoopAgent::new("research", "", model.clone()).with_tool(tool);

        let err = agent.run_turn(turn(2)).await.unwrap_err();
        assert!(matches!(
            err,
            CollaboratorError::StepLimit { limit: 2, ref collaborator } if collaborator == "research"
        ));
        assert_eq!(model.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn model_errors_propagate() {
        let model = ScriptedModel::new(Vec::new());
        let agent = ToolLoopAgent::new("critic", "", model);
        let err = agent.run_turn(turn(1)).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Response { .. }));
    }
}
