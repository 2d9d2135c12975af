//! Chat model abstraction and the OpenAI-compatible `/chat/completions` client.

use async_trait::async_trait;
use deepcritic_core::config::LlmConfig;
use deepcritic_core::{ChatMessage, CollaboratorError, Role, SecretValue};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

/// Function the model may call, described with a JSON schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One entry of the conversation sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelMessage {
    Chat(ChatMessage),
    /// Assistant turn that requested tool calls.
    ToolCalls {
        content: Option<String>,
        calls: Vec<ToolCall>,
    },
    /// Output of a tool, matched to the call by id.
    ToolResult { call_id: String, content: String },
}

impl From<ChatMessage> for ModelMessage {
    fn from(message: ChatMessage) -> Self {
        ModelMessage::Chat(message)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ModelMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelReply, CollaboratorError>;
}

const COLLABORATOR: &str = "openai";

/// Client for any OpenAI-compatible chat completions endpoint.
pub struct OpenAiChatModel {
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretValue,
    temperature: Option<f32>,
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig, api_key: SecretValue) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        }
    }

    fn messages_to_json(messages: &[ModelMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|message| match message {
                ModelMessage::Chat(chat) => {
                    let role = match chat.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    };
                    json!({ "role": role, "content": chat.content })
                }
                ModelMessage::ToolCalls { content, calls } => {
                    let calls: Vec<Value> = calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                    json!({ "role": "assistant", "content": content, "tool_calls": calls })
                }
                ModelMessage::ToolResult { call_id, content } => {
                    json!({ "role": "tool", "tool_call_id": call_id, "content": content })
                }
            })
            .collect()
    }

    fn tools_to_json(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect()
    }

    fn parse_response(body: &Value) -> Result<ModelReply, CollaboratorError> {
        let choice = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .ok_or_else(|| CollaboratorError::response(COLLABORATOR, "no choices in response"))?;
        let message = choice
            .get("message")
            .ok_or_else(|| CollaboratorError::response(COLLABORATOR, "no message in choice"))?;

        let tool_calls = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| {
                        let id = call.get("id")?.as_str()?.to_string();
                        let function = call.get("function")?;
                        let name = function.get("name")?.as_str()?.to_string();
                        let raw = function.get("arguments")?.as_str()?;
                        let arguments = serde_json::from_str(raw).unwrap_or_else(|_| json!({}));
                        Some(ToolCall {
                            id,
                            name,
                            arguments,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ModelReply {
            content: message
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            tool_calls,
            finish_reason: choice
                .get("finish_reason")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> CollaboratorError {
        CollaboratorError::Status {
            collaborator: COLLABORATOR.to_string(),
            status: status.as_u16(),
            body: body.chars().take(500).collect(),
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ModelMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelReply, CollaboratorError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut body = json!({
            "model": self.model,
            "messages": Self::messages_to_json(messages),
        });
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        if !tools.is_empty() {
            body["tools"] = json!(Self::tools_to_json(tools));
        }

        debug!(url = %url, model = %self.model, messages = messages.len(), "sending chat completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| CollaboratorError::request(COLLABORATOR, err))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| CollaboratorError::request(COLLABORATOR, err))?;
        if !status.is_success() {
            return Err(Self::map_http_error(status, &text));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|err| CollaboratorError::response(COLLABORATOR, format!("invalid JSON: {err}")))?;
        Self::parse_response(&json)
    }
}
