//! `internet_search` tool exposed to the research model.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use deepcritic_core::config::SearchConfig;
use deepcritic_core::{
    ArtifactStore, SearchProvider, SearchRequest, SearchTopic, ToolCallRecord, ToolCallStatus,
    record_search_metrics,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::agent::AgentTool;
use crate::llm::ToolDefinition;

pub const SEARCH_TOOL_NAME: &str = "internet_search";
const MAX_RESULTS_CEILING: u32 = 20;

/// Values applied when the model omits an argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchDefaults {
    pub max_results: u32,
    pub topic: SearchTopic,
    pub include_raw_content: bool,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

impl From<&SearchConfig> for SearchDefaults {
    fn from(config: &SearchConfig) -> Self {
        Self {
            max_results: config.max_results,
            topic: config.topic,
            include_raw_content: config.include_raw_content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchArguments {
    query: String,
    #[serde(default)]
    max_results: Option<u32>,
    #[serde(default)]
    topic: Option<SearchTopic>,
    #[serde(default)]
    include_raw_content: Option<bool>,
}

/// Runs web searches for the model and logs every call to the tool-call log.
pub struct SearchTool {
    provider: Arc<dyn SearchProvider>,
    artifacts: ArtifactStore,
    defaults: SearchDefaults,
}

impl SearchTool {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        artifacts: ArtifactStore,
        defaults: SearchDefaults,
    ) -> Self {
        Self {
            provider,
            artifacts,
            defaults,
        }
    }

    fn request_from(&self, args: SearchArguments) -> SearchRequest {
        SearchRequest {
            query: args.query.trim().to_string(),
            max_results: args
                .max_results
                .unwrap_or(self.defaults.max_results)
                .clamp(1, MAX_RESULTS_CEILING),
            topic: args.topic.unwrap_or(self.defaults.topic),
            include_raw_content: args
                .include_raw_content
                .unwrap_or(self.defaults.include_raw_content),
        }
    }

    /// Results are only handed to the model once their record is on disk.
    fn log_call(&self, record: ToolCallRecord) -> Result<(), String> {
        self.artifacts.append_tool_call(&record).map_err(|err| {
            warn!(error = %err, "failed to append tool call record");
            format!("tool-call log unavailable: {err}")
        })
    }

    fn failure(&self, query: String, parameters: Value, latency_ms: u64, message: String) -> Value {
        record_search_metrics("error", latency_ms, 0);
        let logged = self.log_call(ToolCallRecord {
            tool: SEARCH_TOOL_NAME.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            query,
            parameters,
            latency_ms,
            result_count: 0,
            status: ToolCallStatus::Error,
            error: Some(message.clone()),
        });
        match logged {
            Ok(()) => json!({ "error": message }),
            Err(log_error) => json!({ "error": format!("{message}; {log_error}") }),
        }
    }
}

#[async_trait]
impl AgentTool for SearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: SEARCH_TOOL_NAME.to_string(),
            description: "Run a web search and return ranked results with title, url and content."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "max_results": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_RESULTS_CEILING,
                        "description": "Number of results to return"
                    },
                    "topic": { "type": "string", "enum": ["general", "news", "finance"] },
                    "include_raw_content": {
                        "type": "boolean",
                        "description": "Include the full page text of each result"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Value {
        let args: SearchArguments = match serde_json::from_value(arguments.clone()) {
            Ok(args) => args,
            Err(err) => {
                let query = arguments
                    .get("query")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                return self.failure(query, arguments, 0, format!("invalid arguments: {err}"));
            }
        };
        let request = self.request_from(args);
        if request.query.is_empty() {
            return self.failure(String::new(), arguments, 0, "query must not be empty".to_string());
        }
        let parameters = json!({
            "max_results": request.max_results,
            "topic": request.topic.as_str(),
            "include_raw_content": request.include_raw_content,
        });

        let started = Instant::now();
        let outcome = self.provider.search(&request).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(results) => {
                info!(
                    provider = self.provider.name(),
                    results = results.len(),
                    latency_ms,
                    "search completed"
                );
                record_search_metrics("ok", latency_ms, results.len());
                let logged = self.log_call(ToolCallRecord {
                    tool: SEARCH_TOOL_NAME.to_string(),
                    timestamp: Utc::now().to_rfc3339(),
                    query: request.query.clone(),
                    parameters,
                    latency_ms,
                    result_count: results.len(),
                    status: ToolCallStatus::Ok,
                    error: None,
                });
                match logged {
                    Ok(()) => json!({ "query": request.query, "results": results }),
                    Err(log_error) => json!({ "error": log_error }),
                }
            }
            Err(err) => {
                warn!(provider = self.provider.name(), error = %err, "search failed");
                self.failure(request.query, parameters, latency_ms, err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use deepcritic_core::{ArtifactKind, CollaboratorError, SearchResult};
    use tempfile::TempDir;

    use super::*;

    struct StubSearch {
        fail: bool,
        requests: Mutex<Vec<SearchRequest>>,
    }

    #[async_trait]
    impl SearchProvider for StubSearch {
        fn name(&self) -> &str {
            "stub"
        }

        async fn search(
            &self,
            request: &SearchRequest,
        ) -> Result<Vec<SearchResult>, CollaboratorError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(CollaboratorError::request("stub", "timed out"));
            }
            Ok(vec![SearchResult {
                title: "Grid storage".into(),
                url: "https://example.com/a".into(),
                snippet: "Sodium-ion cells".into(),
                raw_content: None,
                score: Some(0.8),
            }])
        }
    }

    fn tool(fail: bool) -> (TempDir, Arc<StubSearch>, ArtifactStore, SearchTool) {
        let temp = TempDir::new().expect("temp dir");
        let store = ArtifactStore::in_dir(temp.path().join("ws")).expect("store");
        let provider = Arc::new(StubSearch {
            fail,
            requests: Mutex::new(Vec::new()),
        });
        let tool = SearchTool::new(provider.clone(), store.clone(), SearchDefaults::default());
        (temp, provider, store, tool)
    }

    fn logged(store: &ArtifactStore) -> Vec<ToolCallRecord> {
        store
            .read(ArtifactKind::ToolCalls)
            .expect("read log")
            .lines()
            .map(|line| serde_json::from_str(line).expect("valid record"))
            .collect()
    }

    #[tokio::test]
    async fn applies_defaults_and_logs_success() {
        let (_temp, provider, store, tool) = tool(false);

        let output = tool.call(json!({ "query": "sodium-ion batteries" })).await;
        assert_eq!(output["results"][0]["url"], "https://example.com/a");

        let request = provider.requests.lock().unwrap()[0].clone();
        assert_eq!(request.max_results, 5);
        assert_eq!(request.topic, SearchTopic::General);
        assert!(!request.include_raw_content);

        let records = logged(&store);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tool, SEARCH_TOOL_NAME);
        assert_eq!(records[0].status, ToolCallStatus::Ok);
        assert_eq!(records[0].result_count, 1);
        assert_eq!(records[0].parameters["topic"], "general");
    }

    #[tokio::test]
    async fn clamps_result_count() {
        let (_temp, provider, _store, tool) = tool(false);
        tool.call(json!({ "query": "a", "max_results": 500, "topic": "news" }))
            .await;
        tool.call(json!({ "query": "b", "max_results": 0 })).await;

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].max_results, 20);
        assert_eq!(requests[0].topic, SearchTopic::News);
        assert_eq!(requests[1].max_results, 1);
    }

    #[tokio::test]
    async fn search_failure_is_returned_to_the_model() {
        let (_temp, _provider, store, tool) = tool(true);

        let output = tool.call(json!({ "query": "anything" })).await;
        assert!(output["error"].as_str().unwrap().contains("timed out"));

        let records = logged(&store);
        assert_eq!(records[0].status, ToolCallStatus::Error);
        assert_eq!(records[0].result_count, 0);
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_the_provider() {
        let (_temp, provider, store, tool) = tool(false);

        let output = tool.call(json!({ "max_results": 3 })).await;
        assert!(output["error"].as_str().unwrap().starts_with("invalid arguments"));
        let output = tool.call(json!({ "query": "   " })).await;
        assert_eq!(output["error"], "query must not be empty");

        assert!(provider.requests.lock().unwrap().is_empty());
        assert_eq!(logged(&store).len(), 2);
    }

    #[tokio::test]
    async fn unlogged_results_are_withheld_from_the_model() {
        let (_temp, provider, store, tool) = tool(false);
        // a directory in place of the log file makes every append fail
        std::fs::create_dir_all(store.path(ArtifactKind::ToolCalls)).expect("block log path");

        let output = tool.call(json!({ "query": "sodium-ion" })).await;
        assert!(output.get("results").is_none());
        assert!(
            output["error"]
                .as_str()
                .unwrap()
                .starts_with("tool-call log unavailable")
        );
        assert_eq!(provider.requests.lock().unwrap().len(), 1);

        let output = tool.call(json!({ "max_results": 2 })).await;
        let message = output["error"].as_str().unwrap();
        assert!(message.starts_with("invalid arguments"));
        assert!(message.contains("tool-call log unavailable"));
    }

    #[tokio::test]
    async fn secrets_in_queries_are_redacted_in_the_log() {
        let (_temp, _provider, store, tool) = tool(false);
        tool.call(json!({ "query": "docs api_key=abc123" })).await;

        let records = logged(&store);
        assert!(!records[0].query.contains("abc123"));
    }
}
