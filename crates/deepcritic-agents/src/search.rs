//! Tavily web search client.

use async_trait::async_trait;
use deepcritic_core::config::SearchConfig;
use deepcritic_core::{CollaboratorError, SearchProvider, SearchRequest, SearchResult, SecretValue};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

const COLLABORATOR: &str = "tavily";

pub struct TavilySearch {
    client: Client,
    base_url: String,
    api_key: SecretValue,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

impl TavilySearch {
    pub fn new(config: &SearchConfig, api_key: SecretValue) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn parse_results(body: &str) -> Result<Vec<SearchResult>, CollaboratorError> {
        serde_json::from_str::<TavilyResponse>(body)
            .map(|response| response.results)
            .map_err(|err| CollaboratorError::response(COLLABORATOR, format!("invalid JSON: {err}")))
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    fn name(&self) -> &str {
        COLLABORATOR
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, CollaboratorError> {
        let url = format!("{}/search", self.base_url);
        debug!(url = %url, max_results = request.max_results, topic = request.topic.as_str(), "sending search request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .json(request)
            .send()
            .await
            .map_err(|err| CollaboratorError::request(COLLABORATOR, err))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| CollaboratorError::request(COLLABORATOR, err))?;
        if !status.is_success() {
            return Err(CollaboratorError::Status {
                collaborator: COLLABORATOR.to_string(),
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let mut results = Self::parse_results(&body)?;
        results.truncate(request.max_results as usize);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tavily_results() {
        let body = r#"{
            "query": "sodium-ion batteries",
            "results": [
                {"title": "Grid storage", "url": "https://example.com/a", "content": "Sodium-ion cells...", "score": 0.91},
                {"title": "Cost outlook", "url": "https://example.com/b", "content": "Prices fell", "raw_content": "Full text"}
            ]
        }"#;

        let results = TavilySearch::parse_results(body).expect("parses");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].snippet, "Sodium-ion cells...");
        assert_eq!(results[0].score, Some(0.91));
        assert_eq!(results[1].raw_content.as_deref(), Some("Full text"));
    }

    #[test]
    fn missing_results_means_no_hits() {
        let results = TavilySearch::parse_results(r#"{"query": "x"}"#).expect("parses");
        assert!(results.is_empty());
    }

    #[test]
    fn malformed_body_is_a_response_error() {
        let err = TavilySearch::parse_results("<html>").unwrap_err();
        assert!(matches!(err, CollaboratorError::Response { .. }));
    }
}
