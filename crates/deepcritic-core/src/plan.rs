//! Research plan produced by the planner before the first research turn.
//!
//! The planner replies with a JSON object holding sub-questions and search
//! queries. Models often wrap JSON in prose or a fenced block, so parsing
//! looks at the outermost `{ ... }` span of the reply.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchPlan {
    #[serde(default)]
    pub sub_questions: Vec<String>,
    #[serde(default)]
    pub search_queries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanParseError {
    #[error("planner reply contains no JSON object")]
    NoJson,
    #[error("planner reply is not a valid plan: {0}")]
    Invalid(String),
    #[error("planner returned neither sub-questions nor search queries")]
    Empty,
}

impl ResearchPlan {
    /// Parse a planner reply, keeping at most `max_queries` search queries.
    ///
    /// Blank and repeated entries (compared case-insensitively) are dropped.
    pub fn parse(text: &str, max_queries: usize) -> Result<Self, PlanParseError> {
        let start = text.find('{').ok_or(PlanParseError::NoJson)?;
        let end = text.rfind('}').ok_or(PlanParseError::NoJson)?;
        if end < start {
            return Err(PlanParseError::NoJson);
        }

        let raw: ResearchPlan = serde_json::from_str(&text[start..=end])
            .map_err(|err| PlanParseError::Invalid(err.to_string()))?;

        let mut search_queries = tidy(raw.search_queries);
        search_queries.truncate(max_queries);
        let plan = ResearchPlan {
            sub_questions: tidy(raw.sub_questions),
            search_queries,
        };
        if plan.sub_questions.is_empty() && plan.search_queries.is_empty() {
            return Err(PlanParseError::Empty);
        }
        Ok(plan)
    }

    /// Plain-text rendering used in the research prompt and the notes.
    pub fn render(&self) -> String {
        let mut output = String::new();
        if !self.sub_questions.is_empty() {
            let _ = writeln!(output, "Sub-questions:");
            for question in &self.sub_questions {
                let _ = writeln!(output, "- {question}");
            }
        }
        if !self.search_queries.is_empty() {
            let _ = writeln!(output, "Suggested searches:");
            for query in &self.search_queries {
                let _ = writeln!(output, "- {query}");
            }
        }
        output.trim_end().to_string()
    }
}

fn tidy(entries: Vec<String>) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    for entry in entries {
        let entry = entry.trim().to_string();
        if entry.is_empty() || kept.iter().any(|seen| seen.eq_ignore_ascii_case(&entry)) {
            continue;
        }
        kept.push(entry);
    }
    kept
}
