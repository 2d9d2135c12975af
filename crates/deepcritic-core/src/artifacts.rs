//! File-backed research artifacts.
//!
//! The answer file is overwritten in place; every other artifact is opened in
//! append mode only, so earlier content is always a byte prefix of later
//! content.

use std::fmt::Write as _;
use std::fs::{self, OpenOptions, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ArtifactConfig;
use crate::logging::redact;
use crate::report::ResearchReport;
use crate::DeepCriticError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Answer,
    Notes,
    OpenQuestions,
    ToolCalls,
    CriticLog,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 5] = [
        ArtifactKind::Answer,
        ArtifactKind::Notes,
        ArtifactKind::OpenQuestions,
        ArtifactKind::ToolCalls,
        ArtifactKind::CriticLog,
    ];

    pub fn is_append_only(self) -> bool {
        !matches!(self, ArtifactKind::Answer)
    }
}

/// Locations of the research artifacts for one workspace directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    answer: PathBuf,
    notes: PathBuf,
    open_questions: PathBuf,
    tool_calls: PathBuf,
    critic_log: PathBuf,
}

impl ArtifactStore {
    pub fn open(config: &ArtifactConfig) -> Result<Self, DeepCriticError> {
        let dir = config.dir.clone();
        create_dir_all(&dir).map_err(|err| DeepCriticError::artifact(dir.clone(), err))?;

        Ok(Self {
            answer: dir.join(&config.answer_file),
            notes: dir.join(&config.notes_file),
            open_questions: dir.join(&config.open_questions_file),
            tool_calls: dir.join(&config.tool_log_file),
            critic_log: dir.join(&config.critic_log_file),
            dir,
        })
    }

    /// Store rooted at `dir` with the default file names.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Result<Self, DeepCriticError> {
        Self::open(&ArtifactConfig {
            dir: dir.into(),
            ..ArtifactConfig::default()
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Answer => &self.answer,
            ArtifactKind::Notes => &self.notes,
            ArtifactKind::OpenQuestions => &self.open_questions,
            ArtifactKind::ToolCalls => &self.tool_calls,
            ArtifactKind::CriticLog => &self.critic_log,
        }
    }

    /// Current content of an artifact; empty if it was never written.
    pub fn read(&self, kind: ArtifactKind) -> Result<String, DeepCriticError> {
        let path = self.path(kind);
        if !path.exists() {
            return Ok(String::new());
        }
        fs::read_to_string(path).map_err(|err| DeepCriticError::artifact(path.to_path_buf(), err))
    }

    /// Replace the answer file. Written to a sibling temp file first, then renamed.
    pub fn write_answer(&self, answer: &str) -> Result<(), DeepCriticError> {
        let tmp = self.answer.with_extension("tmp");
        fs::write(&tmp, answer).map_err(|err| DeepCriticError::artifact(tmp.clone(), err))?;
        fs::rename(&tmp, &self.answer)
            .map_err(|err| DeepCriticError::artifact(self.answer.clone(), err))
    }

    pub fn append_notes(&self, entry: &NotesEntry) -> Result<(), DeepCriticError> {
        append_text(&self.notes, &entry.render())
    }

    pub fn append_round_summary(
        &self,
        critique_rounds: u32,
        revision_rounds: u32,
    ) -> Result<(), DeepCriticError> {
        append_text(
            &self.notes,
            &format!("Critique rounds: {critique_rounds}, Revision rounds: {revision_rounds}\n\n"),
        )
    }

    pub fn append_open_question(&self, entry: &OpenQuestion) -> Result<(), DeepCriticError> {
        append_text(&self.open_questions, &entry.render())
    }

    pub fn append_critique(&self, round: u32, critique: &str) -> Result<(), DeepCriticError> {
        let block = format!(
            "### Critique round {round} — {}\n{}\n\n",
            Utc::now().format(TIMESTAMP_FORMAT),
            critique.trim_end()
        );
        append_text(&self.critic_log, &block)
    }

    pub fn append_tool_call(&self, record: &ToolCallRecord) -> Result<(), DeepCriticError> {
        let mut record = record.clone();
        record.query = redact(&record.query);
        let line = serde_json::to_string(&record).map_err(|err| DeepCriticError::Other(err.into()))?;
        append_text(&self.tool_calls, &format!("{line}\n"))
    }
}

fn append_text(path: &Path, text: &str) -> Result<(), DeepCriticError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent).map_err(|err| DeepCriticError::artifact(parent.to_path_buf(), err))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| DeepCriticError::artifact(path.to_path_buf(), err))?;
    file.write_all(text.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|err| DeepCriticError::artifact(path.to_path_buf(), err))
}

/// One `## Research Notes` section.
#[derive(Debug, Clone)]
pub struct NotesEntry {
    pub timestamp: DateTime<Utc>,
    pub context: String,
    pub findings: String,
    pub interpretation: String,
    pub sources_consulted: String,
}

impl NotesEntry {
    pub fn from_report(context: impl Into<String>, report: &ResearchReport) -> Self {
        let findings = if report.key_takeaways.is_empty() {
            report.main_discussion.clone()
        } else {
            format!("{}\n\n{}", report.main_discussion, report.key_takeaways)
        };
        Self {
            timestamp: Utc::now(),
            context: context.into(),
            findings,
            interpretation: report.overview.clone(),
            sources_consulted: report.sources.clone(),
        }
    }

    /// Notes for an answer that failed the section contract.
    pub fn unstructured(context: impl Into<String>, reason: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            context: context.into(),
            findings: format!("(answer did not follow the section format: {reason})"),
            interpretation: "(none)".to_string(),
            sources_consulted: "(none)".to_string(),
        }
    }

    pub fn render(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(
            output,
            "## Research Notes — {}\n",
            self.timestamp.format(TIMESTAMP_FORMAT)
        );
        for (label, body) in [
            ("Context:", &self.context),
            ("Findings:", &self.findings),
            ("Interpretation:", &self.interpretation),
            ("Sources Consulted:", &self.sources_consulted),
        ] {
            let _ = writeln!(output, "{label}\n{}\n", body.trim());
        }
        output
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenQuestion {
    Unresolved(String),
    Resolved(String),
}

impl OpenQuestion {
    pub fn render(&self) -> String {
        match self {
            OpenQuestion::Unresolved(text) => format!("Unresolved: {}\n", text.trim()),
            OpenQuestion::Resolved(text) => format!("[Resolved] Resolved: {}\n", text.trim()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Ok,
    Error,
}

/// One line of the tool-call log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub timestamp: String,
    pub query: String,
    pub parameters: serde_json::Value,
    pub latency_ms: u64,
    pub result_count: usize,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ArtifactStore) {
        let temp = TempDir::new().expect("temp dir");
        let store = ArtifactStore::in_dir(temp.path().join("workspace")).expect("store opens");
        (temp, store)
    }

    #[test]
    fn answer_is_overwritten_in_place() {
        let (_temp, store) = store();
        store.write_answer("first").expect("write");
        store.write_answer("second").expect("write");
        assert_eq!(store.read(ArtifactKind::Answer).expect("read"), "second");
        assert!(!store.path(ArtifactKind::Answer).with_extension("tmp").exists());
    }

    #[test]
    fn appends_extend_previous_content() {
        let (_temp, store) = store();
        store
            .append_open_question(&OpenQuestion::Unresolved("Add sources".into()))
            .expect("append");
        let before = store.read(ArtifactKind::OpenQuestions).expect("read");

        store
            .append_open_question(&OpenQuestion::Resolved("Add sources".into()))
            .expect("append");
        let after = store.read(ArtifactKind::OpenQuestions).expect("read");

        assert!(after.starts_with(&before));
        assert_eq!(after, "Unresolved: Add sources\n[Resolved] Resolved: Add sources\n");
    }

    #[test]
    fn notes_entry_has_all_headers() {
        let entry = NotesEntry {
            timestamp: Utc::now(),
            context: "Question: why?".into(),
            findings: "Because.".into(),
            interpretation: "Plausible.".into(),
            sources_consulted: "- https://example.com".into(),
        };
        let rendered = entry.render();
        assert!(rendered.starts_with("## Research Notes — "));
        let positions: Vec<usize> = ["Context:", "Findings:", "Interpretation:", "Sources Consulted:"]
            .iter()
            .map(|label| rendered.find(label).expect("label present"))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn open_question_rendering_is_stable() {
        insta::assert_snapshot!(
            format!(
                "{}{}",
                OpenQuestion::Unresolved(" Cite the 2024 survey ".into()).render(),
                OpenQuestion::Resolved("Cite the 2024 survey".into()).render()
            )
            .trim_end(),
            @r"
        Unresolved: Cite the 2024 survey
        [Resolved] Resolved: Cite the 2024 survey
        "
        );
    }

    #[test]
    fn tool_call_log_is_json_lines_with_redacted_query() {
        let (_temp, store) = store();
        let record = ToolCallRecord {
            tool: "internet_search".into(),
            timestamp: Utc::now().to_rfc3339(),
            query: "lookup api_key=abcd1234 usage".into(),
            parameters: serde_json::json!({"max_results": 5}),
            latency_ms: 12,
            result_count: 3,
            status: ToolCallStatus::Ok,
            error: None,
        };
        store.append_tool_call(&record).expect("append");
        store.append_tool_call(&record).expect("append");

        let log = store.read(ArtifactKind::ToolCalls).expect("read");
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: ToolCallRecord = serde_json::from_str(lines[0]).expect("json line");
        assert_eq!(parsed.result_count, 3);
        assert!(parsed.query.contains("[REDACTED]"));
        assert!(!parsed.query.contains("abcd1234"));
    }

    #[test]
    fn critic_log_blocks_are_numbered() {
        let (_temp, store) = store();
        store.append_critique(1, "REVISE:\n- more").expect("append");
        store.append_critique(2, "ENOUGH").expect("append");
        let log = store.read(ArtifactKind::CriticLog).expect("read");
        assert!(log.contains("### Critique round 1 — "));
        assert!(log.contains("### Critique round 2 — "));
        assert!(log.ends_with("ENOUGH\n\n"));
    }
}
