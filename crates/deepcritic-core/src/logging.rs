use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, OpenOptions, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

use crate::config::LoggingConfig;

const LOG_DIR_ENV: &str = "DEEPCRITIC_LOG_DIR";
const RETENTION_ENV: &str = "DEEPCRITIC_LOG_RETENTION_DAYS";

static REDACTION_PATTERNS: Lazy<Vec<(String, Regex)>> = Lazy::new(|| {
    vec![
        (
            "api_key".to_string(),
            Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid api_key regex"),
        ),
        (
            "secret".to_string(),
            Regex::new(r"(?i)(secret\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid secret regex"),
        ),
        (
            "bearer".to_string(),
            Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        ),
        (
            "sk_token".to_string(),
            Regex::new(r"(sk-[A-Za-z0-9]{16,})").expect("invalid sk_token regex"),
        ),
        (
            "tavily_token".to_string(),
            Regex::new(r"(tvly-[A-Za-z0-9\-]{16,})").expect("invalid tavily_token regex"),
        ),
    ]
});

#[derive(Debug, Clone)]
pub struct SessionLogInput {
    pub session_id: String,
    pub question: String,
    pub title: Option<String>,
    pub critique_rounds: u32,
    pub revision_rounds: u32,
    pub stop_reason: String,
    pub format_ok: bool,
    pub unresolved: Vec<String>,
    pub sources: Vec<String>,
    pub trace_path: Option<String>,
}

#[derive(Serialize)]
struct SessionLogRecord {
    timestamp: String,
    session_id: String,
    question: String,
    title: Option<String>,
    critique_rounds: u32,
    revision_rounds: u32,
    stop_reason: String,
    format_ok: bool,
    unresolved: Vec<String>,
    sources: Vec<String>,
    trace_path: Option<String>,
    redactions: Vec<String>,
}

#[derive(Serialize)]
struct AuditLogRecord {
    timestamp: String,
    session_id: String,
    redactions: Vec<String>,
}

/// Writes one JSON line per answered question under `<base>/<YYYY>/<MM>/`.
#[derive(Debug, Clone)]
pub struct SessionLogger {
    base_dir: PathBuf,
    retention_days: u64,
}

impl SessionLogger {
    pub fn new(base_dir: impl Into<PathBuf>, retention_days: u64) -> Self {
        Self {
            base_dir: base_dir.into(),
            retention_days,
        }
    }

    /// Build from config; `DEEPCRITIC_LOG_DIR` and `DEEPCRITIC_LOG_RETENTION_DAYS`
    /// take precedence when set.
    pub fn from_config(config: &LoggingConfig) -> Self {
        let base_dir = std::env::var(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| config.session_log_dir.clone());
        let retention_days = std::env::var(RETENTION_ENV)
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(config.retention_days);
        Self::new(base_dir, retention_days)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn log_session_completion(&self, input: SessionLogInput) -> Result<()> {
        let timestamp = Utc::now();
        let mut redactions = HashSet::new();

        let question = sanitize_text(&input.question, &mut redactions);
        let title = input
            .title
            .as_deref()
            .map(|value| sanitize_text(value, &mut redactions));
        let unresolved: Vec<String> = input
            .unresolved
            .iter()
            .map(|fix| sanitize_text(fix, &mut redactions))
            .collect();
        let sources: Vec<String> = input
            .sources
            .into_iter()
            .map(|source| sanitize_text(&source, &mut redactions))
            .collect();

        let mut redactions: Vec<String> = redactions.into_iter().collect();
        redactions.sort();

        let record = SessionLogRecord {
            timestamp: timestamp.to_rfc3339(),
            session_id: input.session_id.clone(),
            question,
            title,
            critique_rounds: input.critique_rounds,
            revision_rounds: input.revision_rounds,
            stop_reason: input.stop_reason,
            format_ok: input.format_ok,
            unresolved,
            sources,
            trace_path: input.trace_path,
            redactions,
        };

        let month_dir = self
            .base_dir
            .join(format!("{:04}", timestamp.year()))
            .join(format!("{:02}", timestamp.month()));
        let session_log_path = month_dir.join("session.jsonl");
        append_json_line(&session_log_path, &record)?;

        if !record.redactions.is_empty() {
            let audit = AuditLogRecord {
                timestamp: record.timestamp.clone(),
                session_id: input.session_id.clone(),
                redactions: record.redactions.clone(),
            };
            let audit_path = month_dir.join("audit.jsonl");
            append_json_line(&audit_path, &audit)?;
            warn!(
                session_id = %input.session_id,
                fields = ?record.redactions,
                "redacted potential secrets from session log"
            );
        }

        self.enforce_retention()?;

        Ok(())
    }

    fn enforce_retention(&self) -> Result<()> {
        if self.retention_days == 0 || !self.base_dir.exists() {
            return Ok(());
        }
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(self.retention_days.saturating_mul(86_400)))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        prune_directory(&self.base_dir, cutoff)
    }
}

/// Mask secret-looking substrings (API keys, bearer tokens).
pub fn redact(input: &str) -> String {
    let mut ignored = HashSet::new();
    sanitize_text(input, &mut ignored)
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let line = serde_json::to_string(value)?;
    writeln!(writer, "{}", line)
        .with_context(|| format!("failed to append log entry to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

fn sanitize_text(input: &str, redactions: &mut HashSet<String>) -> String {
    let mut output = input.to_string();
    for (name, regex) in REDACTION_PATTERNS.iter() {
        let mut matched = false;
        output = regex
            .replace_all(&output, |caps: &Captures| {
                matched = true;
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        if matched {
            redactions.insert(name.clone());
        }
    }
    output
}

fn prune_directory(dir: &Path, cutoff: SystemTime) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            prune_directory(&path, cutoff)?;
            if path.read_dir()?.next().is_none() {
                fs::remove_dir(&path).ok();
            }
        } else if metadata.is_file()
            && metadata
                .modified()
                .map(|time| time < cutoff)
                .unwrap_or(false)
        {
            fs::remove_file(&path).ok();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    fn input() -> SessionLogInput {
        SessionLogInput {
            session_id: "test-session".to_string(),
            question: "Find api_key=abcd1234 usage".to_string(),
            title: Some("Key usage".to_string()),
            critique_rounds: 2,
            revision_rounds: 1,
            stop_reason: "critic_satisfied".to_string(),
            format_ok: true,
            unresolved: vec!["use bearer XYZ123 token".to_string()],
            sources: vec!["sk-abcdef1234567890".to_string()],
            trace_path: Some("data/traces/test.json".to_string()),
        }
    }

    #[test]
    fn session_logging_sanitizes_and_persists() -> Result<()> {
        let temp = TempDir::new().expect("temp dir");
        let logger = SessionLogger::new(temp.path(), 0);

        logger.log_session_completion(input())?;

        let year_dir = temp.path().read_dir()?.next().unwrap()?.path();
        let month_dir = year_dir.read_dir()?.next().unwrap()?.path();
        let session_log = month_dir.join("session.jsonl");
        assert!(session_log.exists());
        let line = std::fs::read_to_string(&session_log)?;
        let record: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(record["session_id"], "test-session");
        assert_eq!(record["revision_rounds"], 1);
        assert!(record["question"].as_str().unwrap().contains("[REDACTED]"));
        assert!(!line.contains("abcd1234"));
        assert!(!line.contains("sk-abcdef1234567890"));

        let audit_log = month_dir.join("audit.jsonl");
        assert!(audit_log.exists());

        Ok(())
    }

    #[test]
    fn clean_input_writes_no_audit_record() -> Result<()> {
        let temp = TempDir::new().expect("temp dir");
        let logger = SessionLogger::new(temp.path(), 90);

        let mut clean = input();
        clean.question = "What drives lithium prices?".to_string();
        clean.unresolved.clear();
        clean.sources = vec!["https://example.com".to_string()];
        logger.log_session_completion(clean)?;

        let year_dir = temp.path().read_dir()?.next().unwrap()?.path();
        let month_dir = year_dir.read_dir()?.next().unwrap()?.path();
        assert!(month_dir.join("session.jsonl").exists());
        assert!(!month_dir.join("audit.jsonl").exists());
        Ok(())
    }

    #[test]
    fn redact_keeps_prefix_and_masks_value() {
        assert_eq!(redact("api_key=abc123"), "api_key=[REDACTED]");
        assert_eq!(redact("plain query"), "plain query");
    }
}
