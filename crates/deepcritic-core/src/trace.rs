use std::fmt::Write as _;
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One step of a revision run (planning, a research call, a critique, finalisation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub step: String,
    pub round: u32,
    pub message: String,
    pub timestamp_ms: u64,
}

impl TraceEvent {
    pub fn new(step: impl Into<String>, round: u32, message: impl Into<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            step: step.into(),
            round,
            message: message.into(),
            timestamp_ms,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceCollector {
    events: Vec<TraceEvent>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn from_events(events: Vec<TraceEvent>) -> Self {
        Self { events }
    }

    pub fn record(&mut self, step: impl Into<String>, round: u32, message: impl Into<String>) {
        self.events.push(TraceEvent::new(step, round, message));
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Number of recorded events for the given step name.
    pub fn count(&self, step: &str) -> usize {
        self.events.iter().filter(|event| event.step == step).count()
    }

    pub fn render_markdown(&self) -> String {
        if self.events.is_empty() {
            return "No trace events recorded.".to_string();
        }
        let mut output = String::from("### Revision Trace\n");
        for (idx, event) in self.events.iter().enumerate() {
            let _ = writeln!(
                output,
                "{}. [round {}] {} -> {}",
                idx + 1,
                event.round,
                event.step,
                event.message
            );
        }
        output
    }

    pub fn render_mermaid(&self) -> String {
        if self.events.is_empty() {
            return "flowchart TD\n  %% no trace events captured\n".to_string();
        }

        let mut output = String::from("flowchart TD\n");
        for (idx, event) in self.events.iter().enumerate() {
            let label = sanitize_mermaid(&format!(
                "{} (round {}): {}",
                event.step, event.round, event.message
            ));
            let _ = writeln!(output, "  step{}[\"{label}\"]", idx + 1);
        }
        for idx in 1..self.events.len() {
            let _ = writeln!(output, "  step{idx} --> step{}", idx + 1);
        }
        output
    }
}

fn sanitize_mermaid(text: &str) -> String {
    text.replace('"', "#quot;")
        .replace('[', "(")
        .replace(']', ")")
        .replace('\n', "<br/>")
}

/// Write the run's events to `<dir>/<session_id>.json`.
pub fn persist_trace<P: AsRef<Path>>(
    dir: P,
    session_id: &str,
    events: &[TraceEvent],
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    create_dir_all(dir)
        .with_context(|| format!("failed to create trace directory {}", dir.display()))?;
    let path = dir.join(format!("{session_id}.json"));
    let payload = serde_json::to_vec_pretty(events)?;
    let mut file = File::create(&path)
        .with_context(|| format!("failed to create trace file {}", path.display()))?;
    file.write_all(&payload)
        .with_context(|| format!("failed to write trace file {}", path.display()))?;
    Ok(path)
}
