//! The five-section answer contract.
//!
//! A research answer must contain `Title:`, `Overview:`, `Main Discussion:`,
//! `Key Takeaways:` and `Sources:` as line-leading headers, in that order.
//! [`ResearchReport::parse`] either returns the typed sections or rejects the
//! answer with a [`ReportFormatError`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const REQUIRED_SECTIONS: [&str; 5] = [
    "Title:",
    "Overview:",
    "Main Discussion:",
    "Key Takeaways:",
    "Sources:",
];

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>()\[\]"']+"#).expect("invalid url regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportFormatError {
    #[error("missing required section `{0}`")]
    MissingSection(&'static str),
    #[error("section `{section}` appears before `{expected_after}`")]
    OutOfOrder {
        section: &'static str,
        expected_after: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub title: String,
    pub overview: String,
    pub main_discussion: String,
    pub key_takeaways: String,
    pub sources: String,
}

struct HeaderHit {
    line: usize,
    inline: String,
}

impl ResearchReport {
    pub fn parse(text: &str) -> Result<Self, ReportFormatError> {
        let lines: Vec<&str> = text.lines().collect();

        // Each header is looked up only after the previous one, so body lines
        // that happen to start with a later header word stay part of the body.
        let mut ordered: Vec<HeaderHit> = Vec::with_capacity(REQUIRED_SECTIONS.len());
        for section in 0..REQUIRED_SECTIONS.len() {
            let start = ordered.last().map(|hit| hit.line + 1).unwrap_or(0);
            let found = lines[start..]
                .iter()
                .enumerate()
                .find_map(|(offset, line)| match match_header(line) {
                    Some((idx, inline)) if idx == section => Some(HeaderHit {
                        line: start + offset,
                        inline,
                    }),
                    _ => None,
                });

            match found {
                Some(hit) => ordered.push(hit),
                None => {
                    let earlier = lines[..start]
                        .iter()
                        .any(|line| matches!(match_header(line), Some((idx, _)) if idx == section));
                    return Err(match (earlier, section.checked_sub(1)) {
                        (true, Some(previous)) => ReportFormatError::OutOfOrder {
                            section: REQUIRED_SECTIONS[section],
                            expected_after: REQUIRED_SECTIONS[previous],
                        },
                        _ => ReportFormatError::MissingSection(REQUIRED_SECTIONS[section]),
                    });
                }
            }
        }

        let mut bodies = Vec::with_capacity(ordered.len());
        for (idx, hit) in ordered.iter().enumerate() {
            let end = ordered
                .get(idx + 1)
                .map(|next| next.line)
                .unwrap_or(lines.len());
            let mut parts = Vec::new();
            if !hit.inline.is_empty() {
                parts.push(hit.inline.as_str());
            }
            parts.extend(lines[hit.line + 1..end].iter().copied());
            bodies.push(parts.join("\n").trim().to_string());
        }

        let mut bodies = bodies.into_iter();
        Ok(Self {
            title: bodies.next().unwrap_or_default(),
            overview: bodies.next().unwrap_or_default(),
            main_discussion: bodies.next().unwrap_or_default(),
            key_takeaways: bodies.next().unwrap_or_default(),
            sources: bodies.next().unwrap_or_default(),
        })
    }

    /// Bullet items of the `Key Takeaways:` section.
    pub fn takeaways(&self) -> Vec<String> {
        bullet_items(&self.key_takeaways)
    }

    /// Distinct URLs cited in the `Sources:` section, in order of appearance.
    pub fn source_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for found in URL_PATTERN.find_iter(&self.sources) {
            let url = found.as_str().trim_end_matches(['.', ',', ';']).to_string();
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        urls
    }
}

// Accepts plain headers as well as markdown-decorated ones (`## Title:`, `**Title:**`).
fn match_header(line: &str) -> Option<(usize, String)> {
    let normalized = line.trim_start().trim_start_matches(['#', '*', ' ']);
    REQUIRED_SECTIONS
        .iter()
        .enumerate()
        .find_map(|(idx, header)| {
            normalized.strip_prefix(header).map(|rest| {
                let inline = rest.trim_start_matches('*').trim().to_string();
                (idx, inline)
            })
        })
}

fn bullet_items(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter_map(|line| {
            line.strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
                .or_else(|| line.strip_prefix("• "))
        })
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
