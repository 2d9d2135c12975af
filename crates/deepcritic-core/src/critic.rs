//! Parsing of critic replies into a typed decision.
//!
//! The critic is instructed to answer with the literal `ENOUGH` or with
//! `REVISE:` followed by a bulleted list of fixes. Anything else is reported as
//! a [`CriticParseError`]; what the loop does with it is governed by
//! [`UnparseablePolicy`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SUFFICIENT_TOKEN: &str = "ENOUGH";
pub const REVISE_PREFIX: &str = "REVISE:";

const EXCERPT_CHARS: usize = 60;

static BULLET_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[-*•+]|\d+[.)])\s*").expect("invalid bullet regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CriticDecision {
    Sufficient,
    ReviseWith(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CriticParseError {
    #[error("critic returned an empty response")]
    Empty,
    #[error("expected `ENOUGH` or `REVISE:`, got {excerpt:?}")]
    Unrecognized { excerpt: String },
    #[error("critic asked for a revision without listing any fix")]
    NoFixes,
}

/// What the loop does when the critic reply is neither `ENOUGH` nor `REVISE:`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnparseablePolicy {
    /// Fail the request with [`crate::DeepCriticError::CriticResponse`].
    #[default]
    Fail,
    /// Stop revising and keep the current answer.
    Accept,
}

impl CriticDecision {
    /// Parse a critic reply using a case-insensitive prefix match.
    pub fn parse(text: &str) -> Result<Self, CriticParseError> {
        let trimmed = text.trim().trim_start_matches(['*', '`']).trim_start();
        if trimmed.is_empty() {
            return Err(CriticParseError::Empty);
        }

        if starts_with_token(trimmed, SUFFICIENT_TOKEN) {
            return Ok(CriticDecision::Sufficient);
        }

        if let Some(rest) = strip_prefix_ignore_case(trimmed, REVISE_PREFIX) {
            let fixes = parse_fixes(rest);
            if fixes.is_empty() {
                return Err(CriticParseError::NoFixes);
            }
            return Ok(CriticDecision::ReviseWith(fixes));
        }

        Err(CriticParseError::Unrecognized {
            excerpt: trimmed.chars().take(EXCERPT_CHARS).collect(),
        })
    }

    pub fn fixes(&self) -> &[String] {
        match self {
            CriticDecision::Sufficient => &[],
            CriticDecision::ReviseWith(fixes) => fixes,
        }
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

// `ENOUGH.` and `Enough` count, `ENOUGHNESS` does not.
fn starts_with_token(text: &str, token: &str) -> bool {
    match strip_prefix_ignore_case(text, token) {
        Some(rest) => !rest.starts_with(|c: char| c.is_alphanumeric()),
        None => false,
    }
}

// Repeated fixes (compared case-insensitively) keep their first spelling.
fn parse_fixes(body: &str) -> Vec<String> {
    let mut fixes: Vec<String> = Vec::new();
    for line in body.lines() {
        let fix = BULLET_MARKER.replace(line.trim(), "").trim().to_string();
        if fix.is_empty() || fixes.iter().any(|seen| seen.eq_ignore_ascii_case(&fix)) {
            continue;
        }
        fixes.push(fix);
    }
    fixes
}

/// Fixes from `previous` that no longer appear in `current`.
pub(crate) fn resolved_since(previous: &[String], current: &[String]) -> Vec<String> {
    previous
        .iter()
        .filter(|fix| {
            !current
                .iter()
                .any(|other| other.trim().eq_ignore_ascii_case(fix.trim()))
        })
        .cloned()
        .collect()
}
