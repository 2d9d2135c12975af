use std::path::PathBuf;

use thiserror::Error;

use crate::critic::CriticParseError;
use crate::report::ReportFormatError;

/// Core error type for DeepCritic.
#[derive(Debug, Error)]
pub enum DeepCriticError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("question must not be empty")]
    EmptyQuestion,
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error("critic response rejected: {0}")]
    CriticResponse(#[from] CriticParseError),
    #[error("research answer rejected: {0}")]
    MalformedAnswer(#[from] ReportFormatError),
    #[error("artifact write failed for {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("revision workflow failed: {0}")]
    Workflow(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeepCriticError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn artifact(path: PathBuf, source: std::io::Error) -> Self {
        Self::Artifact { path, source }
    }
}

/// Failure reported by an external collaborator (model runtime or search API).
///
/// None of these are retried; the revision loop treats every variant as fatal.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("{collaborator} request failed: {message}")]
    Request {
        collaborator: String,
        message: String,
    },
    #[error("{collaborator} returned HTTP {status}: {body}")]
    Status {
        collaborator: String,
        status: u16,
        body: String,
    },
    #[error("{collaborator} response could not be decoded: {message}")]
    Response {
        collaborator: String,
        message: String,
    },
    #[error("{collaborator} produced no final answer within {limit} steps")]
    StepLimit { collaborator: String, limit: u32 },
}

impl CollaboratorError {
    pub fn request(collaborator: impl Into<String>, message: impl ToString) -> Self {
        Self::Request {
            collaborator: collaborator.into(),
            message: message.to_string(),
        }
    }

    pub fn response(collaborator: impl Into<String>, message: impl ToString) -> Self {
        Self::Response {
            collaborator: collaborator.into(),
            message: message.to_string(),
        }
    }
}
