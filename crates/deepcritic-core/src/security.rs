use std::env;

use crate::DeepCriticError;

/// Wrapper around sensitive values to reduce accidental logging.
#[derive(Clone)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***redacted***")
    }
}

/// Require that a given environment variable is set and non-empty.
pub fn require_env(var: &str) -> Result<SecretValue, DeepCriticError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretValue(value)),
        _ => Err(DeepCriticError::MissingSecret(var.to_string())),
    }
}
