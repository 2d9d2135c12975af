use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::collaborator::SearchTopic;
use crate::critic::UnparseablePolicy;
use crate::{DeepCriticError, SecretValue, require_env};

const DEFAULT_CONFIG_PATH: &str = "deepcritic.toml";
const CONFIG_PATH_ENV: &str = "DEEPCRITIC_CONFIG";
const MAX_REVISIONS_CEILING: u32 = 10;
const MAX_SEARCH_RESULTS: u32 = 20;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub revision: RevisionConfig,
    pub planner: PlannerConfig,
    pub artifacts: ArtifactConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the configured LLM secret value (from environment only).
    pub fn llm_api_key(&self) -> Result<SecretValue, DeepCriticError> {
        require_env(&self.llm.api_key_env)
    }

    /// Resolve the configured search API secret value (from environment only).
    pub fn search_api_key(&self) -> Result<SecretValue, DeepCriticError> {
        require_env(&self.search.api_key_env)
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `DEEPCRITIC_CONFIG` environment variable.
    /// 3. `deepcritic.toml` in the current working directory.
    ///
    /// The first two must point at an existing file. When neither is given and
    /// the default file is absent, built-in defaults are used.
    pub fn load(path: Option<PathBuf>) -> Result<Config, DeepCriticError> {
        let config = match resolve_path(path) {
            ConfigSource::Required(candidate) => Self::read(&candidate)?,
            ConfigSource::Optional(candidate) if candidate.exists() => Self::read(&candidate)?,
            ConfigSource::Optional(_) => Config::default(),
        };

        Self::validate(&config)?;
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(raw: &str) -> Result<Config, DeepCriticError> {
        let config: Config = toml::from_str(raw)
            .map_err(|err| DeepCriticError::InvalidConfiguration(err.to_string()))?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Config, DeepCriticError> {
        let raw = fs::read_to_string(path)
            .map_err(|err| DeepCriticError::config_io(path.to_path_buf(), err))?;
        toml::from_str(&raw).map_err(|err| DeepCriticError::InvalidConfiguration(err.to_string()))
    }

    fn validate(config: &Config) -> Result<(), DeepCriticError> {
        if config.llm.api_key_env.trim().is_empty() {
            return Err(DeepCriticError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }
        if config.search.api_key_env.trim().is_empty() {
            return Err(DeepCriticError::InvalidConfiguration(
                "search.api_key_env must reference an environment variable".into(),
            ));
        }
        if config.revision.research_step_limit == 0 || config.revision.critic_step_limit == 0 {
            return Err(DeepCriticError::InvalidConfiguration(
                "revision step limits must be at least 1".into(),
            ));
        }
        if config.planner.step_limit == 0 || config.planner.max_search_queries == 0 {
            return Err(DeepCriticError::InvalidConfiguration(
                "planner.step_limit and planner.max_search_queries must be at least 1".into(),
            ));
        }
        if config.revision.max_revisions > MAX_REVISIONS_CEILING {
            return Err(DeepCriticError::InvalidConfiguration(format!(
                "revision.max_revisions must not exceed {MAX_REVISIONS_CEILING}"
            )));
        }
        if !(1..=MAX_SEARCH_RESULTS).contains(&config.search.max_results) {
            return Err(DeepCriticError::InvalidConfiguration(format!(
                "search.max_results must be between 1 and {MAX_SEARCH_RESULTS}"
            )));
        }
        Ok(())
    }
}

enum ConfigSource {
    Required(PathBuf),
    Optional(PathBuf),
}

fn resolve_path(path: Option<PathBuf>) -> ConfigSource {
    if let Some(path) = path {
        return ConfigSource::Required(path);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return ConfigSource::Required(PathBuf::from(from_env));
        }
    }

    ConfigSource::Optional(Path::new(DEFAULT_CONFIG_PATH).to_path_buf())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub temperature: Option<f32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-5".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub max_results: u32,
    pub topic: SearchTopic,
    pub include_raw_content: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.tavily.com".to_string(),
            api_key_env: "TAVILY_API_KEY".to_string(),
            max_results: 5,
            topic: SearchTopic::General,
            include_raw_content: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RevisionConfig {
    pub max_revisions: u32,
    pub research_step_limit: u32,
    pub critic_step_limit: u32,
    pub on_unparseable_critique: UnparseablePolicy,
    pub strict_format: bool,
}

impl Default for RevisionConfig {
    fn default() -> Self {
        Self {
            max_revisions: 3,
            research_step_limit: 12,
            critic_step_limit: 2,
            on_unparseable_critique: UnparseablePolicy::Fail,
            strict_format: false,
        }
    }
}

/// Planning turn that runs once before the first research turn.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub enabled: bool,
    pub step_limit: u32,
    pub max_search_queries: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            step_limit: 2,
            max_search_queries: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub dir: PathBuf,
    pub answer_file: String,
    pub notes_file: String,
    pub open_questions_file: String,
    pub tool_log_file: String,
    pub critic_log_file: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("research_workspace"),
            answer_file: "final_answer.md".to_string(),
            notes_file: "research_notes.md".to_string(),
            open_questions_file: "open_questions.md".to_string(),
            tool_log_file: "tool_calls.jsonl".to_string(),
            critic_log_file: "critic_log.md".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub session_log_dir: PathBuf,
    pub retention_days: u64,
    pub trace_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            session_log_dir: PathBuf::from("data/logs"),
            retention_days: 90,
            trace_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ConfigLoader::from_toml("").expect("defaults are valid");
        assert_eq!(config.revision.max_revisions, 3);
        assert_eq!(config.search.max_results, 5);
        assert_eq!(config.search.topic, SearchTopic::General);
        assert_eq!(
            config.revision.on_unparseable_critique,
            UnparseablePolicy::Fail
        );
        assert_eq!(config.artifacts.answer_file, "final_answer.md");
        assert!(config.planner.enabled);
        assert_eq!(config.planner.max_search_queries, 15);
    }

    #[test]
    fn planner_section_is_validated() {
        let config = ConfigLoader::from_toml("[planner]
enabled = false
step_limit = 3
")
            .expect("config parses");
        assert!(!config.planner.enabled);
        assert_eq!(config.planner.step_limit, 3);

        let err = ConfigLoader::from_toml("[planner]
max_search_queries = 0
").unwrap_err();
        assert!(matches!(err, DeepCriticError::InvalidConfiguration(_)));
    }

    #[test]
    fn partial_sections_override_defaults() {
        let config = ConfigLoader::from_toml(
            r#"
            [llm]
            model = "gpt-4o-mini"

            [search]
            topic = "news"
            max_results = 8

            [revision]
            max_revisions = 2
            on_unparseable_critique = "accept"
            "#,
        )
        .expect("config parses");

        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.search.topic, SearchTopic::News);
        assert_eq!(config.search.max_results, 8);
        assert_eq!(config.revision.max_revisions, 2);
        assert_eq!(
            config.revision.on_unparseable_critique,
            UnparseablePolicy::Accept
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = ConfigLoader::from_toml("[revision]\nmax_revisions = 50\n").unwrap_err();
        assert!(matches!(err, DeepCriticError::InvalidConfiguration(_)));

        let err = ConfigLoader::from_toml("[search]\nmax_results = 0\n").unwrap_err();
        assert!(matches!(err, DeepCriticError::InvalidConfiguration(_)));

        let err = ConfigLoader::from_toml("[llm]\napi_key_env = \" \"\n").unwrap_err();
        assert!(matches!(err, DeepCriticError::InvalidConfiguration(_)));
    }

    #[test]
    fn explicit_missing_path_is_an_io_error() {
        let temp = tempfile::TempDir::new().expect("temp dir");
        let err = ConfigLoader::load(Some(temp.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, DeepCriticError::ConfigIo { .. }));
    }

    #[test]
    fn explicit_path_is_read() {
        let temp = tempfile::TempDir::new().expect("temp dir");
        let path = temp.path().join("deepcritic.toml");
        fs::write(&path, "[artifacts]\ndir = \"out\"\n").expect("write config");

        let config = ConfigLoader::load(Some(path)).expect("config loads");
        assert_eq!(config.artifacts.dir, PathBuf::from("out"));
    }
}
