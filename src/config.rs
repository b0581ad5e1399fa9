use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::InputKind;
use crate::error::CorpusError;

pub const CONFIG_FILE_NAME: &str = "invasion-corpus.json";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub crossref: CrossrefSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LlmSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PipelineSection {
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub max_failures: Option<u32>,
    #[serde(default)]
    pub input_kind: Option<InputKind>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CrossrefSection {
    #[serde(default)]
    pub doi_column: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub backoff_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub mailto: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 1.0,
            max_tokens: 2048,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            timeout: Duration::from_secs(120),
            max_retries: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub workers: usize,
    pub max_failures: u32,
    pub input_kind: InputKind,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            max_failures: 3,
            input_kind: InputKind::TitleAbstract,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossrefSettings {
    pub doi_column: String,
    pub batch_size: usize,
    pub backoff: Duration,
    pub max_retries: u32,
    pub mailto: Option<String>,
}

impl Default for CrossrefSettings {
    fn default() -> Self {
        Self {
            doi_column: "doi.value".to_string(),
            batch_size: 100,
            backoff: Duration::from_secs(12),
            max_retries: 5,
            mailto: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub llm: LlmSettings,
    pub pipeline: PipelineSettings,
    pub crossref: CrossrefSettings,
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub workers: Option<usize>,
    pub max_failures: Option<u32>,
    pub input_kind: Option<InputKind>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(
        path: Option<&str>,
        overrides: &ConfigOverrides,
    ) -> Result<ResolvedConfig, CorpusError> {
        let config = match Self::locate(path)? {
            Some(config_path) => Self::read(&config_path)?,
            None => Config::default(),
        };
        Self::resolve_config(config, overrides)
    }

    /// Explicit path, then the working directory, then the user config dir.
    fn locate(path: Option<&str>) -> Result<Option<PathBuf>, CorpusError> {
        if let Some(path) = path {
            let explicit = PathBuf::from(path);
            if !explicit.exists() {
                return Err(CorpusError::ConfigRead(explicit));
            }
            return Ok(Some(explicit));
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Ok(Some(local));
        }
        let user = ProjectDirs::from("", "", "invasion-corpus")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .filter(|candidate| candidate.exists());
        Ok(user)
    }

    fn read(path: &Path) -> Result<Config, CorpusError> {
        let content =
            fs::read_to_string(path).map_err(|_| CorpusError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| CorpusError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(
        config: Config,
        overrides: &ConfigOverrides,
    ) -> Result<ResolvedConfig, CorpusError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(CorpusError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let llm_defaults = LlmSettings::default();
        let llm = LlmSettings {
            base_url: overrides
                .base_url
                .clone()
                .or(config.llm.base_url)
                .unwrap_or(llm_defaults.base_url),
            model: overrides
                .model
                .clone()
                .or(config.llm.model)
                .unwrap_or(llm_defaults.model),
            temperature: config.llm.temperature.unwrap_or(llm_defaults.temperature),
            max_tokens: config.llm.max_tokens.unwrap_or(llm_defaults.max_tokens),
            top_p: config.llm.top_p.unwrap_or(llm_defaults.top_p),
            frequency_penalty: config
                .llm
                .frequency_penalty
                .unwrap_or(llm_defaults.frequency_penalty),
            presence_penalty: config
                .llm
                .presence_penalty
                .unwrap_or(llm_defaults.presence_penalty),
            timeout: config
                .llm
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(llm_defaults.timeout),
            max_retries: config.llm.max_retries.unwrap_or(llm_defaults.max_retries),
        };

        let pipeline_defaults = PipelineSettings::default();
        let pipeline = PipelineSettings {
            workers: overrides
                .workers
                .or(config.pipeline.workers)
                .unwrap_or(pipeline_defaults.workers),
            max_failures: overrides
                .max_failures
                .or(config.pipeline.max_failures)
                .unwrap_or(pipeline_defaults.max_failures),
            input_kind: overrides
                .input_kind
                .or(config.pipeline.input_kind)
                .unwrap_or(pipeline_defaults.input_kind),
        };

        let crossref_defaults = CrossrefSettings::default();
        let crossref = CrossrefSettings {
            doi_column: config
                .crossref
                .doi_column
                .unwrap_or(crossref_defaults.doi_column),
            batch_size: config
                .crossref
                .batch_size
                .unwrap_or(crossref_defaults.batch_size),
            backoff: config
                .crossref
                .backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(crossref_defaults.backoff),
            max_retries: config
                .crossref
                .max_retries
                .unwrap_or(crossref_defaults.max_retries),
            mailto: config.crossref.mailto,
        };

        let resolved = ResolvedConfig {
            schema_version,
            llm,
            pipeline,
            crossref,
        };
        validate(&resolved)?;
        Ok(resolved)
    }
}

fn validate(config: &ResolvedConfig) -> Result<(), CorpusError> {
    let invalid = |message: &str| -> Result<(), CorpusError> {
        Err(CorpusError::InvalidConfig(message.to_string()))
    };
    if config.llm.model.trim().is_empty() {
        return invalid("llm.model must not be empty");
    }
    if config.llm.base_url.trim().is_empty() {
        return invalid("llm.base_url must not be empty");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        return invalid("llm.temperature must be between 0 and 2");
    }
    if config.llm.max_tokens == 0 {
        return invalid("llm.max_tokens must be at least 1");
    }
    if config.pipeline.workers == 0 {
        return invalid("pipeline.workers must be at least 1");
    }
    if config.pipeline.max_failures == 0 {
        return invalid("pipeline.max_failures must be at least 1");
    }
    if config.crossref.batch_size == 0 {
        return invalid("crossref.batch_size must be at least 1");
    }
    if config.crossref.doi_column.trim().is_empty() {
        return invalid("crossref.doi_column must not be empty");
    }
    Ok(())
}

/// Prefers an explicit key over the environment.
pub fn resolve_api_key(explicit: Option<&str>) -> Result<String, CorpusError> {
    let key = match explicit {
        Some(key) => key.trim().to_string(),
        None => std::env::var(API_KEY_ENV)
            .map(|key| key.trim().to_string())
            .unwrap_or_default(),
    };
    if key.is_empty() {
        return Err(CorpusError::MissingApiKey);
    }
    Ok(key)
}
