use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CorpusError {
    #[error("invalid DOI: {0}")]
    InvalidDoi(String),

    #[error("input table is missing required columns: {}", .0.join(", "))]
    #[diagnostic(help("the header row must contain Title, Abstract and DOI (case-sensitive)"))]
    MissingColumns(Vec<String>),

    #[error("failed to read input table: {0}")]
    Table(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("missing API key (set OPENAI_API_KEY or pass --api-key)")]
    MissingApiKey,

    #[error("LLM request failed: {0}")]
    LlmHttp(String),

    #[error("LLM service returned status {status}: {message}")]
    LlmStatus { status: u16, message: String },

    #[error("LLM response had no content: {0}")]
    LlmPayload(String),

    #[error("Crossref request failed: {0}")]
    CrossrefHttp(String),

    #[error("Crossref returned status {status}: {message}")]
    CrossrefStatus { status: u16, message: String },

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("directory not found: {0}")]
    DirectoryNotFound(PathBuf),
}
