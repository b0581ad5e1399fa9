use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CorpusError;

static PATH_ILLEGAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());

/// Characters that cannot appear in an output filename stem.
pub const ILLEGAL_PATH_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Doi(String);

impl Doi {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn identifier(&self) -> Identifier {
        Identifier::from_doi(self)
    }
}

impl fmt::Display for Doi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Doi {
    type Err = CorpusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(CorpusError::InvalidDoi(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Filesystem-safe stem derived from a DOI. Two DOIs may map to the same
/// identifier; the later write wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn from_doi(doi: &Doi) -> Self {
        Self(sanitize(doi.as_str()))
    }

    /// Wraps a stem taken from an existing output filename.
    pub fn from_stem(stem: &str) -> Self {
        Self(stem.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn json_file_name(&self) -> String {
        format!("{}.json", self.0)
    }

    pub fn marker_file_name(&self) -> String {
        format!("{}.txt", self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn sanitize(value: &str) -> String {
    PATH_ILLEGAL.replace_all(value, "_").into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    pub doi: Doi,
    pub title: String,
    pub abstract_text: String,
}

/// Shape of the text handed to the extraction service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    #[default]
    TitleAbstract,
    FullText,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputKind::TitleAbstract => write!(f, "title_abstract"),
            InputKind::FullText => write!(f, "full_text"),
        }
    }
}
