use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::PrettyFormatter;

use crate::domain::Identifier;
use crate::error::CorpusError;
use crate::schema::NOT_APPLICABLE;

/// What gets persisted for one identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Extracted(Value),
    NotApplicable,
}

#[derive(Debug, Clone)]
pub struct OutputDir {
    root: Utf8PathBuf,
}

impl OutputDir {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure(&self) -> Result<(), CorpusError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| CorpusError::Filesystem(err.to_string()))
    }

    pub fn json_path(&self, id: &Identifier) -> Utf8PathBuf {
        self.root.join(id.json_file_name())
    }

    pub fn marker_path(&self, id: &Identifier) -> Utf8PathBuf {
        self.root.join(id.marker_file_name())
    }

    /// Writes exactly one file for `id` and returns its path.
    pub fn write(&self, id: &Identifier, outcome: &Outcome) -> Result<Utf8PathBuf, CorpusError> {
        match outcome {
            Outcome::Extracted(value) => {
                let path = self.json_path(id);
                write_atomic(&path, &to_pretty_json(value)?)?;
                Ok(path)
            }
            Outcome::NotApplicable => {
                let path = self.marker_path(id);
                write_atomic(&path, format!("{NOT_APPLICABLE}\n").as_bytes())?;
                Ok(path)
            }
        }
    }
}

/// Four-space indented JSON with a trailing newline.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>, CorpusError> {
    let mut buffer = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
    buffer.push(b'\n');
    Ok(buffer)
}

/// Stages `content` in a sibling temp file, then renames it over `path`.
pub fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), CorpusError> {
    let parent = path
        .parent()
        .ok_or_else(|| CorpusError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
    Ok(())
}
