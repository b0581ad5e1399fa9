//! Append-only processing ledger plus the resume index built from it and
//! from the output directory listing.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::Identifier;
use crate::error::CorpusError;
use crate::schema::INSTRUCTION_VERSION;

pub const LEDGER_FILE_NAME: &str = ".ledger.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Extracted,
    NotApplicable,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub identifier: Identifier,
    pub doi: String,
    pub status: LedgerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Instruction template revision the response was requested with.
    #[serde(default)]
    pub instruction_version: u32,
    pub at: String,
}

impl LedgerEntry {
    pub fn new(
        identifier: Identifier,
        doi: &str,
        status: LedgerStatus,
        reason: Option<String>,
    ) -> Self {
        Self {
            identifier,
            doi: doi.to_string(),
            status,
            reason,
            instruction_version: INSTRUCTION_VERSION,
            at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Shared handle on the ledger file; appends are serialized.
pub struct Ledger {
    path: Utf8PathBuf,
    file: Mutex<File>,
}

impl Ledger {
    pub fn path_in(dir: &Utf8Path) -> Utf8PathBuf {
        dir.join(LEDGER_FILE_NAME)
    }

    pub fn open(dir: &Utf8Path) -> Result<Self, CorpusError> {
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
        let path = Self::path_in(dir);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| CorpusError::Ledger(format!("open {path}: {err}")))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn append(&self, entry: &LedgerEntry) -> Result<(), CorpusError> {
        let mut line =
            serde_json::to_vec(entry).map_err(|err| CorpusError::Ledger(err.to_string()))?;
        line.push(b'\n');
        let mut file = self
            .file
            .lock()
            .map_err(|_| CorpusError::Ledger("ledger lock poisoned".to_string()))?;
        file.write_all(&line)
            .map_err(|err| CorpusError::Ledger(err.to_string()))?;
        file.flush()
            .map_err(|err| CorpusError::Ledger(err.to_string()))?;
        Ok(())
    }

    /// Reads every well-formed entry in append order. A torn or corrupt line
    /// is logged and skipped.
    pub fn read_entries(dir: &Utf8Path) -> Result<Vec<LedgerEntry>, CorpusError> {
        let path = Self::path_in(dir);
        if !path.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path.as_std_path())
            .map_err(|err| CorpusError::Ledger(format!("open {path}: {err}")))?;
        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|err| CorpusError::Ledger(err.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(line = index + 1, error = %err, "skipping corrupt ledger line"),
            }
        }
        Ok(entries)
    }
}

/// Which identifiers a run must not send to the extraction service again.
#[derive(Debug, Clone, Default)]
pub struct ResumeIndex {
    completed: HashSet<Identifier>,
    failures: HashMap<Identifier, u32>,
    max_failures: u32,
}

impl ResumeIndex {
    pub fn load(dir: &Utf8Path, max_failures: u32) -> Result<Self, CorpusError> {
        let completed = scan_outputs(dir)?;
        let mut failures = HashMap::new();
        for entry in Ledger::read_entries(dir)? {
            match entry.status {
                LedgerStatus::Failed => *failures.entry(entry.identifier).or_insert(0) += 1,
                LedgerStatus::Extracted | LedgerStatus::NotApplicable => {
                    failures.remove(&entry.identifier);
                }
            }
        }
        Ok(Self {
            completed,
            failures,
            max_failures,
        })
    }

    pub fn is_completed(&self, id: &Identifier) -> bool {
        self.completed.contains(id)
    }

    pub fn is_permanently_failed(&self, id: &Identifier) -> bool {
        !self.is_completed(id) && self.failures(id) >= self.max_failures
    }

    pub fn is_processed(&self, id: &Identifier) -> bool {
        self.is_completed(id) || self.is_permanently_failed(id)
    }

    /// Consecutive failures recorded since the last success.
    pub fn failures(&self, id: &Identifier) -> u32 {
        self.failures.get(id).copied().unwrap_or(0)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }
}

/// Identifiers with a finished `.json` or `.txt` output in `dir`.
pub fn scan_outputs(dir: &Utf8Path) -> Result<HashSet<Identifier>, CorpusError> {
    let mut done = HashSet::new();
    if !dir.as_std_path().exists() {
        return Ok(done);
    }
    let entries = dir
        .read_dir_utf8()
        .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| CorpusError::Filesystem(err.to_string()))?;
        let name = entry.file_name();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let is_output = matches!(path.extension(), Some("json") | Some("txt"));
        if !is_output || !path.is_file() {
            continue;
        }
        if let Some(stem) = path.file_stem() {
            done.insert(Identifier::from_stem(stem));
        }
    }
    Ok(done)
}
