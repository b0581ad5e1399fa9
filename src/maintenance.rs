//! Housekeeping over output directories and input tables.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::domain::sanitize;
use crate::error::CorpusError;

static NON_ALPHANUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutputCounts {
    pub extracted: usize,
    pub not_applicable: usize,
    pub other: usize,
}

impl OutputCounts {
    pub fn total(&self) -> usize {
        self.extracted + self.not_applicable + self.other
    }
}

fn list_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, CorpusError> {
    if !dir.as_std_path().is_dir() {
        return Err(CorpusError::DirectoryNotFound(dir.as_std_path().to_path_buf()));
    }
    let mut files = Vec::new();
    for entry in dir
        .read_dir_utf8()
        .map_err(|err| CorpusError::Filesystem(err.to_string()))?
    {
        let entry = entry.map_err(|err| CorpusError::Filesystem(err.to_string()))?;
        if entry.file_name().starts_with('.') {
            continue;
        }
        let path = entry.path().to_path_buf();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn count_outputs(dir: &Utf8Path) -> Result<OutputCounts, CorpusError> {
    let mut counts = OutputCounts::default();
    for path in list_files(dir)? {
        match path.extension() {
            Some("json") => counts.extracted += 1,
            Some("txt") => counts.not_applicable += 1,
            _ => counts.other += 1,
        }
    }
    Ok(counts)
}

/// `10.1_abc.json` and `10.1abc.json` normalise to the same name.
pub fn normalized_name(file_name: &str) -> String {
    let (stem, ext) = match file_name.rfind('.') {
        Some(idx) if idx > 0 => file_name.split_at(idx),
        _ => (file_name, ""),
    };
    format!("{}{ext}", NON_ALPHANUMERIC.replace_all(stem, ""))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    pub kept: usize,
    pub removed: Vec<String>,
    pub dry_run: bool,
}

/// Keeps the first file (by name) for each normalised name.
pub fn dedup_outputs(dir: &Utf8Path, dry_run: bool) -> Result<DedupReport, CorpusError> {
    let mut seen = HashSet::new();
    let mut report = DedupReport {
        dry_run,
        ..DedupReport::default()
    };
    for path in list_files(dir)? {
        let Some(name) = path.file_name() else {
            continue;
        };
        if seen.insert(normalized_name(name)) {
            report.kept += 1;
            continue;
        }
        info!(file = %path, dry_run, "removing duplicate output");
        if !dry_run {
            fs::remove_file(path.as_std_path())
                .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
        }
        report.removed.push(name.to_string());
    }
    Ok(report)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableDedupReport {
    pub rows_in: usize,
    pub rows_out: usize,
}

/// Copies `input` to `output`, keeping the first row per value of `column`.
/// Rows may have differing lengths. The output is staged in a sibling temp
/// file and only replaces `output` once every row has been written.
pub fn dedup_table(
    input: &Path,
    output: &Path,
    column: &str,
) -> Result<TableDedupReport, CorpusError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(input)
        .map_err(|err| CorpusError::Table(format!("open {}: {err}", input.display())))?;
    let headers = reader
        .headers()
        .map_err(|err| CorpusError::Table(err.to_string()))?
        .clone();
    let position = headers
        .iter()
        .position(|header| header == column)
        .ok_or_else(|| CorpusError::MissingColumns(vec![column.to_string()]))?;

    let parent = output
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let staged = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(parent)
        .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(staged);
    writer
        .write_record(&headers)
        .map_err(|err| CorpusError::Filesystem(err.to_string()))?;

    let mut seen = HashSet::new();
    let mut report = TableDedupReport::default();
    for record in reader.records() {
        let record = record.map_err(|err| CorpusError::Table(err.to_string()))?;
        report.rows_in += 1;
        let key = record.get(position).unwrap_or_default().to_string();
        if !seen.insert(key) {
            continue;
        }
        writer
            .write_record(&record)
            .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
        report.rows_out += 1;
    }
    let staged = writer
        .into_inner()
        .map_err(|err| CorpusError::Filesystem(err.error().to_string()))?;
    staged
        .as_file()
        .sync_all()
        .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
    staged
        .persist(output)
        .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
    Ok(report)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub total_dois: usize,
    pub total_files: usize,
    pub unmatched_files: Vec<String>,
}

/// Lists output stems that correspond to no DOI in the table.
pub fn audit(table: &Path, dir: &Utf8Path) -> Result<AuditReport, CorpusError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(table)
        .map_err(|err| CorpusError::Table(format!("open {}: {err}", table.display())))?;
    let position = reader
        .headers()
        .map_err(|err| CorpusError::Table(err.to_string()))?
        .iter()
        .position(|header| header == crate::source::DOI_COLUMN)
        .ok_or_else(|| CorpusError::MissingColumns(vec![crate::source::DOI_COLUMN.to_string()]))?;

    let mut dois = HashSet::new();
    for record in reader.records() {
        let record = record.map_err(|err| CorpusError::Table(err.to_string()))?;
        let doi = record.get(position).unwrap_or_default().trim();
        if !doi.is_empty() {
            dois.insert(sanitize(doi));
        }
    }

    let stems = list_files(dir)?
        .iter()
        .filter_map(|path| path.file_stem().map(str::to_string))
        .collect::<BTreeSet<_>>();
    let unmatched_files = stems
        .iter()
        .filter(|stem| !dois.contains(*stem))
        .cloned()
        .collect();

    Ok(AuditReport {
        total_dois: dois.len(),
        total_files: stems.len(),
        unmatched_files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_name_drops_punctuation_but_keeps_extension() {
        assert_eq!(normalized_name("10.1_abc.json"), "101abc.json");
        assert_eq!(normalized_name("10.1abc.json"), "101abc.json");
        assert_eq!(normalized_name("README"), "README");
    }
}
