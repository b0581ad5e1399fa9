use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;

use camino::Utf8Path;
use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::CorpusError;
use crate::schema::{EntityEntry, RelationshipEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Species,
    Locations,
    Ecosystems,
    Habitats,
    Relationships,
}

impl InsightKind {
    pub fn headers(self) -> &'static [&'static str] {
        match self {
            InsightKind::Species => &["Species Name", "Role", "Count"],
            InsightKind::Locations => &["Location Name", "Geopolitical Info", "Count"],
            InsightKind::Ecosystems => &["Ecosystem Name", "Type", "Count"],
            InsightKind::Habitats => &["Habitat Name", "Type", "Ecosystem Type", "Count"],
            InsightKind::Relationships => &["Relationship Name", "Type", "Count"],
        }
    }

    /// Label for the unique-tag listing, where the kind reports one.
    pub fn tag_label(self) -> Option<&'static str> {
        match self {
            InsightKind::Species => Some("roles"),
            InsightKind::Locations => Some("geopolitical info tags"),
            InsightKind::Relationships => Some("relationship types"),
            InsightKind::Ecosystems | InsightKind::Habitats => None,
        }
    }

    fn quote_all(self) -> bool {
        matches!(self, InsightKind::Locations)
    }
}

impl fmt::Display for InsightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InsightKind::Species => "species",
            InsightKind::Locations => "locations",
            InsightKind::Ecosystems => "ecosystems",
            InsightKind::Habitats => "habitats",
            InsightKind::Relationships => "relationships",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountRow {
    pub key: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InsightReport {
    pub kind: InsightKind,
    pub files_read: usize,
    pub files_skipped: usize,
    pub rows: Vec<CountRow>,
    pub unique_tags: Vec<String>,
}

#[derive(Default)]
struct Counter {
    counts: BTreeMap<Vec<String>, usize>,
    tags: BTreeSet<String>,
}

impl Counter {
    fn add(&mut self, key: Vec<String>) {
        *self.counts.entry(key).or_insert(0) += 1;
    }

    fn tag(&mut self, tag: &str) {
        self.tags.insert(tag.to_string());
    }
}

/// Tallies one kind of entity across every `*.json` file in `dir`.
pub fn compile(kind: InsightKind, dir: &Utf8Path) -> Result<InsightReport, CorpusError> {
    if !dir.as_std_path().is_dir() {
        return Err(CorpusError::DirectoryNotFound(dir.as_std_path().to_path_buf()));
    }
    let mut paths = dir
        .read_dir_utf8()
        .map_err(|err| CorpusError::Filesystem(err.to_string()))?
        .filter_map(Result::ok)
        .map(|entry| entry.path().to_path_buf())
        .filter(|path| path.extension() == Some("json") && path.is_file())
        .collect::<Vec<_>>();
    paths.sort();

    let mut counter = Counter::default();
    let mut files_read = 0;
    let mut files_skipped = 0;
    for path in paths {
        let content = match fs::read(path.as_std_path()) {
            Ok(content) => content,
            Err(err) => {
                warn!(file = %path, error = %err, "error reading JSON file");
                files_skipped += 1;
                continue;
            }
        };
        let document: Value = match serde_json::from_slice(&content) {
            Ok(document) => document,
            Err(err) => {
                warn!(file = %path, error = %err, "error decoding JSON file");
                files_skipped += 1;
                continue;
            }
        };
        files_read += 1;
        tally_document(kind, &document, &mut counter);
    }
    debug!(%kind, files_read, files_skipped, "compiled insights");

    let mut rows = counter
        .counts
        .into_iter()
        .map(|(key, count)| CountRow { key, count })
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));

    Ok(InsightReport {
        kind,
        files_read,
        files_skipped,
        rows,
        unique_tags: counter.tags.into_iter().collect(),
    })
}

fn entries<'a, T: serde::de::DeserializeOwned>(
    document: &'a Value,
    key: &str,
) -> impl Iterator<Item = T> + 'a {
    document
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|entry| entry.is_object())
        .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
}

fn tally_document(kind: InsightKind, document: &Value, counter: &mut Counter) {
    match kind {
        InsightKind::Species => {
            for entry in entries::<EntityEntry>(document, "species") {
                let name = entry.name.as_deref().unwrap_or("Unknown").to_lowercase();
                let role = entry.property("role").unwrap_or("Unknown").to_lowercase();
                counter.tag(&role);
                counter.add(vec![name, role]);
            }
        }
        InsightKind::Locations => {
            for entry in entries::<EntityEntry>(document, "location") {
                let name = entry.name.as_deref().unwrap_or_default();
                let info = entry.property("geopolitical_info").unwrap_or_default();
                if name.is_empty() || info.is_empty() {
                    continue;
                }
                counter.tag(info);
                counter.add(vec![name.to_string(), info.to_string()]);
            }
        }
        InsightKind::Ecosystems => {
            for entry in entries::<EntityEntry>(document, "ecosystem") {
                let name = entry.name.as_deref().unwrap_or("Unknown").to_string();
                let ecosystem_type = entry.property("type").unwrap_or("Unknown").to_string();
                counter.add(vec![name, ecosystem_type]);
            }
        }
        InsightKind::Habitats => {
            for entry in entries::<EntityEntry>(document, "habitat") {
                let name = entry.name.as_deref().unwrap_or("unknown").to_string();
                let habitat_type = entry.property("type").unwrap_or("unknown").to_string();
                let ecosystem = entry
                    .property("subcomponent_of")
                    .unwrap_or("unknown")
                    .to_string();
                counter.add(vec![name, habitat_type, ecosystem]);
            }
        }
        InsightKind::Relationships => {
            for entry in entries::<RelationshipEntry>(document, "relationships") {
                let name = entry.property("name").unwrap_or("unknown").to_string();
                let relation_type = entry.property("type").unwrap_or("unknown").to_string();
                counter.tag(&relation_type);
                counter.add(vec![name, relation_type]);
            }
        }
    }
}

pub fn write_csv(report: &InsightReport, path: &Utf8Path) -> Result<(), CorpusError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
    }
    let quote_style = if report.kind.quote_all() {
        csv::QuoteStyle::Always
    } else {
        csv::QuoteStyle::Necessary
    };
    let mut writer = csv::WriterBuilder::new()
        .quote_style(quote_style)
        .from_path(path.as_std_path())
        .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
    writer
        .write_record(report.kind.headers())
        .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
    for row in &report.rows {
        let count = row.count.to_string();
        let record = row
            .key
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(count.as_str()));
        writer
            .write_record(record)
            .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| CorpusError::Filesystem(err.to_string()))
}
