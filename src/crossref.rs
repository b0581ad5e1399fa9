//! Crossref metadata harvest for a table of DOIs, flushed in batches and
//! resumable through a processed-DOI list kept next to the output table.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::CrossrefSettings;
use crate::domain::Doi;
use crate::error::CorpusError;
use crate::pipeline::{ProgressEvent, ProgressSink};

const CROSSREF_BASE: &str = "https://api.crossref.org";
const MISSING: &str = "N/A";

pub const PROCESSED_FILE_NAME: &str = "processed_dois.txt";
pub const FAILED_FILE_NAME: &str = "failed_dois.csv";

pub const METADATA_FIELDS: [&str; 18] = [
    "DOI",
    "Title",
    "Type",
    "Published Print Year",
    "Published Print Month",
    "Published Print Day",
    "Published Year",
    "Published Month",
    "Published Day",
    "Journal",
    "Volume",
    "Issue",
    "Page Range",
    "Publisher",
    "Authors",
    "Is Referenced By Count",
    "Subtitle",
    "Short Title",
];

#[derive(Debug, Deserialize)]
struct CrossrefResponse {
    status: String,
    message: Option<CrossrefWork>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CrossrefWork {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(default)]
    title: Vec<String>,
    #[serde(rename = "type")]
    work_type: Option<String>,
    #[serde(rename = "published-print")]
    published_print: Option<CrossrefDate>,
    published: Option<CrossrefDate>,
    #[serde(rename = "container-title", default)]
    container_title: Vec<String>,
    volume: Option<String>,
    issue: Option<String>,
    page: Option<String>,
    publisher: Option<String>,
    #[serde(default)]
    author: Vec<CrossrefAuthor>,
    #[serde(rename = "is-referenced-by-count")]
    is_referenced_by_count: Option<u64>,
    #[serde(default)]
    subtitle: Vec<String>,
    #[serde(rename = "short-title", default)]
    short_title: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CrossrefDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct CrossrefAuthor {
    given: Option<String>,
    family: Option<String>,
}

/// One flattened output row; field order matches `METADATA_FIELDS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkMetadata {
    pub doi: String,
    pub title: String,
    pub work_type: String,
    pub print_year: String,
    pub print_month: String,
    pub print_day: String,
    pub year: String,
    pub month: String,
    pub day: String,
    pub journal: String,
    pub volume: String,
    pub issue: String,
    pub page_range: String,
    pub publisher: String,
    pub authors: String,
    pub referenced_by_count: String,
    pub subtitle: String,
    pub short_title: String,
}

impl WorkMetadata {
    pub fn from_work(work: &CrossrefWork) -> Self {
        let [print_year, print_month, print_day] = date_triplet(work.published_print.as_ref());
        let [year, month, day] = date_triplet(work.published.as_ref());
        let authors = work
            .author
            .iter()
            .map(|author| {
                format!(
                    "{} {}",
                    author.given.as_deref().unwrap_or_default(),
                    author.family.as_deref().unwrap_or_default()
                )
                .trim()
                .to_string()
            })
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            doi: or_missing(work.doi.as_deref()),
            title: or_missing(work.title.first().map(String::as_str)),
            work_type: or_missing(work.work_type.as_deref()),
            print_year,
            print_month,
            print_day,
            year,
            month,
            day,
            journal: or_missing(work.container_title.first().map(String::as_str)),
            volume: or_missing(work.volume.as_deref()),
            issue: or_missing(work.issue.as_deref()),
            page_range: or_missing(work.page.as_deref()),
            publisher: or_missing(work.publisher.as_deref()),
            authors,
            referenced_by_count: work
                .is_referenced_by_count
                .map(|count| count.to_string())
                .unwrap_or_else(|| MISSING.to_string()),
            subtitle: joined_or_missing(&work.subtitle),
            short_title: joined_or_missing(&work.short_title),
        }
    }
}

fn or_missing(value: Option<&str>) -> String {
    value.unwrap_or(MISSING).to_string()
}

fn joined_or_missing(values: &[String]) -> String {
    if values.is_empty() {
        MISSING.to_string()
    } else {
        values.join(", ")
    }
}

fn date_triplet(date: Option<&CrossrefDate>) -> [String; 3] {
    let parts = date
        .and_then(|date| date.date_parts.first())
        .cloned()
        .unwrap_or_default();
    let part = |idx: usize| match parts.get(idx) {
        Some(Value::Number(number)) => number.to_string(),
        Some(Value::String(text)) => text.clone(),
        _ => MISSING.to_string(),
    };
    [part(0), part(1), part(2)]
}

pub trait CrossrefClient: Send + Sync {
    fn fetch_work(&self, doi: &Doi) -> Result<CrossrefWork, CorpusError>;
}

#[derive(Clone)]
pub struct CrossrefHttpClient {
    client: Client,
    base_url: String,
    backoff: Duration,
    max_retries: u32,
}

impl CrossrefHttpClient {
    pub fn new(settings: &CrossrefSettings) -> Result<Self, CorpusError> {
        Self::with_base_url(settings, CROSSREF_BASE)
    }

    pub fn with_base_url(settings: &CrossrefSettings, base_url: &str) -> Result<Self, CorpusError> {
        let agent = match &settings.mailto {
            Some(mailto) => format!(
                "invasion-corpus/{} (mailto:{mailto})",
                env!("CARGO_PKG_VERSION")
            ),
            None => format!("invasion-corpus/{}", env!("CARGO_PKG_VERSION")),
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(agent)
            .build()
            .map_err(|err| CorpusError::CrossrefHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            backoff: settings.backoff,
            max_retries: settings.max_retries,
        })
    }

    pub fn work_url(&self, doi: &Doi) -> String {
        format!(
            "{}/works/{}",
            self.base_url,
            encode_url_component(doi.as_str())
        )
    }
}

impl CrossrefClient for CrossrefHttpClient {
    fn fetch_work(&self, doi: &Doi) -> Result<CrossrefWork, CorpusError> {
        let url = self.work_url(doi);
        let mut attempt = 0u32;
        loop {
            let response = self
                .client
                .get(&url)
                .send()
                .map_err(|err| CorpusError::CrossrefHttp(err.to_string()))?;
            let status = response.status().as_u16();
            if status == 429 && attempt < self.max_retries {
                warn!(
                    %doi,
                    backoff_secs = self.backoff.as_secs(),
                    "rate limit reached, backing off"
                );
                thread::sleep(self.backoff);
                attempt += 1;
                continue;
            }
            if !response.status().is_success() {
                let message = response
                    .text()
                    .unwrap_or_else(|_| "Crossref request failed".to_string());
                return Err(CorpusError::CrossrefStatus { status, message });
            }
            let payload: CrossrefResponse = response
                .json()
                .map_err(|err| CorpusError::CrossrefHttp(err.to_string()))?;
            return match (payload.status.as_str(), payload.message) {
                ("ok", Some(work)) => Ok(work),
                (other, _) => Err(CorpusError::CrossrefHttp(format!(
                    "unexpected response status {other}"
                ))),
            };
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarvestSummary {
    pub total_rows: usize,
    pub skipped_empty: usize,
    pub already_processed: usize,
    pub fetched: usize,
    pub failed: usize,
    pub output: String,
    pub failed_log: String,
}

pub struct Harvester<C: CrossrefClient> {
    client: C,
    doi_column: String,
    batch_size: usize,
}

impl<C: CrossrefClient> Harvester<C> {
    pub fn new(client: C, settings: &CrossrefSettings) -> Self {
        Self {
            client,
            doi_column: settings.doi_column.clone(),
            batch_size: settings.batch_size.max(1),
        }
    }

    pub fn harvest(
        &self,
        input: &Path,
        output: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<HarvestSummary, CorpusError> {
        let parent = output
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| Utf8PathBuf::from("."));
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
        let processed_path = parent.join(PROCESSED_FILE_NAME);
        let failed_path = parent.join(FAILED_FILE_NAME);

        let mut processed = read_processed(&processed_path)?;
        let mut failed_log = FailedLog::open(&failed_path)?;
        let mut batch = Batch::new(output, &processed_path);

        let file = File::open(input)
            .map_err(|err| CorpusError::Table(format!("open {}: {err}", input.display())))?;
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        let column = reader
            .headers()
            .map_err(|err| CorpusError::Table(err.to_string()))?
            .iter()
            .position(|header| header == self.doi_column)
            .ok_or_else(|| CorpusError::MissingColumns(vec![self.doi_column.clone()]))?;

        let mut summary = HarvestSummary {
            output: output.to_string(),
            failed_log: failed_path.to_string(),
            ..HarvestSummary::default()
        };

        for record in reader.records() {
            summary.total_rows += 1;
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    warn!(row = summary.total_rows, error = %err, "unreadable row");
                    summary.skipped_empty += 1;
                    continue;
                }
            };
            let Ok(doi) = record.get(column).unwrap_or_default().parse::<Doi>() else {
                summary.skipped_empty += 1;
                continue;
            };
            if !processed.insert(doi.as_str().to_string()) {
                summary.already_processed += 1;
                continue;
            }

            match self.client.fetch_work(&doi) {
                Ok(work) => {
                    batch.push(doi.as_str(), WorkMetadata::from_work(&work));
                    summary.fetched += 1;
                }
                Err(err) => {
                    warn!(%doi, error = %err, "error fetching metadata");
                    failed_log.append(doi.as_str())?;
                    processed.remove(doi.as_str());
                    summary.failed += 1;
                }
            }

            if batch.len() >= self.batch_size {
                batch.flush()?;
                sink.event(ProgressEvent {
                    message: format!("processed {} records so far", summary.fetched),
                    elapsed: None,
                });
            }
        }
        batch.flush()?;

        info!(
            fetched = summary.fetched,
            failed = summary.failed,
            output = %output,
            "crossref harvest finished"
        );
        Ok(summary)
    }
}

/// Rows and their DOIs waiting to be appended together.
struct Batch<'a> {
    output: &'a Utf8Path,
    processed_path: &'a Utf8Path,
    rows: Vec<WorkMetadata>,
    dois: Vec<String>,
}

impl<'a> Batch<'a> {
    fn new(output: &'a Utf8Path, processed_path: &'a Utf8Path) -> Self {
        Self {
            output,
            processed_path,
            rows: Vec::new(),
            dois: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn push(&mut self, doi: &str, row: WorkMetadata) {
        self.dois.push(doi.to_string());
        self.rows.push(row);
    }

    /// Rows are persisted before their DOIs are marked processed.
    fn flush(&mut self) -> Result<(), CorpusError> {
        if self.rows.is_empty() {
            return Ok(());
        }
        let write_header = !self.output.as_std_path().exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.output.as_std_path())
            .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if write_header {
            writer
                .write_record(METADATA_FIELDS)
                .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
        }
        for row in &self.rows {
            writer
                .serialize(row)
                .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| CorpusError::Filesystem(err.to_string()))?;

        let mut processed = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.processed_path.as_std_path())
            .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
        for doi in &self.dois {
            writeln!(processed, "{doi}").map_err(|err| CorpusError::Filesystem(err.to_string()))?;
        }

        self.rows.clear();
        self.dois.clear();
        Ok(())
    }
}

struct FailedLog {
    writer: csv::Writer<File>,
}

impl FailedLog {
    fn open(path: &Utf8Path) -> Result<Self, CorpusError> {
        let is_new = !path.as_std_path().exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer
                .write_record(["DOI"])
                .and_then(|_| writer.flush().map_err(csv::Error::from))
                .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
        }
        Ok(Self { writer })
    }

    fn append(&mut self, doi: &str) -> Result<(), CorpusError> {
        self.writer
            .write_record([doi])
            .map_err(|err| CorpusError::Filesystem(err.to_string()))?;
        self.writer
            .flush()
            .map_err(|err| CorpusError::Filesystem(err.to_string()))
    }
}

fn read_processed(path: &Utf8Path) -> Result<HashSet<String>, CorpusError> {
    if !path.as_std_path().exists() {
        return Ok(HashSet::new());
    }
    let file =
        File::open(path.as_std_path()).map_err(|err| CorpusError::Filesystem(err.to_string()))?;
    let mut processed = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|err| CorpusError::Filesystem(err.to_string()))?;
        let line = line.trim();
        if !line.is_empty() {
            processed.insert(line.to_string());
        }
    }
    Ok(processed)
}

fn encode_url_component(value: &str) -> String {
    let mut out = String::new();
    for byte in value.as_bytes() {
        let ch = *byte as char;
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' || ch == '~' {
            out.push(ch);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}
