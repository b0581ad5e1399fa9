use std::collections::HashSet;
use std::io::Read;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::PipelineSettings;
use crate::domain::{Doi, Identifier, InputKind, InputRecord};
use crate::error::CorpusError;
use crate::ledger::{Ledger, LedgerEntry, LedgerStatus, ResumeIndex};
use crate::llm::{ExtractionClient, request_extraction};
use crate::schema::{self, PaperInput, Verdict};
use crate::sink::{Outcome, OutputDir};
use crate::source::{RowSource, SourceRow};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub workers: usize,
    pub max_failures: u32,
    pub input_kind: InputKind,
    pub dry_run: bool,
}

impl PipelineOptions {
    pub fn from_settings(settings: &PipelineSettings, dry_run: bool) -> Self {
        Self {
            workers: settings.workers,
            max_failures: settings.max_failures,
            input_kind: settings.input_kind,
            dry_run,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_settings(&PipelineSettings::default(), false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total_rows: usize,
    pub skipped_missing_doi: usize,
    pub unreadable_rows: usize,
    pub already_processed: usize,
    pub permanently_failed: usize,
    pub dispatched: usize,
    pub extracted: usize,
    pub not_applicable: usize,
    pub failed: usize,
}

/// How a dispatched row was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Extracted(Utf8PathBuf),
    NotApplicable(Utf8PathBuf),
    Failed(String),
    Planned,
}

/// Result of a single ad-hoc extraction that is not written to disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SingleExtraction {
    Extracted { record: Value },
    NotApplicable,
    Invalid { reason: String, raw: String },
}

pub fn extract_one<C: ExtractionClient + ?Sized>(
    client: &C,
    input: &PaperInput,
) -> Result<SingleExtraction, CorpusError> {
    let cleaned = request_extraction(client, input)?;
    if schema::is_not_applicable(&cleaned) {
        return Ok(SingleExtraction::NotApplicable);
    }
    Ok(match schema::validate(&cleaned) {
        Verdict::Valid(record) => SingleExtraction::Extracted { record },
        Verdict::MissingKeys(keys) => SingleExtraction::Invalid {
            reason: format!("missing keys {}", keys.join(", ")),
            raw: cleaned,
        },
        Verdict::ParseError(err) => SingleExtraction::Invalid {
            reason: format!("JSON decode error: {err}"),
            raw: cleaned,
        },
    })
}

pub struct Pipeline<C: ExtractionClient> {
    client: C,
    output: OutputDir,
    options: PipelineOptions,
}

struct Job {
    row_number: usize,
    identifier: Identifier,
    record: InputRecord,
    full_text: Option<String>,
}

impl<C: ExtractionClient> Pipeline<C> {
    pub fn new(client: C, output: OutputDir, options: PipelineOptions) -> Self {
        Self {
            client,
            output,
            options,
        }
    }

    pub fn run<R: Read>(
        &self,
        source: RowSource<R>,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, CorpusError> {
        let start = Instant::now();
        if !self.options.dry_run {
            self.output.ensure()?;
        }
        let index = ResumeIndex::load(self.output.root(), self.options.max_failures)?;
        sink.event(ProgressEvent::new(format!(
            "phase=Resolve; {} identifiers already in {}",
            index.completed_count(),
            self.output.root()
        )));
        let ledger = if self.options.dry_run {
            None
        } else {
            Some(Ledger::open(self.output.root())?)
        };

        let mut summary = RunSummary::default();
        let workers = self.options.workers.max(1);
        let tally = if workers == 1 {
            let mut tally = Tally::default();
            for job in self.jobs(source, &index, &mut summary, sink) {
                tally.add(&self.process(&job, ledger.as_ref(), &index, sink));
            }
            tally
        } else {
            self.run_pool(workers, source, &index, ledger.as_ref(), &mut summary, sink)
        };
        tally.merge_into(&mut summary);

        info!(
            total = summary.total_rows,
            skipped_missing_doi = summary.skipped_missing_doi,
            extracted = summary.extracted,
            not_applicable = summary.not_applicable,
            failed = summary.failed,
            "extraction run finished"
        );
        sink.event(ProgressEvent {
            message: "phase=Done; extraction run finished".to_string(),
            elapsed: Some(start.elapsed()),
        });
        Ok(summary)
    }

    /// Rows are dispatched lazily through a bounded queue; each worker runs
    /// the same call-validate-write sequence as the sequential path. Workers
    /// own the receiver, so dispatch stops once none of them is left.
    fn run_pool<R: Read>(
        &self,
        workers: usize,
        source: RowSource<R>,
        index: &ResumeIndex,
        ledger: Option<&Ledger>,
        summary: &mut RunSummary,
        sink: &dyn ProgressSink,
    ) -> Tally {
        let (job_tx, job_rx) = mpsc::sync_channel::<Job>(workers * 2);
        let (outcome_tx, outcome_rx) = mpsc::channel::<RowOutcome>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        thread::scope(|scope| {
            for _ in 0..workers {
                let outcome_tx = outcome_tx.clone();
                let job_rx = Arc::clone(&job_rx);
                scope.spawn(move || {
                    loop {
                        let next = match job_rx.lock() {
                            Ok(receiver) => receiver.recv(),
                            Err(_) => break,
                        };
                        let Ok(job) = next else {
                            break;
                        };
                        let outcome = self.process(&job, ledger, index, sink);
                        if outcome_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(outcome_tx);
            drop(job_rx);

            let collector = scope.spawn(move || {
                let mut tally = Tally::default();
                for outcome in outcome_rx {
                    tally.add(&outcome);
                }
                tally
            });

            for job in self.jobs(source, index, summary, sink) {
                if job_tx.send(job).is_err() {
                    break;
                }
            }
            drop(job_tx);

            collector.join().unwrap_or_default()
        })
    }

    /// Filters the table down to rows that still need the service, keeping
    /// the skip counters in `summary` current.
    fn jobs<'a, R: Read + 'a>(
        &'a self,
        source: RowSource<R>,
        index: &'a ResumeIndex,
        summary: &'a mut RunSummary,
        sink: &'a dyn ProgressSink,
    ) -> impl Iterator<Item = Job> + 'a {
        let mut seen = HashSet::new();
        source.rows().filter_map(move |row| {
            summary.total_rows += 1;
            let row = match row {
                Ok(row) => row,
                Err(err) => {
                    warn!(row = summary.total_rows, error = %err, "unreadable row");
                    summary.unreadable_rows += 1;
                    return None;
                }
            };
            let SourceRow {
                row_number,
                doi,
                title,
                abstract_text,
                full_text,
            } = row;

            let Ok(doi) = doi.parse::<Doi>() else {
                warn!(row = row_number, "row without a DOI, ignoring it");
                sink.event(ProgressEvent::new(format!(
                    "row {row_number} without a DOI, ignoring it"
                )));
                summary.skipped_missing_doi += 1;
                return None;
            };

            let identifier = doi.identifier();
            if index.is_completed(&identifier) || !seen.insert(identifier.clone()) {
                debug!(%doi, "skipping already processed DOI");
                summary.already_processed += 1;
                return None;
            }
            if index.is_permanently_failed(&identifier) {
                warn!(%doi, failures = index.failures(&identifier), "skipping permanently failed DOI");
                summary.permanently_failed += 1;
                return None;
            }

            summary.dispatched += 1;
            Some(Job {
                row_number,
                identifier,
                record: InputRecord {
                    doi,
                    title,
                    abstract_text,
                },
                full_text,
            })
        })
    }

    fn paper_input(&self, job: &Job) -> PaperInput {
        match (self.options.input_kind, &job.full_text) {
            (InputKind::FullText, Some(text)) => PaperInput::FullText { text: text.clone() },
            _ => PaperInput::TitleAbstract {
                title: job.record.title.clone(),
                abstract_text: job.record.abstract_text.clone(),
            },
        }
    }

    fn process(
        &self,
        job: &Job,
        ledger: Option<&Ledger>,
        index: &ResumeIndex,
        sink: &dyn ProgressSink,
    ) -> RowOutcome {
        let doi = &job.record.doi;
        sink.event(ProgressEvent::new(format!(
            "processing row {}: DOI = {doi}",
            job.row_number
        )));
        if self.options.dry_run {
            return RowOutcome::Planned;
        }

        let cleaned = match request_extraction(&self.client, &self.paper_input(job)) {
            Ok(cleaned) => cleaned,
            Err(err) => {
                warn!(%doi, error = %err, "extraction request failed");
                return self.fail(job, ledger, index, format!("extraction error: {err}"), sink);
            }
        };

        let outcome = if schema::is_not_applicable(&cleaned) {
            Outcome::NotApplicable
        } else {
            match schema::validate(&cleaned) {
                Verdict::Valid(value) => Outcome::Extracted(value),
                Verdict::MissingKeys(keys) => {
                    warn!(%doi, missing = ?keys, "validation failed: missing keys");
                    return self.fail(
                        job,
                        ledger,
                        index,
                        format!("missing keys {}", keys.join(", ")),
                        sink,
                    );
                }
                Verdict::ParseError(err) => {
                    warn!(%doi, error = %err, raw = %cleaned, "validation failed: JSON decode error");
                    return self.fail(job, ledger, index, format!("JSON decode error: {err}"), sink);
                }
            }
        };

        let path = match self.output.write(&job.identifier, &outcome) {
            Ok(path) => path,
            Err(err) => {
                warn!(%doi, error = %err, "failed to write output");
                return self.fail(job, ledger, index, format!("write error: {err}"), sink);
            }
        };

        let status = match outcome {
            Outcome::Extracted(_) => LedgerStatus::Extracted,
            Outcome::NotApplicable => LedgerStatus::NotApplicable,
        };
        record(ledger, LedgerEntry::new(job.identifier.clone(), doi.as_str(), status, None));
        sink.event(ProgressEvent::new(format!("wrote {path}")));
        match status {
            LedgerStatus::NotApplicable => {
                info!(%doi, "writing N/A response");
                RowOutcome::NotApplicable(path)
            }
            _ => {
                info!(%doi, "writing extracted data");
                RowOutcome::Extracted(path)
            }
        }
    }

    fn fail(
        &self,
        job: &Job,
        ledger: Option<&Ledger>,
        index: &ResumeIndex,
        reason: String,
        sink: &dyn ProgressSink,
    ) -> RowOutcome {
        let failures = index.failures(&job.identifier) + 1;
        if failures >= self.options.max_failures {
            warn!(
                doi = %job.record.doi,
                failures,
                "DOI reached the failure limit and will not be retried"
            );
        }
        sink.event(ProgressEvent::new(format!(
            "skipping {}: {reason}",
            job.record.doi
        )));
        record(
            ledger,
            LedgerEntry::new(
                job.identifier.clone(),
                job.record.doi.as_str(),
                LedgerStatus::Failed,
                Some(reason.clone()),
            ),
        );
        RowOutcome::Failed(reason)
    }
}

fn record(ledger: Option<&Ledger>, entry: LedgerEntry) {
    if let Some(ledger) = ledger {
        if let Err(err) = ledger.append(&entry) {
            warn!(identifier = %entry.identifier, error = %err, "failed to append ledger entry");
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    extracted: usize,
    not_applicable: usize,
    failed: usize,
}

impl Tally {
    fn add(&mut self, outcome: &RowOutcome) {
        match outcome {
            RowOutcome::Extracted(_) => self.extracted += 1,
            RowOutcome::NotApplicable(_) => self.not_applicable += 1,
            RowOutcome::Failed(_) => self.failed += 1,
            RowOutcome::Planned => {}
        }
    }

    fn merge_into(self, summary: &mut RunSummary) {
        summary.extracted += self.extracted;
        summary.not_applicable += self.not_applicable;
        summary.failed += self.failed;
    }
}
