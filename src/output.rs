use std::io::{self, Write};

use serde::Serialize;

use crate::crossref::HarvestSummary;
use crate::insights::InsightReport;
use crate::maintenance::{AuditReport, DedupReport, OutputCounts, TableDedupReport};
use crate::pipeline::{ProgressEvent, ProgressSink, RunSummary, SingleExtraction};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress on stderr, summaries on stdout.
pub struct ConsoleOutput;

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}

impl ConsoleOutput {
    pub fn print_run(summary: &RunSummary) {
        println!("{CYAN}Extraction summary{RESET}");
        println!("Total rows processed: {}", summary.total_rows);
        println!(
            "Rows skipped due to missing DOI: {}",
            summary.skipped_missing_doi
        );
        println!("Already processed: {}", summary.already_processed);
        println!("{GREEN}Extracted: {}{RESET}", summary.extracted);
        println!("{GREEN}Not applicable: {}{RESET}", summary.not_applicable);
        if summary.failed > 0 {
            println!("{YELLOW}Failed (will retry): {}{RESET}", summary.failed);
        }
        if summary.permanently_failed > 0 {
            println!(
                "{RED}Skipped after repeated failures: {}{RESET}",
                summary.permanently_failed
            );
        }
        if summary.unreadable_rows > 0 {
            println!("{RED}Unreadable rows: {}{RESET}", summary.unreadable_rows);
        }
    }

    pub fn print_single(result: &SingleExtraction) -> io::Result<()> {
        match result {
            SingleExtraction::Extracted { record } => {
                let json = serde_json::to_string_pretty(record).map_err(io::Error::other)?;
                println!("{json}");
            }
            SingleExtraction::NotApplicable => println!("N/A"),
            SingleExtraction::Invalid { reason, raw } => {
                println!("{YELLOW}Invalid response: {reason}{RESET}");
                println!("{raw}");
            }
        }
        Ok(())
    }

    pub fn print_insights(report: &InsightReport, output: &str) {
        if let Some(label) = report.kind.tag_label() {
            println!("Unique {label}:");
            for tag in &report.unique_tags {
                println!("{tag}");
            }
        }
        if report.files_skipped > 0 {
            println!(
                "{YELLOW}Skipped {} undecodable files{RESET}",
                report.files_skipped
            );
        }
        println!(
            "{GREEN}{} counts ({} rows from {} files) written to {output}{RESET}",
            report.kind,
            report.rows.len(),
            report.files_read
        );
    }

    pub fn print_harvest(summary: &HarvestSummary) {
        println!(
            "{GREEN}Metadata for {} articles written to {}{RESET}",
            summary.fetched, summary.output
        );
        println!("Already processed: {}", summary.already_processed);
        if summary.failed > 0 {
            println!(
                "{YELLOW}{} failed DOIs written to {}{RESET}",
                summary.failed, summary.failed_log
            );
        }
    }

    pub fn print_counts(dir: &str, counts: &OutputCounts) {
        println!(
            "The directory '{dir}' contains {} file(s): {} .json, {} .txt, {} other.",
            counts.total(),
            counts.extracted,
            counts.not_applicable,
            counts.other
        );
    }

    pub fn print_dedup(report: &DedupReport) {
        let verb = if report.dry_run { "Would delete" } else { "Deleted" };
        for name in &report.removed {
            println!("{YELLOW}{verb} duplicate file: {name}{RESET}");
        }
        println!(
            "{GREEN}Deduplication completed: kept {}, removed {}{RESET}",
            report.kept,
            report.removed.len()
        );
    }

    pub fn print_table_dedup(report: &TableDedupReport, output: &str) {
        println!(
            "{GREEN}Deduplicated data ({} of {} rows) written to {output}{RESET}",
            report.rows_out, report.rows_in
        );
    }

    pub fn print_audit(report: &AuditReport) {
        println!("Total DOIs in CSV: {}", report.total_dois);
        println!("Total files in folder: {}", report.total_files);
        println!("Unmatched files count: {}", report.unmatched_files.len());
        if !report.unmatched_files.is_empty() {
            println!("Unmatched files:");
            for file in &report.unmatched_files {
                println!("{file}");
            }
        }
    }
}
