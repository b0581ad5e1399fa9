use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use serde_json::json;

use invasion_corpus::config::CrossrefSettings;
use invasion_corpus::crossref::{
    CrossrefClient, CrossrefWork, FAILED_FILE_NAME, Harvester, METADATA_FIELDS,
    PROCESSED_FILE_NAME,
};
use invasion_corpus::domain::Doi;
use invasion_corpus::error::CorpusError;
use invasion_corpus::output::JsonOutput;

#[derive(Default)]
struct MockCrossref {
    works: HashMap<String, serde_json::Value>,
    calls: Mutex<Vec<String>>,
}

impl MockCrossref {
    fn with_works(dois: &[&str]) -> Self {
        let works = dois
            .iter()
            .map(|doi| {
                let work = json!({
                    "DOI": doi,
                    "title": [format!("Paper {doi}")],
                    "type": "journal-article",
                    "published-print": {"date-parts": [[2021, 3, 14]]},
                    "container-title": ["Biological Invasions"],
                    "publisher": "Springer",
                    "author": [{"given": "Jane", "family": "Doe"}]
                });
                (doi.to_string(), work)
            })
            .collect();
        Self {
            works,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl CrossrefClient for &MockCrossref {
    fn fetch_work(&self, doi: &Doi) -> Result<CrossrefWork, CorpusError> {
        self.calls.lock().unwrap().push(doi.to_string());
        match self.works.get(doi.as_str()) {
            Some(work) => Ok(serde_json::from_value(work.clone()).unwrap()),
            None => Err(CorpusError::CrossrefStatus {
                status: 404,
                message: "Resource not found.".to_string(),
            }),
        }
    }
}

fn settings(batch_size: usize) -> CrossrefSettings {
    CrossrefSettings {
        batch_size,
        ..CrossrefSettings::default()
    }
}

#[test]
fn harvest_writes_rows_and_tracks_progress() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("dois.csv");
    fs::write(
        &input,
        "doi.value,source\n10.1/a,scopus\n,empty\n10.1/b,wos\n10.1/missing,wos\n10.1/c,wos\n10.1/a,dup\n",
    )
    .unwrap();
    let output = Utf8PathBuf::from_path_buf(temp.path().join("meta").join("metadata.csv")).unwrap();
    let client = MockCrossref::with_works(&["10.1/a", "10.1/b", "10.1/c"]);

    let summary = Harvester::new(&client, &settings(2))
        .harvest(&input, &output, &JsonOutput)
        .unwrap();

    assert_eq!(summary.total_rows, 6);
    assert_eq!(summary.skipped_empty, 1);
    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.already_processed, 1);

    let mut reader = csv::Reader::from_path(output.as_std_path()).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(headers.iter().collect::<Vec<_>>(), METADATA_FIELDS.to_vec());
    let rows = reader.records().map(Result::unwrap).collect::<Vec<_>>();
    assert_eq!(rows.len(), 3);
    assert_eq!(&rows[0][0], "10.1/a");
    assert_eq!(&rows[0][3], "2021");
    assert_eq!(&rows[0][6], "N/A");
    assert_eq!(&rows[0][9], "Biological Invasions");
    assert_eq!(&rows[0][14], "Jane Doe");

    let meta_dir = output.parent().unwrap();
    let processed = fs::read_to_string(meta_dir.join(PROCESSED_FILE_NAME)).unwrap();
    assert_eq!(processed.lines().collect::<Vec<_>>(), ["10.1/a", "10.1/b", "10.1/c"]);
    let failed = fs::read_to_string(meta_dir.join(FAILED_FILE_NAME)).unwrap();
    assert_eq!(failed, "DOI\n10.1/missing\n");
}

#[test]
fn rerun_skips_processed_dois_and_retries_failures() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("dois.csv");
    fs::write(&input, "doi.value\n10.1/a\n10.1/missing\n").unwrap();
    let output = Utf8PathBuf::from_path_buf(temp.path().join("metadata.csv")).unwrap();
    let client = MockCrossref::with_works(&["10.1/a"]);

    Harvester::new(&client, &settings(100))
        .harvest(&input, &output, &JsonOutput)
        .unwrap();
    let second = Harvester::new(&client, &settings(100))
        .harvest(&input, &output, &JsonOutput)
        .unwrap();

    assert_eq!(second.already_processed, 1);
    assert_eq!(second.failed, 1);
    assert_eq!(client.calls(), 3);

    let content = fs::read_to_string(output.as_std_path()).unwrap();
    assert_eq!(content.lines().count(), 2);
    let failed = fs::read_to_string(temp.path().join(FAILED_FILE_NAME)).unwrap();
    assert_eq!(failed, "DOI\n10.1/missing\n10.1/missing\n");
}

#[test]
fn missing_doi_column_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("dois.csv");
    fs::write(&input, "identifier\n10.1/a\n").unwrap();
    let output = Utf8PathBuf::from_path_buf(temp.path().join("metadata.csv")).unwrap();
    let client = MockCrossref::default();

    let err = Harvester::new(&client, &settings(10))
        .harvest(&input, &output, &JsonOutput)
        .unwrap_err();

    assert!(matches!(err, CorpusError::MissingColumns(columns) if columns == ["doi.value"]));
    assert_eq!(client.calls(), 0);
}
