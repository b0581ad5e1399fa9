use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::CorpusError;

pub const DOI_COLUMN: &str = "DOI";
pub const TITLE_COLUMN: &str = "Title";
pub const ABSTRACT_COLUMN: &str = "Abstract";
pub const FULL_TEXT_COLUMN: &str = "FullText";

pub const REQUIRED_COLUMNS: [&str; 3] = [TITLE_COLUMN, ABSTRACT_COLUMN, DOI_COLUMN];

/// One data row, fields trimmed. `doi` may be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    pub row_number: usize,
    pub doi: String,
    pub title: String,
    pub abstract_text: String,
    pub full_text: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    doi: usize,
    title: usize,
    abstract_text: usize,
    full_text: Option<usize>,
}

/// Lazily yields rows of a delimited table in file order.
#[derive(Debug)]
pub struct RowSource<R: Read> {
    reader: csv::Reader<R>,
    columns: Columns,
}

impl RowSource<File> {
    pub fn open(path: &Path) -> Result<Self, CorpusError> {
        let file = File::open(path)
            .map_err(|err| CorpusError::Table(format!("open {}: {err}", path.display())))?;
        Self::from_reader(file)
    }
}

impl<R: Read> RowSource<R> {
    /// Fails before yielding anything when a required header is absent.
    pub fn from_reader(input: R) -> Result<Self, CorpusError> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(input);
        let headers = reader
            .headers()
            .map_err(|err| CorpusError::Table(err.to_string()))?
            .clone();
        let position = |name: &str| headers.iter().position(|header| header == name);

        let missing = REQUIRED_COLUMNS
            .into_iter()
            .filter(|name| position(*name).is_none())
            .map(|name| name.to_string())
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(CorpusError::MissingColumns(missing));
        }

        let columns = match (
            position(DOI_COLUMN),
            position(TITLE_COLUMN),
            position(ABSTRACT_COLUMN),
        ) {
            (Some(doi), Some(title), Some(abstract_text)) => Columns {
                doi,
                title,
                abstract_text,
                full_text: position(FULL_TEXT_COLUMN),
            },
            _ => return Err(CorpusError::MissingColumns(vec![DOI_COLUMN.to_string()])),
        };

        Ok(Self { reader, columns })
    }

    pub fn rows(self) -> impl Iterator<Item = Result<SourceRow, CorpusError>> {
        let columns = self.columns;
        self.reader
            .into_records()
            .enumerate()
            .map(move |(index, record)| {
                let record = record.map_err(|err| CorpusError::Table(err.to_string()))?;
                let field = |idx: usize| record.get(idx).unwrap_or_default().trim().to_string();
                Ok(SourceRow {
                    row_number: index + 1,
                    doi: field(columns.doi),
                    title: field(columns.title),
                    abstract_text: field(columns.abstract_text),
                    full_text: columns
                        .full_text
                        .map(field)
                        .filter(|text| !text.is_empty()),
                })
            })
    }
}
