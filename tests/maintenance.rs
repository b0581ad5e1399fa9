use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use tempfile::TempDir;

use invasion_corpus::error::CorpusError;
use invasion_corpus::maintenance::{audit, count_outputs, dedup_outputs, dedup_table};

fn output_dir(files: &[&str]) -> (TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    for name in files {
        fs::write(root.join(name), "{}\n").unwrap();
    }
    (temp, root)
}

#[test]
fn counts_outputs_by_extension() {
    let (_temp, root) = output_dir(&[
        "10.1_a.json",
        "10.1_b.json",
        "10.1_c.txt",
        "notes.md",
        ".ledger.jsonl",
    ]);
    let counts = count_outputs(&root).unwrap();
    assert_eq!(counts.extracted, 2);
    assert_eq!(counts.not_applicable, 1);
    assert_eq!(counts.other, 1);
    assert_eq!(counts.total(), 4);
}

#[test]
fn counting_a_missing_directory_fails() {
    let (_temp, root) = output_dir(&[]);
    assert_matches!(
        count_outputs(&root.join("absent")),
        Err(CorpusError::DirectoryNotFound(_))
    );
}

#[test]
fn dedup_keeps_first_name_per_normalized_form() {
    let (_temp, root) = output_dir(&["10.1_abc.json", "10.1abc.json", "10.1_abc.txt", "10.2_x.json"]);

    let preview = dedup_outputs(&root, true).unwrap();
    assert_eq!(preview.removed, vec!["10.1abc.json"]);
    assert!(root.join("10.1abc.json").exists());

    let report = dedup_outputs(&root, false).unwrap();
    assert_eq!(report.kept, 3);
    assert_eq!(report.removed, vec!["10.1abc.json"]);
    assert!(!report.dry_run);
    assert!(!root.join("10.1abc.json").exists());
    assert!(root.join("10.1_abc.json").exists());
    assert!(root.join("10.1_abc.txt").exists());
}

#[test]
fn dedup_table_keeps_first_row_per_doi() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("papers.csv");
    let output = temp.path().join("papers_dedup.csv");
    fs::write(
        &input,
        "DOI,Title,Abstract\n10.1/a,First,one\n10.1/b,Second,two\n10.1/a,Repeat,\"three, again\"\n",
    )
    .unwrap();

    let report = dedup_table(&input, &output, "DOI").unwrap();

    assert_eq!(report.rows_in, 3);
    assert_eq!(report.rows_out, 2);
    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        "DOI,Title,Abstract\n10.1/a,First,one\n10.1/b,Second,two\n"
    );
    assert_matches!(
        dedup_table(&input, &output, "doi"),
        Err(CorpusError::MissingColumns(columns)) if columns == ["doi"]
    );
}

#[test]
fn dedup_table_keeps_ragged_rows() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("papers.csv");
    let output = temp.path().join("papers_dedup.csv");
    fs::write(
        &input,
        "DOI,Title,Abstract\n10.1/a,A,x\n10.1/b,B\n10.1/c,C,z\n10.1/b,B again,y\n",
    )
    .unwrap();

    let report = dedup_table(&input, &output, "DOI").unwrap();

    assert_eq!(report.rows_in, 4);
    assert_eq!(report.rows_out, 3);
    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        "DOI,Title,Abstract\n10.1/a,A,x\n10.1/b,B\n10.1/c,C,z\n"
    );
}

#[test]
fn dedup_table_can_rewrite_its_input() {
    let temp = tempfile::tempdir().unwrap();
    let table = temp.path().join("papers.csv");
    fs::write(&table, "DOI,Title\n10.1/a,A\n10.1/a,A\n10.1/b,B\n").unwrap();

    let report = dedup_table(&table, &table, "DOI").unwrap();

    assert_eq!(report.rows_out, 2);
    assert_eq!(
        fs::read_to_string(&table).unwrap(),
        "DOI,Title\n10.1/a,A\n10.1/b,B\n"
    );
    let leftovers = fs::read_dir(temp.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(".tmp-"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn failed_dedup_leaves_existing_output_untouched() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("papers.csv");
    let output = temp.path().join("papers_dedup.csv");
    fs::write(&input, b"DOI,Title\n10.1/a,A\n10.1/b,\xff\n").unwrap();
    fs::write(&output, "previous\n").unwrap();

    assert_matches!(
        dedup_table(&input, &output, "DOI"),
        Err(CorpusError::Table(_))
    );

    assert_eq!(fs::read_to_string(&output).unwrap(), "previous\n");
}

#[test]
fn audit_lists_outputs_without_a_table_row() {
    let temp = tempfile::tempdir().unwrap();
    let table = temp.path().join("papers.csv");
    fs::write(&table, "DOI,Title,Abstract\n10.1/abc,A,a\n10.2/xyz,B,b\n,C,c\n").unwrap();
    let (_outputs, root) = output_dir(&["10.1_abc.json", "10.9_orphan.txt"]);

    let report = audit(&table, &root).unwrap();

    assert_eq!(report.total_dois, 2);
    assert_eq!(report.total_files, 2);
    assert_eq!(report.unmatched_files, vec!["10.9_orphan"]);
}
