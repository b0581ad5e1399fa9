use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;

use invasion_corpus::config::{
    Config, ConfigLoader, ConfigOverrides, CrossrefSection, LlmSection, PipelineSection,
    resolve_api_key,
};
use invasion_corpus::domain::InputKind;
use invasion_corpus::error::CorpusError;

#[test]
fn empty_config_resolves_to_defaults() {
    let resolved =
        ConfigLoader::resolve_config(Config::default(), &ConfigOverrides::default()).unwrap();
    assert_eq!(resolved.schema_version, 1);
    assert_eq!(resolved.llm.model, "gpt-4o");
    assert_eq!(resolved.llm.base_url, "https://api.openai.com/v1");
    assert_eq!(resolved.llm.temperature, 1.0);
    assert_eq!(resolved.llm.max_tokens, 2048);
    assert_eq!(resolved.llm.max_retries, 0);
    assert_eq!(resolved.pipeline.workers, 1);
    assert_eq!(resolved.pipeline.max_failures, 3);
    assert_eq!(resolved.pipeline.input_kind, InputKind::TitleAbstract);
    assert_eq!(resolved.crossref.doi_column, "doi.value");
    assert_eq!(resolved.crossref.batch_size, 100);
    assert_eq!(resolved.crossref.backoff, Duration::from_secs(12));
}

#[test]
fn overrides_take_precedence_over_file_values() {
    let config = Config {
        schema_version: Some(1),
        llm: LlmSection {
            model: Some("gpt-4o-mini".to_string()),
            max_tokens: Some(4096),
            ..LlmSection::default()
        },
        pipeline: PipelineSection {
            workers: Some(2),
            input_kind: Some(InputKind::FullText),
            ..PipelineSection::default()
        },
        crossref: CrossrefSection {
            backoff_secs: Some(3),
            mailto: Some("lab@example.org".to_string()),
            ..CrossrefSection::default()
        },
    };
    let overrides = ConfigOverrides {
        model: Some("gpt-4.1".to_string()),
        workers: Some(8),
        ..ConfigOverrides::default()
    };

    let resolved = ConfigLoader::resolve_config(config, &overrides).unwrap();
    assert_eq!(resolved.llm.model, "gpt-4.1");
    assert_eq!(resolved.llm.max_tokens, 4096);
    assert_eq!(resolved.pipeline.workers, 8);
    assert_eq!(resolved.pipeline.input_kind, InputKind::FullText);
    assert_eq!(resolved.crossref.backoff, Duration::from_secs(3));
    assert_eq!(resolved.crossref.mailto.as_deref(), Some("lab@example.org"));
}

#[test]
fn config_file_is_read_from_explicit_path() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("corpus.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "llm": {"model": "gpt-4-turbo", "timeout_secs": 30},
            "pipeline": {"max_failures": 5, "input_kind": "full_text"},
            "crossref": {"doi_column": "DOI", "batch_size": 25}
        }"#,
    )
    .unwrap();

    let resolved =
        ConfigLoader::resolve(path.to_str(), &ConfigOverrides::default()).unwrap();
    assert_eq!(resolved.llm.model, "gpt-4-turbo");
    assert_eq!(resolved.llm.timeout, Duration::from_secs(30));
    assert_eq!(resolved.pipeline.max_failures, 5);
    assert_eq!(resolved.pipeline.input_kind, InputKind::FullText);
    assert_eq!(resolved.crossref.doi_column, "DOI");
    assert_eq!(resolved.crossref.batch_size, 25);
}

#[test]
fn missing_explicit_config_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let result = ConfigLoader::resolve(path.to_str(), &ConfigOverrides::default());
    assert_matches!(result, Err(CorpusError::ConfigRead(missing)) if missing == path);
}

#[test]
fn malformed_config_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("corpus.json");
    fs::write(&path, "{ \"llm\": ").unwrap();
    let result = ConfigLoader::resolve(path.to_str(), &ConfigOverrides::default());
    assert_matches!(result, Err(CorpusError::ConfigParse(_)));
}

#[test]
fn invalid_values_are_rejected() {
    let zero_workers = ConfigOverrides {
        workers: Some(0),
        ..ConfigOverrides::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(Config::default(), &zero_workers),
        Err(CorpusError::InvalidConfig(message)) if message.contains("workers")
    );

    let hot = Config {
        llm: LlmSection {
            temperature: Some(3.5),
            ..LlmSection::default()
        },
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(hot, &ConfigOverrides::default()),
        Err(CorpusError::InvalidConfig(message)) if message.contains("temperature")
    );

    let future = Config {
        schema_version: Some(2),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(future, &ConfigOverrides::default()),
        Err(CorpusError::InvalidConfig(_))
    );
}

#[test]
fn explicit_api_key_is_trimmed() {
    assert_eq!(resolve_api_key(Some("  sk-test \n")).unwrap(), "sk-test");
    assert_matches!(resolve_api_key(Some("   ")), Err(CorpusError::MissingApiKey));
}
