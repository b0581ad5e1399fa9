use std::time::Duration;

use assert_matches::assert_matches;
use mockito::{Matcher, Server};

use invasion_corpus::config::{CrossrefSettings, LlmSettings};
use invasion_corpus::crossref::{CrossrefClient, CrossrefHttpClient, WorkMetadata};
use invasion_corpus::domain::Doi;
use invasion_corpus::error::CorpusError;
use invasion_corpus::llm::{ExtractionClient, OpenAiHttpClient, request_extraction};
use invasion_corpus::schema::PaperInput;

const WORK: &str = r#"{
    "status": "ok",
    "message": {
        "DOI": "10.1007/s10530-021-02500-1",
        "title": ["Range expansion of the European green crab"],
        "type": "journal-article",
        "container-title": ["Biological Invasions"],
        "author": [{"given": "Jane", "family": "Doe"}]
    }
}"#;

fn works_path() -> Matcher {
    Matcher::Regex(r"^/works/.+$".to_string())
}

fn crossref_client(server: &Server, max_retries: u32) -> CrossrefHttpClient {
    let settings = CrossrefSettings {
        backoff: Duration::ZERO,
        max_retries,
        ..CrossrefSettings::default()
    };
    CrossrefHttpClient::with_base_url(&settings, &server.url()).unwrap()
}

fn doi() -> Doi {
    "10.1007/s10530-021-02500-1".parse().unwrap()
}

#[test]
fn crossref_retries_after_rate_limit() {
    let mut server = Server::new();
    let limited = server
        .mock("GET", works_path())
        .with_status(429)
        .expect(1)
        .create();
    let found = server
        .mock("GET", works_path())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(WORK)
        .expect(1)
        .create();

    let work = crossref_client(&server, 2).fetch_work(&doi()).unwrap();

    limited.assert();
    found.assert();
    let row = WorkMetadata::from_work(&work);
    assert_eq!(row.title, "Range expansion of the European green crab");
    assert_eq!(row.journal, "Biological Invasions");
}

#[test]
fn crossref_gives_up_after_max_retries() {
    let mut server = Server::new();
    let limited = server
        .mock("GET", works_path())
        .with_status(429)
        .with_body("Too Many Requests")
        .expect(3)
        .create();

    let result = crossref_client(&server, 2).fetch_work(&doi());

    limited.assert();
    assert_matches!(result, Err(CorpusError::CrossrefStatus { status: 429, .. }));
}

#[test]
fn crossref_non_ok_payload_is_an_error() {
    let mut server = Server::new();
    let _mock = server
        .mock("GET", works_path())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status": "failed", "message": null}"#)
        .create();

    let result = crossref_client(&server, 0).fetch_work(&doi());

    assert_matches!(result, Err(CorpusError::CrossrefHttp(message)) if message.contains("failed"));
}

#[test]
fn crossref_not_found_is_reported_without_retry() {
    let mut server = Server::new();
    let missing = server
        .mock("GET", works_path())
        .with_status(404)
        .with_body("Resource not found.")
        .expect(1)
        .create();

    let result = crossref_client(&server, 5).fetch_work(&doi());

    missing.assert();
    assert_matches!(result, Err(CorpusError::CrossrefStatus { status: 404, message }) if message == "Resource not found.");
}

fn llm_client(server: &Server, max_retries: u32) -> OpenAiHttpClient {
    let settings = LlmSettings {
        base_url: server.url(),
        max_retries,
        ..LlmSettings::default()
    };
    OpenAiHttpClient::new(settings, "sk-test").unwrap()
}

fn paper() -> PaperInput {
    PaperInput::TitleAbstract {
        title: "Green crab in Tasmania".to_string(),
        abstract_text: "Carcinus maenas spreads along the coast.".to_string(),
    }
}

#[test]
fn llm_response_content_is_returned_without_fence() {
    let mut server = Server::new();
    let completion = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(serde_json::json!({"model": "gpt-4o"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": "```json\n{\"species\": []}\n```"}}]}"#)
        .expect(1)
        .create();

    let cleaned = request_extraction(&llm_client(&server, 0), &paper()).unwrap();

    completion.assert();
    assert_eq!(cleaned, r#"{"species": []}"#);
}

#[test]
fn llm_empty_choices_is_a_payload_error() {
    let mut server = Server::new();
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices": []}"#)
        .create();

    let result = llm_client(&server, 0).complete("system", "user");

    assert_matches!(result, Err(CorpusError::LlmPayload(_)));
}

#[test]
fn llm_server_error_is_sent_once_by_default() {
    let mut server = Server::new();
    let failing = server
        .mock("POST", "/chat/completions")
        .with_status(500)
        .with_body("upstream failure")
        .expect(1)
        .create();
    let settings = LlmSettings {
        base_url: server.url(),
        ..LlmSettings::default()
    };
    let client = OpenAiHttpClient::new(settings, "sk-test").unwrap();

    let result = client.complete("system", "user");

    failing.assert();
    assert_matches!(
        result,
        Err(CorpusError::LlmStatus { status: 500, message }) if message == "upstream failure"
    );
}

#[test]
fn llm_retries_only_when_configured() {
    let mut server = Server::new();
    let unavailable = server
        .mock("POST", "/chat/completions")
        .with_status(503)
        .expect(1)
        .create();
    let completion = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices": [{"message": {"content": "N/A"}}]}"#)
        .expect(1)
        .create();

    let result = llm_client(&server, 1).complete("system", "user").unwrap();

    unavailable.assert();
    completion.assert();
    assert_eq!(result, "N/A");
}
