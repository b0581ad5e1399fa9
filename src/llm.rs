use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LlmSettings;
use crate::error::CorpusError;
use crate::schema::{self, PaperInput};

/// A remote text-generation service.
pub trait ExtractionClient: Send + Sync {
    fn complete(&self, system: &str, user: &str) -> Result<String, CorpusError>;
}

/// Sends one paper with the shared instructions and returns the response
/// with any code fence removed.
pub fn request_extraction<C: ExtractionClient + ?Sized>(
    client: &C,
    input: &PaperInput,
) -> Result<String, CorpusError> {
    let raw = client.complete(schema::SYSTEM_INSTRUCTIONS, &input.user_message())?;
    Ok(schema::clean_response(&raw))
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAiHttpClient {
    client: Client,
    settings: LlmSettings,
}

impl OpenAiHttpClient {
    pub fn new(settings: LlmSettings, api_key: &str) -> Result<Self, CorpusError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("invasion-corpus/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CorpusError::LlmHttp(err.to_string()))?,
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| CorpusError::InvalidConfig("API key is not a valid header".to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| CorpusError::LlmHttp(err.to_string()))?;
        Ok(Self { client, settings })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    fn handle_status(response: Response) -> Result<Response, CorpusError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "LLM request failed".to_string());
        Err(CorpusError::LlmStatus { status, message })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, CorpusError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const BASE_DELAY_MS: u64 = 1000;
        let max_retries = self.settings.max_retries as usize;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < max_retries && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        warn!(status, attempt, delay_ms = delay, "retrying LLM request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < max_retries && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        warn!(error = %err, attempt, delay_ms = delay, "retrying LLM request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(CorpusError::LlmHttp(err.to_string()));
                }
            }
        }
    }
}

impl ExtractionClient for OpenAiHttpClient {
    fn complete(&self, system: &str, user: &str) -> Result<String, CorpusError> {
        let url = self.completions_url();
        let request = ChatRequest {
            model: &self.settings.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            top_p: self.settings.top_p,
            frequency_penalty: self.settings.frequency_penalty,
            presence_penalty: self.settings.presence_penalty,
        };

        let start = std::time::Instant::now();
        let response = self.send_with_retries(|| self.client.post(&url).json(&request))?;
        let response = Self::handle_status(response)?;
        let payload: ChatResponse = response
            .json()
            .map_err(|err| CorpusError::LlmPayload(err.to_string()))?;
        debug!(
            model = %self.settings.model,
            latency_ms = start.elapsed().as_millis() as u64,
            "llm.response"
        );

        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CorpusError::LlmPayload("response contained no choices".to_string()))
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fenced;

    impl ExtractionClient for Fenced {
        fn complete(&self, system: &str, user: &str) -> Result<String, CorpusError> {
            assert!(system.contains("invasion biology"));
            assert!(user.contains("Title: T"));
            Ok("```json\n{\"species\": []}\n```".to_string())
        }
    }

    #[test]
    fn request_extraction_cleans_fence() {
        let input = PaperInput::TitleAbstract {
            title: "T".to_string(),
            abstract_text: "A".to_string(),
        };
        let cleaned = request_extraction(&Fenced, &input).unwrap();
        assert_eq!(cleaned, "{\"species\": []}");
    }

    #[test]
    fn completions_url_joins_base() {
        let settings = LlmSettings {
            base_url: "http://localhost:8080/v1/".to_string(),
            ..LlmSettings::default()
        };
        let client = OpenAiHttpClient::new(settings, "sk-test").unwrap();
        assert_eq!(
            client.completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn request_serializes_both_messages() {
        let request = ChatRequest {
            model: "gpt-4o",
            messages: [
                ChatMessage {
                    role: "system",
                    content: "s",
                },
                ChatMessage {
                    role: "user",
                    content: "u",
                },
            ],
            temperature: 1.0,
            max_tokens: 2048,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "u");
        assert_eq!(value["max_tokens"], 2048);
    }
}
