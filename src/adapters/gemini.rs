//! Gemini `generateContent` adapter for reply generation.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{GenerationError, GenerationRequest, Generator};

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

const TEMPERATURE: f32 = 0.7;
const MAX_OUTPUT_TOKENS: u32 = 256;

/// Configuration for the Gemini client
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

/// Gemini REST client
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl GeminiClient {
    /// Create a new client; fails only if the HTTP client cannot be built
    pub fn new(config: GeminiConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerationError::Adapter(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn generate_content_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            self.config.model
        )
    }

    fn request_body(request: &GenerationRequest) -> serde_json::Value {
        serde_json::json!({
            "systemInstruction": {
                "parts": [{ "text": request.system_instruction }]
            },
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.user_prompt() }]
            }],
            "generationConfig": {
                "temperature": TEMPERATURE,
                "maxOutputTokens": MAX_OUTPUT_TOKENS,
            }
        })
    }
}

fn classify_transport(error: reqwest::Error) -> GenerationError {
    if error.is_timeout() {
        GenerationError::Timeout
    } else {
        GenerationError::Adapter(error.to_string())
    }
}

#[async_trait]
impl Generator for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(self.generate_content_url())
            .query(&[("key", self.config.api_key.as_str())])
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            warn!(status = status.as_u16(), "Gemini rejected the API key");
            return Err(GenerationError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(GenerationError::Adapter(format!(
                "status {}: {}",
                status.as_u16(),
                message
            )));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(classify_transport)?;
        let text: String = parsed
            .candidates
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(GenerationError::Empty);
        }

        debug!(chars = text.len(), "Gemini returned text");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventKind;
    use httpmock::prelude::*;

    fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new(GeminiConfig {
            api_base: server.base_url(),
            api_key: "test-key".to_string(),
            model: "gemini-test".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_generate_content_url() {
        let client = GeminiClient::new(GeminiConfig {
            api_base: "https://example.test/v1beta/".to_string(),
            api_key: "k".to_string(),
            model: "gemini-2.0-flash".to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        assert_eq!(
            client.generate_content_url(),
            "https://example.test/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[tokio::test]
    async fn test_generate_joins_candidate_parts() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/models/gemini-test:generateContent")
                .query_param("key", "test-key");
            then.status(200).json_body(serde_json::json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "We're open " }, { "text": "11 to 8!" }] }
                }]
            }));
        });

        let request = GenerationRequest::new("persona", "hours?", EventKind::Comment);
        let text = client_for(&server).generate(&request).await.unwrap();

        assert_eq!(text, "We're open 11 to 8!");
        mock.assert();
    }

    #[tokio::test]
    async fn test_generate_classifies_failures() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).body_includes("unauthorized please");
            then.status(403).body("{}");
        });
        server.mock(|when, then| {
            when.method(POST).body_includes("no candidates");
            then.status(200).json_body(serde_json::json!({ "candidates": [] }));
        });
        server.mock(|when, then| {
            when.method(POST).body_includes("server trouble");
            then.status(500)
                .json_body(serde_json::json!({ "error": { "message": "backend down" } }));
        });

        let client = client_for(&server);
        let ask = |text: &str| GenerationRequest::new("persona", text, EventKind::Message);

        assert_eq!(
            client.generate(&ask("unauthorized please")).await,
            Err(GenerationError::Unauthorized)
        );
        assert_eq!(
            client.generate(&ask("no candidates")).await,
            Err(GenerationError::Empty)
        );
        assert_eq!(
            client.generate(&ask("server trouble")).await,
            Err(GenerationError::Adapter("status 500: backend down".to_string()))
        );
    }
}
