//! Hosted API backend: builds HTTP requests and extracts the reply text for
//! both OpenAI-compatible and Anthropic APIs.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{BackendError, Completion, GenerationBackend};
use crate::settings::{ApiProvider, GenerationSettings};

pub const BACKEND_NAME: &str = "openai-api";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const TEMPERATURE: f64 = 0.3;

/// Resolved provider details ready for making an API call.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub provider: ApiProvider,
}

impl ResolvedProvider {
    /// Resolve settings into concrete URL / key / model values.
    ///
    /// # Errors
    /// Returns an error string if the API key is missing.
    pub fn from_settings(settings: &GenerationSettings) -> Result<Self, String> {
        let api_key = settings
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or("OPENAI_API_KEY is required for the openai-api backend")?
            .to_string();

        let url = match settings.provider {
            ApiProvider::Anthropic => "https://api.anthropic.com/v1/messages".to_string(),
            ApiProvider::OpenAi => {
                let base = settings
                    .base_url
                    .as_deref()
                    .unwrap_or("https://api.openai.com/v1");
                format!("{}/chat/completions", base.trim_end_matches('/'))
            }
        };
        Ok(Self {
            url,
            api_key,
            model: settings.api_model(),
            provider: settings.provider,
        })
    }
}

/// Build the HTTP request for one system + user exchange.
pub fn build_request(
    client: &reqwest::Client,
    provider: &ResolvedProvider,
    system_prompt: &str,
    user_content: &str,
) -> reqwest::RequestBuilder {
    match provider.provider {
        ApiProvider::Anthropic => {
            let body = serde_json::json!({
                "model": provider.model,
                "max_tokens": 4096,
                "temperature": TEMPERATURE,
                "system": system_prompt,
                "messages": [{"role": "user", "content": user_content}],
            });
            client
                .post(&provider.url)
                .header("x-api-key", &provider.api_key)
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
                .json(&body)
        }
        ApiProvider::OpenAi => {
            let body = serde_json::json!({
                "model": provider.model,
                "temperature": TEMPERATURE,
                "response_format": {"type": "json_object"},
                "messages": [
                    {"role": "system", "content": system_prompt},
                    {"role": "user", "content": user_content},
                ],
            });
            client
                .post(&provider.url)
                .header("Authorization", format!("Bearer {}", provider.api_key))
                .header("content-type", "application/json")
                .json(&body)
        }
    }
}

/// Pull the reply text out of a provider response.
///
/// # Errors
/// Returns an error string when the response has no text.
pub fn parse_response(provider: ApiProvider, json: &Value) -> Result<String, String> {
    match provider {
        ApiProvider::Anthropic => {
            let text = json
                .get("content")
                .and_then(Value::as_array)
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                        .filter_map(|b| b.get("text").and_then(Value::as_str))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();
            if text.is_empty() {
                Err("No text content in Anthropic response".to_string())
            } else {
                Ok(text)
            }
        }
        ApiProvider::OpenAi => {
            let choice = json
                .get("choices")
                .and_then(Value::as_array)
                .and_then(|arr| arr.first())
                .ok_or("No choices in OpenAI response")?;
            choice
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| "No message content in OpenAI choice".to_string())
        }
    }
}

pub struct ApiBackend {
    client: reqwest::Client,
    provider: ResolvedProvider,
}

impl ApiBackend {
    pub fn new(provider: ResolvedProvider) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, provider }
    }
}

#[async_trait]
impl GenerationBackend for ApiBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn complete(&self, system: &str, user_payload: &Value) -> Result<Completion, BackendError> {
        let response = build_request(
            &self.client,
            &self.provider,
            system,
            &user_payload.to_string(),
        )
        .send()
        .await
        .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        let json: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Response(e.to_string()))?;
        let text = parse_response(self.provider.provider, &json).map_err(BackendError::Response)?;
        Ok(Completion {
            text,
            model: self.provider.model.clone(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(provider: ApiProvider) -> GenerationSettings {
        GenerationSettings {
            provider,
            api_key: Some("sk-test".into()),
            ..GenerationSettings::default()
        }
    }

    #[test]
    fn resolves_urls_and_models() {
        let mut s = settings(ApiProvider::OpenAi);
        s.base_url = Some("http://localhost:8080/v1/".into());
        let p = ResolvedProvider::from_settings(&s).unwrap();
        assert_eq!(p.url, "http://localhost:8080/v1/chat/completions");
        assert_eq!(p.model, "gpt-4.1-mini");

        let p = ResolvedProvider::from_settings(&settings(ApiProvider::Anthropic)).unwrap();
        assert_eq!(p.url, "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn missing_key_is_an_error() {
        let s = GenerationSettings::default();
        assert!(ResolvedProvider::from_settings(&s).is_err());
    }

    #[test]
    fn openai_request_asks_for_json_object() {
        let p = ResolvedProvider::from_settings(&settings(ApiProvider::OpenAi)).unwrap();
        let request = build_request(&reqwest::Client::new(), &p, "sys", "{}")
            .build()
            .unwrap();
        let body: Value =
            serde_json::from_slice(request.body().and_then(|b| b.as_bytes()).unwrap()).unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["temperature"], 0.3);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(
            request.headers()["authorization"].to_str().unwrap(),
            "Bearer sk-test"
        );
    }

    #[test]
    fn parses_both_providers() {
        let oai = json!({"choices": [{"message": {"content": "{\"commands\": []}"}}]});
        assert_eq!(
            parse_response(ApiProvider::OpenAi, &oai).unwrap(),
            "{\"commands\": []}"
        );
        let anthropic = json!({"content": [
            {"type": "text", "text": "{\"commands\":"},
            {"type": "text", "text": "[]}"}
        ]});
        assert_eq!(
            parse_response(ApiProvider::Anthropic, &anthropic).unwrap(),
            "{\"commands\":\n[]}"
        );
        assert!(parse_response(ApiProvider::OpenAi, &json!({"choices": []})).is_err());
    }
}
