//! LLM Client: unified interface for Ollama and OpenAI-compatible backends.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::prompt;
use crate::types::{ClassificationResponse, LlmRequest, LlmResponse};

/// Provider backend for LLM inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmProvider {
    /// Ollama running locally (recommended).
    Ollama {
        /// Server root, e.g. `http://localhost:11434`.
        base_url: String,
    },
    /// OpenAI-compatible chat completions API.
    OpenAiCompatible {
        /// Server root without the `/v1` suffix.
        base_url: String,
        /// Bearer token.
        api_key: String,
    },
    /// No LLM available; every call fails and callers fall back to neutral.
    None,
}

impl LlmProvider {
    /// Build a provider from its config name (`"ollama"`, `"openai"`, `"none"`).
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigError`] for an unknown name, or for `"openai"`
    /// without an API key.
    pub fn from_name(name: &str, base_url: &str, api_key: Option<&str>) -> Result<Self, LlmError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        match name.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama { base_url }),
            "openai" | "openai_compatible" => {
                let api_key = api_key
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| LlmError::ConfigError("openai provider needs an api_key".into()))?;
                Ok(Self::OpenAiCompatible { base_url, api_key: api_key.to_string() })
            }
            "none" | "" => Ok(Self::None),
            other => Err(LlmError::ConfigError(format!("unknown LLM provider '{other}'"))),
        }
    }
}

/// The main LLM client that routes requests to the configured backend.
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    model: String,
    max_retries: u32,
}

impl LlmClient {
    /// Create a new LLM client.
    #[must_use]
    pub fn new(provider: LlmProvider, model: impl Into<String>, max_retries: u32) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: model.into(),
            max_retries,
        }
    }

    /// Create a client with no LLM backend (all calls fail).
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, String::new(), 0)
    }

    /// Model name sent with every request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate a response from the LLM.
    ///
    /// # Errors
    ///
    /// Returns `Err` if no provider is configured, every attempt timed out
    /// ([`LlmError::Timeout`]) or all retries failed otherwise.
    pub async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        match &self.provider {
            LlmProvider::None => Err(LlmError::Unavailable("No LLM provider configured".into())),
            LlmProvider::Ollama { base_url } => self.generate_ollama(base_url, request).await,
            LlmProvider::OpenAiCompatible { base_url, api_key } => {
                self.generate_openai(base_url, api_key, request).await
            }
        }
    }

    /// Classify `message` in the context of the user's earlier `history`.
    ///
    /// # Errors
    ///
    /// Propagates [`generate`](Self::generate) failures and parse failures
    /// from [`prompt::parse_classification`].
    pub async fn classify(
        &self,
        persona_name: &str,
        message: &str,
        history: &[String],
        timeout_ms: u64,
    ) -> Result<ClassificationResponse, LlmError> {
        let (system, user) = prompt::classification_prompt(persona_name, message, history);
        let request = LlmRequest::classification(system, user).with_timeout(timeout_ms);
        let response = self.generate(&request).await?;
        let parsed = prompt::parse_classification(&response.text)?;
        debug!(
            label = %parsed.label,
            intensity = parsed.intensity,
            latency_ms = response.latency_ms,
            "Message classified"
        );
        Ok(parsed)
    }

    /// Generate using Ollama's API.
    async fn generate_ollama(&self, base_url: &str, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let url = format!("{base_url}/api/generate");
        let mut body = json!({
            "model": self.model,
            "prompt": format!("{}\n\n{}", request.system, request.user),
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            }
        });
        if request.json_mode {
            body["format"] = json!("json");
        }

        self.post_with_retries("Ollama", &url, None, &body, request.timeout_ms, |json| {
            (
                json["response"].as_str().unwrap_or("").to_string(),
                json["eval_count"].as_u64().unwrap_or(0),
            )
        })
        .await
    }

    /// Generate using an OpenAI-compatible API.
    async fn generate_openai(
        &self,
        base_url: &str,
        api_key: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse, LlmError> {
        let url = format!("{base_url}/v1/chat/completions");
        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        self.post_with_retries("OpenAI", &url, Some(api_key), &body, request.timeout_ms, |json| {
            (
                json["choices"][0]["message"]["content"].as_str().unwrap_or("").to_string(),
                json["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            )
        })
        .await
    }

    async fn post_with_retries(
        &self,
        backend: &str,
        url: &str,
        bearer: Option<&str>,
        body: &Value,
        timeout_ms: u64,
        extract: impl Fn(&Value) -> (String, u64),
    ) -> Result<LlmResponse, LlmError> {
        let mut last_error = String::new();
        let mut all_timed_out = true;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!(backend, attempt = attempt + 1, of = self.max_retries + 1, "Retrying LLM call");
            }

            let start = Instant::now();
            let mut builder = self
                .http
                .post(url)
                .json(body)
                .timeout(Duration::from_millis(timeout_ms));
            if let Some(key) = bearer {
                builder = builder.bearer_auth(key);
            }
            let result = builder.send().await;
            let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let json: Value = resp
                        .json()
                        .await
                        .map_err(|e| LlmError::ParseError(e.to_string()))?;
                    let (text, tokens) = extract(&json);
                    return Ok(LlmResponse {
                        text,
                        tokens_generated: u32::try_from(tokens).unwrap_or(u32::MAX),
                        latency_ms,
                        model: self.model.clone(),
                    });
                }
                Ok(resp) => {
                    all_timed_out = false;
                    let status = resp.status();
                    last_error = format!("HTTP {status}: {}", resp.text().await.unwrap_or_default());
                    warn!(backend, error = %last_error, "LLM backend returned error");
                }
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() {
                        warn!(backend, timeout_ms, "LLM request timed out");
                    } else {
                        all_timed_out = false;
                        warn!(backend, error = %last_error, "LLM request failed");
                    }
                }
            }
        }

        if all_timed_out {
            return Err(LlmError::Timeout(timeout_ms));
        }
        Err(LlmError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }

    /// Parse a raw LLM response text as structured JSON.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the text is not valid JSON or doesn't match the expected type.
    pub fn parse_structured<T: serde::de::DeserializeOwned>(&self, response: &LlmResponse) -> Result<T, LlmError> {
        serde_json::from_str(&response.text)
            .map_err(|e| LlmError::ParseError(format!("JSON parse error: {e}: raw text: '{}'", response.text)))
    }

    /// Check if the LLM client has a backend configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per accepted connection, `count` times.
    async fn serve(body: String, count: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for _ in 0..count {
                let (mut sock, _) = listener.accept().await.unwrap();
                read_request(&mut sock).await;
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                sock.write_all(resp.as_bytes()).await.unwrap();
                sock.shutdown().await.ok();
            }
        });
        format!("http://{addr}")
    }

    async fn read_request(sock: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = sock.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let len = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower.strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap())
                    })
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + len {
                    return;
                }
            }
        }
    }

    #[test]
    fn provider_names() {
        assert_eq!(
            LlmProvider::from_name("Ollama", "http://x:1/", None).unwrap(),
            LlmProvider::Ollama { base_url: "http://x:1".into() }
        );
        assert_eq!(LlmProvider::from_name("none", "", None).unwrap(), LlmProvider::None);
        assert!(LlmProvider::from_name("openai", "http://x", None).is_err());
        assert!(LlmProvider::from_name("openai", "http://x", Some("k")).is_ok());
        assert!(LlmProvider::from_name("llama", "http://x", None).is_err());
    }

    #[tokio::test]
    async fn none_provider_is_unavailable() {
        let client = LlmClient::none();
        assert!(!client.is_available());
        let err = client.classify("Echo", "hi", &[], 100).await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(_)));
    }

    #[tokio::test]
    async fn classifies_through_ollama() {
        let inner = r#"{"label":"joy","intensity":0.8,"topics":["music"]}"#;
        let body = json!({ "response": inner, "eval_count": 17 }).to_string();
        let base = serve(body, 1).await;
        let client = LlmClient::new(LlmProvider::Ollama { base_url: base }, "tiny", 0);

        let c = client.classify("Echo", "I love this song", &[], 2_000).await.unwrap();
        assert_eq!(c.label, "joy");
        assert_eq!(c.topics, vec!["music"]);
    }

    #[tokio::test]
    async fn classifies_through_openai() {
        let inner = r#"{"label":"anger","intensity":0.4}"#;
        let body = json!({
            "choices": [{ "message": { "content": inner } }],
            "usage": { "completion_tokens": 9 },
        })
        .to_string();
        let base = serve(body, 1).await;
        let client = LlmClient::new(
            LlmProvider::OpenAiCompatible { base_url: base, api_key: "k".into() },
            "gpt",
            0,
        );

        let response = client
            .generate(&LlmRequest::classification("s", "u").with_timeout(2_000))
            .await
            .unwrap();
        assert_eq!(response.tokens_generated, 9);
        assert_eq!(response.model, "gpt");
        let c = prompt::parse_classification(&response.text).unwrap();
        assert_eq!(c.label, "anger");
    }

    #[tokio::test]
    async fn silent_backend_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (sock, _) = listener.accept().await.unwrap();
                held.push(sock);
            }
        });
        let client = LlmClient::new(LlmProvider::Ollama { base_url: format!("http://{addr}") }, "tiny", 1);

        let err = client.classify("Echo", "hello?", &[], 150).await.unwrap_err();
        assert!(err.is_timeout(), "{err}");
    }
}
