use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::instrument;

use wisp_core::errors::ProviderError;
use wisp_core::provider::{ChunkStream, ParsedResponse, Provider, ProviderRequest};

use crate::sse::SseChunkStream;
use crate::wire;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// The closed set of supported provider families, resolved once at
/// configuration time. Kinds differ only in auth header shape; all speak the
/// chat-completions wire format at the configured endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAiCompatible,
    Anthropic,
    Gemini,
    Custom,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAiCompatible => "openai-compatible",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai-compatible" | "openai" => Ok(Self::OpenAiCompatible),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            "custom" => Ok(Self::Custom),
            other => Err(format!(
                "unknown provider kind '{other}' (expected openai-compatible, anthropic, gemini, or custom)"
            )),
        }
    }
}

/// HTTP adapter for every provider kind.
pub struct HttpProvider {
    client: Client,
    kind: ProviderKind,
    endpoint: String,
    api_key: SecretString,
    model: String,
    request_timeout: Duration,
}

impl HttpProvider {
    pub fn new(
        kind: ProviderKind,
        endpoint: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            kind,
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            request_timeout,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    fn build_request(&self, request: &ProviderRequest, stream: bool) -> reqwest::RequestBuilder {
        let body = wire::build_request_body(request, stream);
        let mut req = self
            .client
            .post(self.chat_url())
            .timeout(self.request_timeout)
            .header("content-type", "application/json")
            .header("accept", "application/json");

        req = match self.kind {
            ProviderKind::OpenAiCompatible | ProviderKind::Custom => req.header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            ),
            ProviderKind::Anthropic => req
                .header("x-api-key", self.api_key.expose_secret())
                .header("anthropic-version", "2023-06-01"),
            ProviderKind::Gemini => req.header("x-goog-api-key", self.api_key.expose_secret()),
        };

        req.json(&body)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            return ProviderError::Timeout(self.request_timeout);
        }
        let message = source_chain(&e);
        if e.is_connect() {
            classify_connect_error(&message)
        } else {
            ProviderError::Network(message)
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, request), fields(provider = %self.kind, model = %self.model))]
    async fn complete(&self, request: &ProviderRequest) -> Result<ParsedResponse, ProviderError> {
        let resp = self
            .build_request(request, false)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        wire::parse_response(&body)
    }

    #[instrument(skip(self, request), fields(provider = %self.kind, model = %self.model))]
    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream, ProviderError> {
        let resp = self
            .build_request(request, true)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        Ok(Box::pin(SseChunkStream::new(resp.bytes_stream())))
    }
}

/// Distinguish the fatal connect classes the turn loop must propagate from
/// the recoverable rest.
fn classify_connect_error(message: &str) -> ProviderError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("dns")
        || lower.contains("resolve")
        || lower.contains("name or service not known")
        || lower.contains("no such host")
    {
        ProviderError::DnsFailure(message.to_string())
    } else if lower.contains("connection refused") {
        ProviderError::ConnectionRefused(message.to_string())
    } else {
        ProviderError::Network(message.to_string())
    }
}

fn source_chain(e: &dyn std::error::Error) -> String {
    let mut parts = vec![e.to_string()];
    let mut current = e.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}
