use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Typed error hierarchy for provider calls.
///
/// Recoverable errors are folded into a renderable turn result so the
/// conversation continues; fatal errors propagate to the caller.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProviderError {
    // Recoverable: the turn degrades to an error reply
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("network error: {0}")]
    Network(String),

    // Fatal: propagated
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("dns resolution failed: {0}")]
    DnsFailure(String),
    #[error("programming error: {0}")]
    Programming(String),
}

impl ProviderError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused(_) | Self::DnsFailure(_) | Self::Programming(_)
        )
    }

    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }

    /// Short classification string for logging and event payloads.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthRejected(_) => "auth_rejected",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::Timeout(_) => "timeout",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Network(_) => "network_error",
            Self::ConnectionRefused(_) => "connection_refused",
            Self::DnsFailure(_) => "dns_failure",
            Self::Programming(_) => "programming_error",
        }
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Classify an HTTP status code into the appropriate variant.
    ///
    /// 4xx outside auth/rate-limit means the request we built is wrong, which
    /// is a programming error, not a provider hiccup.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthRejected(body),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::ServerError { status, body },
            _ => Self::Programming(format!("unexpected status {status}: {body}")),
        }
    }
}

/// Lightweight error info carried on turn results and event payloads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

impl From<&ProviderError> for ErrorInfo {
    fn from(e: &ProviderError) -> Self {
        Self {
            kind: e.error_kind().to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(ProviderError::AuthRejected("bad key".into()).is_recoverable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_recoverable());
        assert!(ProviderError::ServerError { status: 500, body: "err".into() }.is_recoverable());
        assert!(ProviderError::Timeout(Duration::from_secs(60)).is_recoverable());
        assert!(ProviderError::StreamInterrupted("eof".into()).is_recoverable());
        assert!(ProviderError::Network("reset".into()).is_recoverable());
    }

    #[test]
    fn fatal_classification() {
        assert!(ProviderError::ConnectionRefused("127.0.0.1:1".into()).is_fatal());
        assert!(ProviderError::DnsFailure("no such host".into()).is_fatal());
        assert!(ProviderError::Programming("bad request body".into()).is_fatal());
    }

    #[test]
    fn from_status_mapping() {
        assert!(matches!(
            ProviderError::from_status(401, "unauthorized".into()),
            ProviderError::AuthRejected(_)
        ));
        assert!(matches!(
            ProviderError::from_status(403, "forbidden".into()),
            ProviderError::AuthRejected(_)
        ));
        assert!(matches!(
            ProviderError::from_status(429, "slow down".into()),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            ProviderError::from_status(500, "internal".into()),
            ProviderError::ServerError { status: 500, .. }
        ));
        assert!(ProviderError::from_status(400, "bad request".into()).is_fatal());
    }

    #[test]
    fn suggested_delay_only_for_rate_limit() {
        let rl = ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(rl.suggested_delay(), Some(Duration::from_secs(5)));

        let se = ProviderError::ServerError { status: 502, body: "bad gateway".into() };
        assert_eq!(se.suggested_delay(), None);
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(ProviderError::DnsFailure("x".into()).error_kind(), "dns_failure");
        assert_eq!(
            ProviderError::RateLimited { retry_after: None }.error_kind(),
            "rate_limited"
        );
        assert_eq!(ProviderError::Network("x".into()).error_kind(), "network_error");
    }

    #[test]
    fn error_info_from_provider_error() {
        let err = ProviderError::Timeout(Duration::from_secs(30));
        let info = ErrorInfo::from(&err);
        assert_eq!(info.kind, "timeout");
        assert!(info.message.contains("30"));
    }
}
