use crate::request::ValidationError;
use reqwest::header::HeaderMap;
use thiserror::Error;

/// Error type for every client operation.
#[derive(Error, Debug)]
pub enum Error {
    /// Request body names a different model than the one the client is bound to.
    #[error("request model does not match: client is bound to {expected}, request is for {actual}")]
    ModelMismatch { expected: String, actual: String },

    /// The local rolling budget cannot absorb this call. Nothing was sent.
    #[error(
        "rate limit reached for {endpoint} (input {input_token_len} tokens, estimated output {estimated_output_len} tokens)"
    )]
    RateLimitExceeded {
        endpoint: String,
        input_token_len: u32,
        estimated_output_len: u32,
    },

    /// Non-2xx response from the upstream API.
    #[error("HTTP {status}: {message}")]
    Api {
        status: u16,
        message: String,
        headers: HeaderMap,
    },

    /// Request or connection timeout.
    #[error("timeout")]
    Timeout,

    /// HTTP/network error.
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// No response shape is known for this endpoint and method.
    #[error("no matching response model for {method} {endpoint}")]
    UnsupportedOperation { endpoint: String, method: String },

    /// Missing reference data or an unusable setting.
    #[error("config: {0}")]
    Config(String),

    /// Missing API key.
    #[error("missing API key")]
    MissingApiKey,

    /// Request body failed validation.
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// JSON payload did not match the expected shape.
    #[error("parse: {0}")]
    Parse(String),

    /// Writing a redirected response body failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if the pipeline should retry after this error.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Api { .. } | Error::Timeout => true,
            Error::Http(e) => !e.is_builder(),
            _ => false,
        }
    }

    /// Create an API error from status, message and response headers.
    pub fn api(status: u16, message: impl Into<String>, headers: HeaderMap) -> Self {
        Self::Api {
            status,
            message: message.into(),
            headers,
        }
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// HTTP status for upstream errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::api(503, "unavailable", HeaderMap::new()).is_retryable());
        assert!(Error::api(400, "bad request", HeaderMap::new()).is_retryable());
        assert!(Error::Timeout.is_retryable());

        assert!(!Error::ModelMismatch {
            expected: "a".into(),
            actual: "b".into()
        }
        .is_retryable());
        assert!(!Error::RateLimitExceeded {
            endpoint: "chat/completions".into(),
            input_token_len: 1,
            estimated_output_len: 2,
        }
        .is_retryable());
        assert!(!Error::Config("missing".into()).is_retryable());
        assert!(!Error::parse("bad json").is_retryable());
    }

    #[test]
    fn test_rate_limit_message_is_actionable() {
        let err = Error::RateLimitExceeded {
            endpoint: "POST chat/completions".into(),
            input_token_len: 120,
            estimated_output_len: 512,
        };
        let msg = err.to_string();
        assert!(msg.contains("120"));
        assert!(msg.contains("512"));
        assert!(msg.contains("chat/completions"));
    }

    #[test]
    fn test_api_status() {
        let err = Error::api(429, "slow down", HeaderMap::new());
        assert_eq!(err.status(), Some(429));
        assert_eq!(err.to_string(), "HTTP 429: slow down");
        assert_eq!(Error::Timeout.status(), None);
    }
}
