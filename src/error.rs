use std::fmt;

/// Stage of decoding at which a response body was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeStage {
    /// The HTTP body itself, or its `{ success, data, error }` envelope.
    Body,
    /// The JSON document carried as a string inside the `analysis` field.
    NestedAnalysis,
}

impl DecodeStage {
    fn label(&self) -> &'static str {
        match self {
            DecodeStage::Body => "response body",
            DecodeStage::NestedAnalysis => "nested analysis document",
        }
    }
}

/// Every failure a view can end up showing.
#[derive(Clone, Debug, PartialEq)]
pub enum FetchError {
    NetworkUnavailable(String),
    HttpStatus { code: u16, detail: Option<String> },
    MalformedResponse { stage: DecodeStage, detail: String },
    TransformPrecondition(String),
}

impl FetchError {
    pub fn http_status(code: u16) -> Self {
        FetchError::HttpStatus { code, detail: None }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        FetchError::MalformedResponse {
            stage: DecodeStage::Body,
            detail: detail.into(),
        }
    }

    pub fn nested(detail: impl Into<String>) -> Self {
        FetchError::MalformedResponse {
            stage: DecodeStage::NestedAnalysis,
            detail: detail.into(),
        }
    }

    pub fn precondition(detail: impl Into<String>) -> Self {
        FetchError::TransformPrecondition(detail.into())
    }

    /// Only transport-level failures are worth another attempt; a payload that
    /// failed to decode will fail the same way next time.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::NetworkUnavailable(_) => true,
            FetchError::HttpStatus { code, .. } => is_retryable_http_status(*code),
            FetchError::MalformedResponse { .. } | FetchError::TransformPrecondition(_) => false,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            FetchError::NetworkUnavailable(_) => "network_unavailable",
            FetchError::HttpStatus { .. } => "http_status",
            FetchError::MalformedResponse { .. } => "malformed_response",
            FetchError::TransformPrecondition(_) => "transform_precondition",
        }
    }

    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_decode() {
            return FetchError::malformed(err.to_string());
        }
        if let Some(status) = err.status() {
            return FetchError::http_status(status.as_u16());
        }
        FetchError::NetworkUnavailable(err.to_string())
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::NetworkUnavailable(msg) => write!(f, "backend unreachable: {msg}"),
            FetchError::HttpStatus { code, detail } => match detail {
                Some(detail) if !detail.is_empty() => write!(f, "HTTP {code}: {detail}"),
                _ => write!(f, "HTTP {code}"),
            },
            FetchError::MalformedResponse { stage, detail } => {
                write!(f, "malformed {}: {detail}", stage.label())
            }
            FetchError::TransformPrecondition(msg) => write!(f, "unexpected payload: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::malformed(e.to_string())
    }
}

fn is_retryable_http_status(code: u16) -> bool {
    matches!(code, 408 | 429 | 500 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        assert!(FetchError::http_status(500).is_retryable());
        assert!(FetchError::http_status(503).is_retryable());
        assert!(FetchError::http_status(429).is_retryable());
        assert!(!FetchError::http_status(404).is_retryable());
        assert!(!FetchError::http_status(400).is_retryable());
    }

    #[test]
    fn decode_failures_are_permanent() {
        assert!(!FetchError::malformed("eof").is_retryable());
        assert!(!FetchError::nested("expected value").is_retryable());
        assert!(!FetchError::precondition("missing Close").is_retryable());
        assert!(FetchError::NetworkUnavailable("refused".to_string()).is_retryable());
    }

    #[test]
    fn display_keeps_the_reason() {
        let err = FetchError::HttpStatus {
            code: 503,
            detail: Some("ETF data not available".to_string()),
        };
        assert_eq!(err.to_string(), "HTTP 503: ETF data not available");
        assert_eq!(FetchError::http_status(500).to_string(), "HTTP 500");
        let nested = FetchError::nested("expected `,`");
        assert!(nested.to_string().contains("nested analysis document"));
    }
}
