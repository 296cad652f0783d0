//! Error types for image generation.

/// Coarse classification of [`ImageGenError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller misuse detected before any network call.
    InvalidInput,
    /// Missing credential or unsupported provider.
    Configuration,
    /// Backend answered with a non-success status.
    BackendRejected,
    /// Backend reported exhausted credits.
    QuotaExceeded,
    /// Backend refused because of rate or concurrency limits.
    RateLimited,
    /// Asynchronous job reached a failed terminal status.
    JobFailed,
    /// Poll budget exhausted or a single call exceeded its bound.
    Timeout,
    /// Network-level failure.
    Transport,
    /// Backend payload could not be understood.
    UnexpectedResponse,
    /// Local filesystem failure.
    Io,
}

/// Errors that can occur during image generation.
#[derive(Debug, thiserror::Error)]
pub enum ImageGenError {
    /// Prompt or negative prompt violates a hard limit.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Credential missing or provider not supported.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// API returned an error response.
    #[error("{provider} API error: {status} - {message}")]
    BackendRejected {
        /// Provider that rejected the request.
        provider: &'static str,
        /// HTTP status code.
        status: u16,
        /// Upstream message, or the raw body when it could not be parsed.
        message: String,
    },

    /// Out of credits.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Too many requests or too many active jobs.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Asynchronous generation job failed upstream.
    #[error("generation job failed: {0}")]
    JobFailed(String),

    /// Polling never reached a terminal status, or a request took too long.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Network or HTTP transport error.
    #[error("network error: {0}")]
    Transport(#[source] reqwest::Error),

    /// Backend returned something we could not interpret.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// I/O error (e.g., saving file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend body was not the JSON shape we expected.
    #[error("unexpected response: malformed JSON ({0})")]
    Json(#[from] serde_json::Error),
}

impl ImageGenError {
    /// Returns the taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::BackendRejected { .. } => ErrorKind::BackendRejected,
            Self::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::JobFailed(_) => ErrorKind::JobFailed,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Transport(_) => ErrorKind::Transport,
            Self::UnexpectedResponse(_) | Self::Json(_) => ErrorKind::UnexpectedResponse,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns true if re-invoking the same request later may succeed.
    ///
    /// Nothing in this crate retries automatically; this is advice for the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimited | ErrorKind::Timeout | ErrorKind::Transport
        )
    }
}

impl From<reqwest::Error> for ImageGenError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(format!("backend call exceeded its time limit ({err})"))
        } else if err.is_decode() {
            Self::UnexpectedResponse(err.to_string())
        } else {
            Self::Transport(err)
        }
    }
}

/// Extracts a human-readable message from an upstream JSON error body.
///
/// Understands `{"message": ...}`, `{"errors": [...]}`, `{"detail": ...}` and
/// `{"name": ...}`. Returns `None` when the body is not JSON or has none of these.
pub(crate) fn upstream_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    if let Some(msg) = value.get("message").and_then(|v| v.as_str()) {
        return Some(msg.to_string());
    }
    if let Some(errors) = value.get("errors").and_then(|v| v.as_array()) {
        let joined: Vec<&str> = errors.iter().filter_map(|e| e.as_str()).collect();
        if !joined.is_empty() {
            return Some(joined.join("; "));
        }
    }
    if let Some(detail) = value.get("detail") {
        return Some(match detail.as_str() {
            Some(s) => s.to_string(),
            None => detail.to_string(),
        });
    }
    value
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Result type alias for image generation operations.
pub type Result<T> = std::result::Result<T, ImageGenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(ImageGenError::RateLimited("busy".into()).is_retryable());
        assert!(ImageGenError::Timeout("poll budget".into()).is_retryable());

        assert!(!ImageGenError::Configuration("no key".into()).is_retryable());
        assert!(!ImageGenError::JobFailed("nsfw".into()).is_retryable());
        assert!(!ImageGenError::QuotaExceeded("credits".into()).is_retryable());
        assert!(!ImageGenError::InvalidInput("too long".into()).is_retryable());
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            ImageGenError::InvalidInput("x".into()).kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            ImageGenError::BackendRejected {
                provider: "stability",
                status: 400,
                message: "bad".into()
            }
            .kind(),
            ErrorKind::BackendRejected
        );
        assert_eq!(
            ImageGenError::UnexpectedResponse("?".into()).kind(),
            ErrorKind::UnexpectedResponse
        );
    }

    #[test]
    fn test_timeout_and_job_failed_read_differently() {
        let timeout = ImageGenError::Timeout("job still pending after 120 polls".into()).to_string();
        let failed = ImageGenError::JobFailed("NSFW content detected".into()).to_string();
        assert!(timeout.contains("timed out"));
        assert!(!failed.contains("timed out"));
        assert!(failed.contains("NSFW content detected"));
    }

    #[test]
    fn test_malformed_json_is_not_retryable() {
        let err: ImageGenError = serde_json::from_str::<serde_json::Value>("<html>")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::UnexpectedResponse);
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("unexpected response"));
    }

    #[test]
    fn test_error_display() {
        let err = ImageGenError::BackendRejected {
            provider: "stability",
            status: 404,
            message: "Not found".into(),
        };
        assert_eq!(err.to_string(), "stability API error: 404 - Not found");

        let err = ImageGenError::QuotaExceeded("Insufficient BFL credits".into());
        assert_eq!(err.to_string(), "quota exceeded: Insufficient BFL credits");
    }

    #[test]
    fn test_upstream_message_variants() {
        assert_eq!(
            upstream_message(r#"{"message": "bad prompt"}"#).as_deref(),
            Some("bad prompt")
        );
        assert_eq!(
            upstream_message(r#"{"name": "bad_request", "errors": ["a", "b"]}"#).as_deref(),
            Some("a; b")
        );
        assert_eq!(
            upstream_message(r#"{"detail": "Invalid key"}"#).as_deref(),
            Some("Invalid key")
        );
        assert_eq!(
            upstream_message(r#"{"name": "content_moderation"}"#).as_deref(),
            Some("content_moderation")
        );
        assert!(upstream_message("<html>oops</html>").is_none());
        assert!(upstream_message(r#"{"other": 1}"#).is_none());
    }
}
