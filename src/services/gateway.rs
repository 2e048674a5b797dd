use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{ChatMessage, ChatMode, MediaAttachment, MessageStatus, SourceRef};

/// One incremental unit of a streamed reply: a text delta (possibly
/// empty), citations discovered since the previous fragment, and an
/// optional hint about what the model is doing while silent.
#[derive(Debug, Clone, Default)]
pub struct ReplyFragment {
    pub text_delta: Option<String>,
    pub sources: Vec<SourceRef>,
    pub status_hint: Option<MessageStatus>,
}

impl ReplyFragment {
    pub fn is_empty(&self) -> bool {
        self.text_delta.as_deref().unwrap_or("").is_empty()
            && self.sources.is_empty()
            && self.status_hint.is_none()
    }
}

/// Ordered, finite sequence of reply fragments. Not restartable; each
/// gateway call opens a fresh upstream turn.
pub type ReplyStream = BoxStream<'static, Result<ReplyFragment, GatewayError>>;

/// Result of the non-streaming image-generation operation.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub image: MediaAttachment,
    pub caption: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("generation capacity exhausted: {message}")]
    RateLimited { message: String },

    #[error("malformed upstream response: {0}")]
    Parse(String),
}

impl GatewayError {
    /// Whether the upstream rejected the turn for quota reasons. The
    /// caller surfaces a dedicated remediation message for this case.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GatewayError::RateLimited { .. })
    }
}

/// Error payload the generation API attaches to failed requests and, on
/// occasion, to individual stream chunks.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

const RESOURCE_EXHAUSTED: &str = "RESOURCE_EXHAUSTED";

/// Fold a structured API error into the gateway taxonomy, keeping quota
/// exhaustion distinguishable.
pub(crate) fn classify_api_error(error: ApiError, http_status: u16) -> GatewayError {
    let message = error.message.unwrap_or_else(|| "unknown error".to_string());
    if error.status.as_deref() == Some(RESOURCE_EXHAUSTED)
        || error.code == Some(429)
        || http_status == 429
    {
        GatewayError::RateLimited { message }
    } else {
        GatewayError::Http {
            status: error.code.map(|c| c as u16).unwrap_or(http_status),
            body: message,
        }
    }
}

/// Classify a non-success HTTP response, parsing the body for the
/// structured error when possible.
pub(crate) fn classify_http_failure(status: u16, body: &str) -> GatewayError {
    #[derive(Deserialize)]
    struct ErrorEnvelope {
        error: ApiError,
    }

    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => classify_api_error(envelope.error, status),
        Err(_) if status == 429 => GatewayError::RateLimited {
            message: body.to_string(),
        },
        Err(_) => GatewayError::Http {
            status,
            body: body.to_string(),
        },
    }
}

/// Adapter in front of the external generation API: turns a message
/// history plus a mode into a fragment stream, and exposes the secondary
/// image-generation action under the same failure taxonomy.
#[async_trait]
pub trait ModelGateway: Send + Sync + 'static {
    /// Open a fresh upstream turn over `history` and return the reply as
    /// a lazy fragment sequence. No retries; failures end the stream.
    fn stream_reply(&self, history: Vec<ChatMessage>, mode: ChatMode) -> ReplyStream;

    /// Produce a single image-plus-caption result from a prompt and an
    /// optional source image.
    async fn generate_image(
        &self,
        prompt: String,
        source: Option<MediaAttachment>,
    ) -> Result<GeneratedImage, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_429_maps_to_rate_limited() {
        let error = classify_http_failure(429, "slow down");
        assert!(error.is_rate_limited());
    }

    #[test]
    fn resource_exhausted_status_maps_to_rate_limited() {
        let body = r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED","message":"quota exceeded"}}"#;
        let error = classify_http_failure(400, body);
        assert!(error.is_rate_limited());
        assert!(error.to_string().contains("quota exceeded"));
    }

    #[test]
    fn server_errors_stay_generic() {
        let body = r#"{"error":{"code":500,"status":"INTERNAL","message":"boom"}}"#;
        let error = classify_http_failure(500, body);
        assert!(!error.is_rate_limited());
        assert!(matches!(error, GatewayError::Http { status: 500, .. }));
    }

    #[test]
    fn unparseable_body_keeps_the_http_status() {
        let error = classify_http_failure(503, "<html>bad gateway</html>");
        assert!(matches!(error, GatewayError::Http { status: 503, .. }));
    }

    #[test]
    fn empty_fragment_detection() {
        assert!(ReplyFragment::default().is_empty());
        assert!(
            !ReplyFragment {
                text_delta: Some("hi".to_string()),
                ..Default::default()
            }
            .is_empty()
        );
        assert!(
            !ReplyFragment {
                status_hint: Some(MessageStatus::Searching),
                ..Default::default()
            }
            .is_empty()
        );
    }
}
