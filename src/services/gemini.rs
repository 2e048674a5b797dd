use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use async_trait::async_trait;

use crate::models::{ChatMessage, ChatMode, MediaAttachment, MessageStatus, Role, SourceRef};

use super::gateway::{
    ApiError, GatewayError, GeneratedImage, ModelGateway, ReplyFragment, ReplyStream,
    classify_api_error, classify_http_failure,
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_CHAT_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

/// MIME types the generation API accepts as inline media. Anything else
/// is dropped from the request rather than rejected upstream.
const SUPPORTED_MEDIA_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/heic",
    "image/heif",
];

/// Everything needed to talk to the generation API. The system
/// instruction arrives as an opaque string owned by the embedder.
#[derive(Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub image_model: String,
    pub system_instruction: String,
    pub temperature: f32,
}

impl GatewayConfig {
    pub fn new(api_key: impl Into<String>, system_instruction: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            system_instruction: system_instruction.into(),
            temperature: 0.7,
        }
    }
}

/// Gateway to the Gemini generation API.
pub struct GeminiGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl std::fmt::Debug for GeminiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiGateway")
            .field("api_key", &"***")
            .field("base_url", &self.config.base_url)
            .field("chat_model", &self.config.chat_model)
            .finish()
    }
}

impl GeminiGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self { client, config })
    }

    /// Map the linear history into the API's `contents` structure.
    /// Reserved system messages are filtered; media is only included when
    /// its MIME type is officially supported.
    fn format_history(history: &[ChatMessage]) -> Vec<serde_json::Value> {
        history
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let mut parts = vec![json!({
                    "text": if m.content.is_empty() { " " } else { m.content.as_str() }
                })];
                if let Some(media) = &m.media
                    && SUPPORTED_MEDIA_MIME_TYPES.contains(&media.mime_type.as_str())
                {
                    parts.push(json!({
                        "inlineData": {
                            "mimeType": media.mime_type,
                            "data": media.data,
                        }
                    }));
                }
                json!({
                    "role": match m.role {
                        Role::User => "user",
                        _ => "model",
                    },
                    "parts": parts,
                })
            })
            .collect()
    }

    fn build_chat_request(&self, history: &[ChatMessage], mode: ChatMode) -> serde_json::Value {
        let mut instruction = self.config.system_instruction.clone();
        let addendum = mode.prompt_addendum();
        if !addendum.is_empty() {
            instruction.push_str("\n\n");
            instruction.push_str(addendum);
        }

        let mut body = json!({
            "contents": Self::format_history(history),
            "systemInstruction": { "parts": [{ "text": instruction }] },
            "generationConfig": {
                "temperature": self.config.temperature,
                "thinkingConfig": { "thinkingBudget": mode.thinking_budget() },
            },
        });
        if mode.uses_search() {
            body["tools"] = json!([{ "googleSearch": {} }]);
        }
        body
    }

    fn build_image_request(
        &self,
        prompt: &str,
        source: Option<&MediaAttachment>,
    ) -> serde_json::Value {
        let mut parts = vec![json!({ "text": prompt })];
        if let Some(media) = source {
            parts.push(json!({
                "inlineData": {
                    "mimeType": media.mime_type,
                    "data": media.data,
                }
            }));
        }
        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
        })
    }
}

#[async_trait]
impl ModelGateway for GeminiGateway {
    fn stream_reply(&self, history: Vec<ChatMessage>, mode: ChatMode) -> ReplyStream {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.config.base_url, self.config.chat_model
        );
        let api_key = self.config.api_key.clone();
        let body = self.build_chat_request(&history, mode);
        let client = self.client.clone();

        Box::pin(async_stream::stream! {
            let response = match client
                .post(&url)
                .header("x-goog-api-key", &api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    yield Err(GatewayError::Transport(e));
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                yield Err(classify_http_failure(status.as_u16(), &body));
                return;
            }

            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(GatewayError::Transport(e));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer.drain(..=line_end);

                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload.is_empty() {
                        continue;
                    }

                    match parse_stream_payload(payload) {
                        Ok(Some(fragment)) => yield Ok(fragment),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
            debug!("reply stream finished");
        })
    }

    async fn generate_image(
        &self,
        prompt: String,
        source: Option<MediaAttachment>,
    ) -> Result<GeneratedImage, GatewayError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.image_model
        );
        let body = self.build_image_request(&prompt, source.as_ref());

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(classify_http_failure(status.as_u16(), &text));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Parse(format!("image response: {e}")))?;
        if let Some(error) = parsed.error {
            return Err(classify_api_error(error, status.as_u16()));
        }

        let parts = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default();

        let mut image = None;
        let mut caption = String::new();
        for part in parts {
            if let Some(inline) = part.inline_data {
                image.get_or_insert(MediaAttachment {
                    data: inline.data,
                    mime_type: inline.mime_type,
                });
            } else if let Some(text) = part.text {
                caption.push_str(&text);
            }
        }

        match image {
            Some(image) => Ok(GeneratedImage { image, caption }),
            None => Err(GatewayError::Parse(
                "no image in generation response".to_string(),
            )),
        }
    }
}

/// Parse one SSE `data:` payload into a fragment. Returns `Ok(None)` for
/// chunks that carry nothing worth applying.
fn parse_stream_payload(payload: &str) -> Result<Option<ReplyFragment>, GatewayError> {
    let parsed: GenerateContentResponse = serde_json::from_str(payload)
        .map_err(|e| GatewayError::Parse(format!("stream chunk: {e}")))?;

    if let Some(error) = parsed.error {
        let code = error.code.unwrap_or(0) as u16;
        return Err(classify_api_error(error, code));
    }

    let Some(candidate) = parsed.candidates.into_iter().next() else {
        return Ok(None);
    };

    let mut delta = String::new();
    let mut thinking = false;
    if let Some(content) = candidate.content {
        for part in content.parts {
            if part.thought {
                thinking = true;
            } else if let Some(text) = part.text {
                delta.push_str(&text);
            }
        }
    }

    let sources = candidate
        .grounding_metadata
        .map(|g| {
            g.grounding_chunks
                .into_iter()
                .filter_map(|c| c.web)
                .map(|w| SourceRef {
                    uri: w.uri,
                    title: w.title,
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let fragment = ReplyFragment {
        text_delta: if delta.is_empty() { None } else { Some(delta) },
        sources,
        // Reasoning-only chunks hint at why nothing visible arrived yet.
        status_hint: if thinking { Some(MessageStatus::Thinking) } else { None },
    };

    if fragment.is_empty() {
        Ok(None)
    } else {
        Ok(Some(fragment))
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebSource {
    uri: String,
    #[serde(default)]
    title: String,
}
