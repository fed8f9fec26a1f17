//! Upstream completion API seam.
//!
//! The handler only sees `CompletionBackend`; the production implementation
//! lives in [`openai`]. Decoding of the loosely structured reply is kept here
//! as plain data plus one pure function so it can be tested without a
//! network.

use serde::{Deserialize, Serialize};

pub mod openai;

pub use self::openai::OpenAiClient;

/// Payload posted to the completion endpoint.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct UpstreamRequest<'a> {
    pub model: &'a str,
    pub instructions: &'a str,
    pub input: &'a str,
    pub max_output_tokens: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("{0}")]
    Transport(String),
    #[error("upstream request timed out")]
    Timeout,
    /// Non-success status; `body` is the upstream's raw error text.
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode upstream response: {0}")]
    Decode(String),
    #[error("failed to build upstream client: {0}")]
    Client(String),
}

#[async_trait::async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &UpstreamRequest<'_>)
        -> Result<UpstreamOutput, UpstreamError>;
}

/// Kind tag of a content block. Only textual kinds contribute to the raw text.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    OutputText,
    Text,
    #[default]
    #[serde(other)]
    Other,
}

impl BlockKind {
    pub fn is_textual(self) -> bool {
        matches!(self, BlockKind::OutputText | BlockKind::Text)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ContentBlock {
    #[serde(rename = "type", default)]
    pub kind: BlockKind,
    #[serde(default)]
    pub text: Option<String>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::OutputText,
            text: Some(text.into()),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
struct OutputItem {
    #[serde(default)]
    content: Option<Vec<ContentBlock>>,
}

/// Wire envelope of a successful completion response. Unknown fields are
/// ignored.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ResponseEnvelope {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Option<Vec<OutputItem>>,
}

/// Either the convenience text field, or every content block across all
/// output items, flattened in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamOutput {
    DirectText(String),
    BlockList(Vec<ContentBlock>),
}

impl From<ResponseEnvelope> for UpstreamOutput {
    fn from(envelope: ResponseEnvelope) -> Self {
        match envelope.output_text {
            Some(text) if !text.is_empty() => UpstreamOutput::DirectText(text),
            _ => UpstreamOutput::BlockList(
                envelope
                    .output
                    .unwrap_or_default()
                    .into_iter()
                    .flat_map(|item| item.content.unwrap_or_default())
                    .collect(),
            ),
        }
    }
}

impl UpstreamOutput {
    pub fn from_json(body: &str) -> Result<Self, UpstreamError> {
        serde_json::from_str::<ResponseEnvelope>(body)
            .map(Self::from)
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

/// Collapse an upstream output into the single raw string handed to the JSON
/// parser. Textual blocks keep their order and are joined with `\n`; a
/// textual block without text contributes an empty line.
pub fn extract_raw_text(output: &UpstreamOutput) -> String {
    match output {
        UpstreamOutput::DirectText(text) => text.clone(),
        UpstreamOutput::BlockList(blocks) => blocks
            .iter()
            .filter(|b| b.kind.is_textual())
            .map(|b| b.text.as_deref().unwrap_or(""))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
