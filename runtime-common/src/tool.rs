//! Tool call payloads.

use serde::{Deserialize, Serialize};

/// One piece of tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    #[serde(rename = "type", default = "default_chunk_type")]
    pub chunk_type: String,
    #[serde(default)]
    pub text: String,
}

fn default_chunk_type() -> String {
    "text".to_string()
}

impl ContentChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            chunk_type: default_chunk_type(),
            text: text.into(),
        }
    }
}

/// Outcome of a tool invocation.
///
/// Failures are carried in `error` rather than raised, so a loop driving
/// several tool calls keeps going when one of them fails. An empty `error`
/// means success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub content: Vec<ContentChunk>,
}

impl ToolCallResult {
    pub const CANCELLED: &'static str = "Tool call was cancelled";
    pub const NOT_AVAILABLE: &'static str = "Tool API not available";
    pub const INVALID_TOOL_NAME: &'static str = "Invalid tool name provided";

    pub fn success(content: Vec<ContentChunk>) -> Self {
        Self {
            error: String::new(),
            content,
        }
    }

    pub fn failure(error: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            content: vec![ContentChunk::text(detail)],
        }
    }

    pub fn cancelled() -> Self {
        Self::failure(Self::CANCELLED, "Tool call was cancelled by user")
    }

    pub fn not_available() -> Self {
        Self::failure(Self::NOT_AVAILABLE, "No tool server is connected")
    }

    pub fn invalid_tool_name() -> Self {
        Self::failure(
            Self::INVALID_TOOL_NAME,
            "Tool name must be a non-empty string",
        )
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        self.error == Self::CANCELLED
    }
}
