//! Transport-agnostic request/response contract. This module defines the
//! shapes a concrete server (HTTP, gRPC, in-process) builds around; it
//! carries no transport, no listener, and no wire codec.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// One inbound chat request. `adapter_name` selects the adapter via the
/// registry; the rest is threaded into a fresh
/// [`crate::types::ProcessingContext`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub adapter_name: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub file_ids: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// The chunk kind a [`ChatChunk`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Text,
    Audio,
    Metadata,
}

/// One unit of a streamed chat response. `content` and `text` are
/// intentionally both present rather than aliased at the type level —
/// callers on either field name read the same value, matching the
/// public contract that treats them as aliases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_type: Option<ChunkType>,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

impl ChatChunk {
    #[must_use]
    pub fn text(text: impl Into<String>, done: bool) -> Self {
        let text = text.into();
        Self {
            content: Some(text.clone()),
            text: Some(text),
            chunk_type: Some(ChunkType::Text),
            done,
            metadata: None,
        }
    }

    #[must_use]
    pub fn metadata_only(metadata: HashMap<String, Value>) -> Self {
        Self {
            text: None,
            content: None,
            chunk_type: Some(ChunkType::Metadata),
            done: false,
            metadata: Some(metadata),
        }
    }
}

/// The contract a concrete pipeline implementation fulfills: run one
/// request end-to-end through capability resolution, the follow-up
/// cache, context retrieval, and formatting, and hand the formatted
/// context (plus accumulated metadata) back for downstream inference.
/// Downstream inference/post-processing is outside this crate.
#[async_trait::async_trait]
pub trait Pipeline: Send + Sync {
    async fn run(&self, request: ChatRequest) -> Result<ChatChunk>;
}

/// Summary returned by the admin reload endpoint, covering the whole
/// adapter set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadAllSummary {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub total: usize,
}

impl From<crate::registry::ReloadSummary> for ReloadAllSummary {
    fn from(summary: crate::registry::ReloadSummary) -> Self {
        Self {
            added: summary.added,
            removed: summary.removed,
            updated: summary.updated,
            total: summary.added + summary.removed + summary.updated + summary.unchanged,
            unchanged: summary.unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_chunk_text_sets_both_aliases() {
        let chunk = ChatChunk::text("hello", true);
        assert_eq!(chunk.text.as_deref(), Some("hello"));
        assert_eq!(chunk.content.as_deref(), Some("hello"));
        assert!(chunk.done);
    }

    #[test]
    fn reload_all_summary_total_counts_every_bucket() {
        let summary = crate::registry::ReloadSummary {
            added: 1,
            removed: 2,
            updated: 3,
            unchanged: 4,
        };
        let all: ReloadAllSummary = summary.into();
        assert_eq!(all.total, 10);
    }
}
