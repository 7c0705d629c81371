//! Status records emitted by long-running operations.
//!
//! A progress stream is finite and consumed once by a single subscriber.
//! Each event serializes to one JSON object tagged by `status`; `to_sse`
//! frames it for an event-stream transport.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub total: usize,
    pub indexed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProgressEvent {
    LoadingModel {
        model_id: String,
        total: usize,
    },
    Starting {
        model_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<usize>,
    },
    Indexing {
        current: usize,
        total: usize,
        file: String,
    },
    FileError {
        file: String,
        error: String,
        current: usize,
        total: usize,
    },
    Complete {
        model_id: String,
        #[serde(flatten)]
        summary: Option<IndexSummary>,
    },
    Error {
        error: String,
    },
}

impl ProgressEvent {
    /// `complete` and `error` end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// `data: <json>\n\n`
    pub fn to_sse(&self) -> serde_json::Result<String> {
        Ok(format!("data: {}\n\n", self.to_json()?))
    }
}
