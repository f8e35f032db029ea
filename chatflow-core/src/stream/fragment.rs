use serde::Deserialize;

use crate::model::{Role, Usage};

// ---- Wire structs for the incremental-chunk schema (minimal) ----
//
// Every field defaults so a partial shape still parses; a server that
// omits `choices` entirely produces a chunk with nothing to forward, not
// a decode failure.

#[derive(Debug, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    /// Endpoints that report streaming usage put it on the final chunk.
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: DeltaFragment,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One incremental delta. Transient: consumed by the session the moment
/// it is decoded, never persisted.
#[derive(Debug, Default, Deserialize)]
pub struct DeltaFragment {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Parse one data-event payload. A failure here is expected from flaky
/// servers; callers report it and drop the event rather than failing the
/// session.
pub fn decode_chunk(payload: &str) -> Result<ChatChunk, serde_json::Error> {
    serde_json::from_str(payload)
}

impl ChatChunk {
    // The protocol allows several choices per chunk; this client reads
    // only choice index 0. Single-choice simplification.
    fn primary(&self) -> Option<&ChunkChoice> {
        self.choices.iter().find(|c| c.index == 0)
    }

    pub fn delta_content(&self) -> Option<&str> {
        self.primary().and_then(|c| c.delta.content.as_deref())
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.primary().and_then(|c| c.finish_reason.as_deref())
    }
}
