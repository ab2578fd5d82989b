//! Progressive log chunks

use serde::{Deserialize, Serialize};

/// One response from the remote progressive-log endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChunk {
    /// Offset the chunk was requested from
    pub start: u64,
    /// Console text from `start` onward
    pub text: String,
    /// Total size reported by the remote, authoritative for the next request
    pub next_offset: u64,
    /// Whether the remote expects more output; `None` when not reported
    pub more_data: Option<bool>,
}

/// What to do with a fetched chunk given the offset already mirrored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkDisposition {
    /// Append the text and move to the new offset
    Append { next_offset: u64 },
    /// Nothing new
    Empty,
    /// Chunk does not line up with what was already mirrored
    Skip,
}

impl LogChunk {
    /// Decides whether this chunk can be appended after `offset`
    ///
    /// Appending is only allowed when the chunk starts exactly at `offset`
    /// and the remote reports a strictly larger size, so offsets never
    /// regress and no byte range is written twice.
    pub fn disposition(&self, offset: u64) -> ChunkDisposition {
        if self.start != offset {
            return ChunkDisposition::Skip;
        }
        if self.text.is_empty() {
            return ChunkDisposition::Empty;
        }
        if self.next_offset <= offset {
            return ChunkDisposition::Skip;
        }
        ChunkDisposition::Append {
            next_offset: self.next_offset,
        }
    }
}
