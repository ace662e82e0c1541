use serde::{Deserialize, Serialize};

/// Receiver's answer to one uploaded chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkResponse {
    /// All pieces arrived and the file was assembled at `path`.
    #[serde(rename_all = "camelCase")]
    Complete { path: String },
    /// More pieces are outstanding. `stored_pieces` lists the part numbers
    /// currently held by the receiver, sorted ascending; the sender
    /// reconciles its own acknowledged set against this list.
    #[serde(rename_all = "camelCase")]
    Partial { stored_pieces: Vec<u32> },
    /// The transfer was rejected. Fatal on the sender side: no retry.
    #[serde(rename_all = "camelCase")]
    Error { reason: ErrorReason },
}

impl ChunkResponse {
    /// Builds a partial response with the piece list sorted ascending.
    pub fn partial(pieces: impl IntoIterator<Item = u32>) -> Self {
        let mut stored_pieces: Vec<u32> = pieces.into_iter().collect();
        stored_pieces.sort_unstable();
        Self::Partial { stored_pieces }
    }
}

/// Machine-readable reason codes carried in error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorReason {
    #[serde(rename = "file_size_exceeded")]
    SizeExceeded,
    #[serde(rename = "induced_failure")]
    InducedFailure,
    #[serde(rename = "internal_error")]
    Internal,
}

impl std::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            Self::SizeExceeded => "file_size_exceeded",
            Self::InducedFailure => "induced_failure",
            Self::Internal => "internal_error",
        };
        f.write_str(code)
    }
}
