//! Wire seam between the upload engine and the transport layer.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use chunkferry_protocol::ChunkResponse;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A chunk delivery failure. Always retryable; fatal rejections arrive as
/// [`ChunkResponse::Error`] instead.
#[derive(Debug, Clone, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// One outbound chunk, ready for the wire.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Delivers one chunk and returns the receiver's decoded response.
pub trait ChunkTransport: Send + Sync {
    fn send_chunk<'a>(
        &'a self,
        request: ChunkRequest,
    ) -> BoxFuture<'a, Result<ChunkResponse, TransportError>>;
}
