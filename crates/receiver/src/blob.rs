//! Byte storage collaborator for pieces and assembled files.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use chunkferry_store::BoxFuture;

/// Errors produced by blob stores.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blob backend error: {0}")]
    Backend(String),
}

/// Keyed byte storage for individual pieces and the assembled output.
///
/// Locations are opaque handles minted by `write`; only the store that
/// minted a location can interpret it.
pub trait BlobStore: Send + Sync {
    /// Persists `bytes` and returns the new blob's location.
    fn write<'a>(&'a self, bytes: &'a [u8]) -> BoxFuture<'a, Result<String, BlobError>>;

    /// Reads the inclusive byte range `[start, end]` of a blob.
    fn read_range<'a>(
        &'a self,
        location: &'a str,
        start: u64,
        end: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, BlobError>>;

    /// Concatenates blobs in the given order into the file at `dest`,
    /// creating parent directories as needed. An empty location list
    /// produces an empty file.
    fn concatenate<'a>(
        &'a self,
        locations: &'a [String],
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<(), BlobError>>;

    /// Deletes a blob. Callers treat failures as best-effort cleanup.
    fn delete<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<(), BlobError>>;
}

/// [`BlobStore`] spooling pieces as UUID-named files under one directory.
pub struct DiskBlobStore {
    root: PathBuf,
}

impl DiskBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BlobStore for DiskBlobStore {
    fn write<'a>(&'a self, bytes: &'a [u8]) -> BoxFuture<'a, Result<String, BlobError>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.root).await?;
            let path = self.root.join(uuid::Uuid::new_v4().to_string());
            tokio::fs::write(&path, bytes).await?;
            Ok(path.to_string_lossy().into_owned())
        })
    }

    fn read_range<'a>(
        &'a self,
        location: &'a str,
        start: u64,
        end: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, BlobError>> {
        Box::pin(async move {
            let mut file = tokio::fs::File::open(location).await?;
            file.seek(SeekFrom::Start(start)).await?;
            let len = end.saturating_sub(start) + 1;
            let mut buf = Vec::with_capacity(len as usize);
            file.take(len).read_to_end(&mut buf).await?;
            Ok(buf)
        })
    }

    fn concatenate<'a>(
        &'a self,
        locations: &'a [String],
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<(), BlobError>> {
        Box::pin(async move {
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut out = tokio::fs::File::create(dest).await?;
            for location in locations {
                let mut piece = tokio::fs::File::open(location).await?;
                tokio::io::copy(&mut piece, &mut out).await?;
            }
            out.flush().await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<(), BlobError>> {
        Box::pin(async move {
            tokio::fs::remove_file(location).await?;
            Ok(())
        })
    }
}
