//! RAG ingest pipeline pieces: fetch → normalize → chunk → embed → persist.
//!
//! The ingest processor drives these; the stores here are the "legacy" relational mirror
//! of the chunk nodes that also land in the graph.

mod chunker;
mod documents;
mod fetch;

pub use chunker::{chunk_text, ChunkStrategy, ChunkingConfig, TextChunk};
pub use documents::{ChunkRecord, DocumentRecord, DocumentStatus, DocumentStore};
pub use fetch::{normalize_content, DefaultFetcher, DocumentFetcher, FetchedDocument};

use thiserror::Error;

use crate::db::StoreError;
use crate::embedding::EmbedError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error("embedding is not configured")]
    EmbeddingNotConfigured,
}

/// SHA-256 of normalized content, hex-encoded. Identity for dedup within a namespace.
pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
