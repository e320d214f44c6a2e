use std::sync::Arc;

use crate::error::Result;
use crate::types::{DocumentChunk, SearchHit, SourceKind, StoredCorpus};

pub trait Embedder: Send + Sync {
    /// Stable identifier recorded alongside persisted vectors.
    fn id(&self) -> &str;
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    /// L2-normalised embeddings, one per input text.
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Persisted storage the embedding index loads from.
pub trait ChunkStore: Send + Sync {
    /// Human-readable location used in diagnostics and load errors.
    fn location(&self) -> String;
    /// `Ok(None)` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<StoredCorpus>>;
}

/// Anything that can hand out the loaded chunk set.
pub trait ChunkSource: Send + Sync {
    fn chunks(&self) -> Result<Arc<[DocumentChunk]>>;
}

pub trait Retriever: Send + Sync {
    fn kind(&self) -> SourceKind;
    fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>>;
}

impl<R: Retriever + ?Sized> Retriever for &R {
    fn kind(&self) -> SourceKind { (**self).kind() }
    fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> { (**self).query(text, k) }
}

impl<R: Retriever + ?Sized> Retriever for Arc<R> {
    fn kind(&self) -> SourceKind { (**self).kind() }
    fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> { (**self).query(text, k) }
}
