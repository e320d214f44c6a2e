//! Dense side of hybrid retrieval.
//!
//! The [`EmbeddingIndex`] loads a persisted chunk table once, validates it
//! against the configured embedder and keeps it for the life of the process.
//! Queries run an exact cosine scan over the loaded vectors.
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, error, info, warn};

use carassist_core::error::{Error, Result};
use carassist_core::traits::{ChunkSource, ChunkStore, Embedder, Retriever};
use carassist_core::types::{sort_hits, DocumentChunk, SearchHit, SourceKind, StoredCorpus};

pub const DEFAULT_MIN_SIMILARITY: f32 = 0.3;

/// Loaded, validated chunk set with one vector per chunk.
#[derive(Debug)]
pub struct DenseCorpus {
    chunks: Arc<[DocumentChunk]>,
    vectors: Vec<Vec<f32>>,
    dim: usize,
}

impl DenseCorpus {
    fn from_stored(stored: StoredCorpus, embedder: &dyn Embedder, location: &str) -> Result<Self> {
        let StoredCorpus { chunks, vectors, embedder_id } = stored;
        if chunks.len() != vectors.len() {
            return Err(Error::load(location, format!("{} chunks but {} vectors", chunks.len(), vectors.len())));
        }
        if let Some(stored_id) = embedder_id.as_deref() {
            if stored_id != embedder.id() {
                return Err(Error::load(location, format!("index was built with embedder '{stored_id}', configured embedder is '{}'", embedder.id())));
            }
        }
        let dim = embedder.dim();
        if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dim) {
            return Err(Error::load(location, format!("vector {i} has dimension {}, expected {dim}", v.len())));
        }
        Ok(Self { chunks: chunks.into(), vectors, dim })
    }

    pub fn len(&self) -> usize { self.chunks.len() }
    pub fn is_empty(&self) -> bool { self.chunks.is_empty() }
    pub fn dim(&self) -> usize { self.dim }
    pub fn chunks(&self) -> &Arc<[DocumentChunk]> { &self.chunks }
    pub fn chunk(&self, ordinal: usize) -> Option<&DocumentChunk> { self.chunks.get(ordinal) }
}

pub struct EmbeddingIndex {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn Embedder>,
    min_similarity: f32,
    corpus: OnceLock<Arc<DenseCorpus>>,
    /// `(location, reason)` of a failed load; never retried.
    failed: OnceLock<(String, String)>,
    init: Mutex<()>,
}

impl EmbeddingIndex {
    pub fn new(store: Arc<dyn ChunkStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder, min_similarity: DEFAULT_MIN_SIMILARITY, corpus: OnceLock::new(), failed: OnceLock::new(), init: Mutex::new(()) }
    }

    /// Cosine similarity below which dense candidates are dropped.
    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> { &self.embedder }

    pub fn is_loaded(&self) -> bool { self.corpus.get().is_some() }

    /// Load the persisted index, at most once per instance.
    ///
    /// Returns the cached corpus on every call after the first success,
    /// `Ok(None)` when nothing has been persisted yet, and `Error::Load` when
    /// the stored data is unreadable or does not match the embedder. A load
    /// error sticks: later calls return it without reading the store again.
    pub fn load(&self) -> Result<Option<Arc<DenseCorpus>>> {
        if let Some(c) = self.cached()? {
            return Ok(Some(c));
        }
        let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(c) = self.cached()? {
            return Ok(Some(c));
        }
        let location = self.store.location();
        let loaded = self
            .store
            .load()
            .and_then(|stored| stored.map(|s| DenseCorpus::from_stored(s, self.embedder.as_ref(), &location)).transpose());
        match loaded {
            Ok(Some(corpus)) => {
                info!(location = %location, chunks = corpus.len(), dim = corpus.dim(), "embedding index loaded");
                Ok(Some(self.corpus.get_or_init(|| Arc::new(corpus)).clone()))
            }
            Ok(None) => {
                warn!(location = %location, "no persisted embedding index; run ingestion first");
                Ok(None)
            }
            Err(Error::Load { location, reason }) => {
                error!(location = %location, reason = %reason, "embedding index is unreadable");
                let (location, reason) = self.failed.get_or_init(|| (location, reason)).clone();
                Err(Error::Load { location, reason })
            }
            Err(e) => Err(e),
        }
    }

    fn cached(&self) -> Result<Option<Arc<DenseCorpus>>> {
        if let Some((location, reason)) = self.failed.get() {
            return Err(Error::Load { location: location.clone(), reason: reason.clone() });
        }
        Ok(self.corpus.get().cloned())
    }

    pub fn corpus(&self) -> Result<Arc<DenseCorpus>> {
        self.corpus.get().cloned().ok_or(Error::NotLoaded)
    }

    pub fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> {
        let corpus = self.corpus()?;
        if text.trim().is_empty() {
            return Err(Error::InvalidQuery("query text is empty".into()));
        }
        if k == 0 {
            return Err(Error::InvalidQuery("k must be positive".into()));
        }
        let mut embedded = self.embedder.embed_batch(&[text.to_string()]).map_err(|e| Error::Search(format!("embedding query: {e}")))?;
        let q = embedded.pop().ok_or_else(|| Error::Search("embedder returned no vector".into()))?;
        if q.len() != corpus.dim {
            return Err(Error::Search(format!("query vector has dimension {}, index has {}", q.len(), corpus.dim)));
        }
        let mut hits: Vec<SearchHit> = corpus
            .vectors
            .iter()
            .enumerate()
            .map(|(ordinal, v)| SearchHit { ordinal, score: cosine(&q, v), source: SourceKind::Dense })
            .filter(|h| h.score >= self.min_similarity)
            .collect();
        sort_hits(&mut hits);
        hits.truncate(k);
        debug!(hits = hits.len(), k, "dense query");
        Ok(hits)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}

impl ChunkSource for EmbeddingIndex {
    fn chunks(&self) -> Result<Arc<[DocumentChunk]>> {
        Ok(self.corpus()?.chunks.clone())
    }
}

impl Retriever for EmbeddingIndex {
    fn kind(&self) -> SourceKind { SourceKind::Dense }
    fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> { EmbeddingIndex::query(self, text, k) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryChunkStore;

    /// Two-dimensional embedder: "a" terms push x, "b" terms push y.
    struct AxisEmbedder;

    impl Embedder for AxisEmbedder {
        fn id(&self) -> &str { "axis" }
        fn dim(&self) -> usize { 2 }
        fn max_len(&self) -> usize { 64 }
        fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| {
                let a = t.matches('a').count() as f32;
                let b = t.matches('b').count() as f32;
                vec![a, b]
            }).collect())
        }
    }

    fn chunk(n: usize, content: &str) -> DocumentChunk {
        DocumentChunk { id: format!("doc:0:{n}"), source: "doc.txt".into(), page: None, chunk_index: n, content: content.into() }
    }

    fn index_over(vectors: Vec<Vec<f32>>, embedder_id: Option<&str>) -> EmbeddingIndex {
        let chunks = (0..vectors.len()).map(|i| chunk(i, "x")).collect();
        let store = MemoryChunkStore::new(StoredCorpus { chunks, vectors, embedder_id: embedder_id.map(String::from) });
        EmbeddingIndex::new(Arc::new(store), Arc::new(AxisEmbedder))
    }

    #[test]
    fn query_before_load_is_not_loaded() {
        let idx = index_over(vec![vec![1.0, 0.0]], None);
        assert!(matches!(idx.query("a", 1), Err(Error::NotLoaded)));
        assert!(matches!(idx.chunks(), Err(Error::NotLoaded)));
    }

    #[test]
    fn absent_store_is_unavailable_not_error() {
        let idx = EmbeddingIndex::new(Arc::new(MemoryChunkStore::empty()), Arc::new(AxisEmbedder));
        assert!(idx.load().unwrap().is_none());
        assert!(!idx.is_loaded());
    }

    #[test]
    fn load_is_cached() {
        let store = Arc::new(MemoryChunkStore::new(StoredCorpus {
            chunks: vec![chunk(0, "a")],
            vectors: vec![vec![1.0, 0.0]],
            embedder_id: None,
        }));
        let idx = EmbeddingIndex::new(store.clone(), Arc::new(AxisEmbedder));
        let first = idx.load().unwrap().unwrap();
        let before = idx.query("a", 5).unwrap();
        let second = idx.load().unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.load_count(), 1);
        assert_eq!(before, idx.query("a", 5).unwrap());
    }

    #[test]
    fn ranks_by_cosine_and_breaks_ties_by_ordinal() {
        let idx = index_over(vec![vec![0.0, 1.0], vec![1.0, 1.0], vec![1.0, 0.0], vec![2.0, 0.0]], None);
        idx.load().unwrap();
        let hits = idx.query("a", 10).unwrap();
        let order: Vec<_> = hits.iter().map(|h| h.ordinal).collect();
        // ordinal 0 is orthogonal and falls under the similarity floor
        assert_eq!(order, vec![2, 3, 1]);
        assert!(hits.iter().all(|h| h.source == SourceKind::Dense));
        assert_eq!(idx.query("a", 1).unwrap().len(), 1);
    }

    #[test]
    fn rejects_empty_query_and_zero_k() {
        let idx = index_over(vec![vec![1.0, 0.0]], None);
        idx.load().unwrap();
        assert!(matches!(idx.query("  ", 3), Err(Error::InvalidQuery(_))));
        assert!(matches!(idx.query("a", 0), Err(Error::InvalidQuery(_))));
    }

    #[test]
    fn dimension_mismatch_is_a_load_error() {
        let idx = index_over(vec![vec![1.0, 0.0, 0.0]], None);
        match idx.load() {
            Err(Error::Load { location, reason }) => {
                assert_eq!(location, "memory");
                assert!(reason.contains("dimension"));
            }
            other => panic!("expected load error, got {other:?}"),
        }
    }

    #[test]
    fn embedder_mismatch_is_a_load_error() {
        let idx = index_over(vec![vec![1.0, 0.0]], Some("bert:other:d2"));
        assert!(matches!(idx.load(), Err(Error::Load { .. })));
    }

    #[test]
    fn failed_load_is_not_retried() {
        let store = Arc::new(MemoryChunkStore::new(StoredCorpus {
            chunks: vec![chunk(0, "a")],
            vectors: vec![vec![1.0, 0.0, 0.0]],
            embedder_id: None,
        }));
        let idx = EmbeddingIndex::new(store.clone(), Arc::new(AxisEmbedder));
        for _ in 0..3 {
            match idx.load() {
                Err(Error::Load { location, reason }) => {
                    assert_eq!(location, "memory");
                    assert!(reason.contains("dimension"));
                }
                other => panic!("expected load error, got {other:?}"),
            }
        }
        assert_eq!(store.load_count(), 1);
        assert!(!idx.is_loaded());
    }

    #[test]
    fn concurrent_first_loads_read_the_store_once() {
        let store = Arc::new(MemoryChunkStore::new(StoredCorpus {
            chunks: vec![chunk(0, "a"), chunk(1, "b")],
            vectors: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            embedder_id: None,
        }));
        let idx = EmbeddingIndex::new(store.clone(), Arc::new(AxisEmbedder));
        let barrier = std::sync::Barrier::new(8);
        let loaded: Vec<Arc<DenseCorpus>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        idx.load().unwrap().unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(store.load_count(), 1);
        assert!(loaded.iter().all(|c| Arc::ptr_eq(c, &loaded[0])));
    }
}
