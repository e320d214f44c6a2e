//! Domain types shared by the dense and lexical engines.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Position of a chunk in the corpus. Both retrievers index the same chunk
/// set, so the ordinal is the chunk's identity across engines.
pub type ChunkOrdinal = usize;

/// A slice of a source document that is independently retrievable.
///
/// - `id`: stable chunk identifier (`<file stem>:<page>:<n>`)
/// - `source`: path of the originating document
/// - `page`: 1-based page number for paged documents, `None` otherwise
/// - `chunk_index`: position of the chunk within its page or file
/// - `content`: the text payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub source: String,
    pub page: Option<u32>,
    pub chunk_index: usize,
    pub content: String,
}

impl DocumentChunk {
    /// File name component of `source`, falling back to the raw value.
    pub fn file_name(&self) -> &str {
        Path::new(&self.source)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or(self.source.as_str())
    }
}

/// Indicates which engine produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Dense,
    Lexical,
}

/// A ranked result. `score` is engine-specific and only comparable within
/// one engine's list; higher is always better.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub ordinal: ChunkOrdinal,
    pub score: f32,
    pub source: SourceKind,
}

/// Everything a persisted store hands back: chunks in corpus order with one
/// vector per chunk.
#[derive(Debug, Clone, Default)]
pub struct StoredCorpus {
    pub chunks: Vec<DocumentChunk>,
    pub vectors: Vec<Vec<f32>>,
    pub embedder_id: Option<String>,
}

/// Sort hits by descending score, breaking ties by corpus order.
pub fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.ordinal.cmp(&b.ordinal)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source: &str) -> DocumentChunk {
        DocumentChunk { id: "x:0:0".into(), source: source.into(), page: None, chunk_index: 0, content: String::new() }
    }

    #[test]
    fn file_name_strips_directories() {
        assert_eq!(chunk("/data/PDF/manual.pdf").file_name(), "manual.pdf");
        assert_eq!(chunk("manual.pdf").file_name(), "manual.pdf");
        assert_eq!(chunk("").file_name(), "");
    }

    #[test]
    fn sort_hits_breaks_ties_by_ordinal() {
        let mut hits = vec![
            SearchHit { ordinal: 4, score: 0.5, source: SourceKind::Dense },
            SearchHit { ordinal: 1, score: 0.5, source: SourceKind::Dense },
            SearchHit { ordinal: 9, score: 0.9, source: SourceKind::Dense },
        ];
        sort_hits(&mut hits);
        let order: Vec<_> = hits.iter().map(|h| h.ordinal).collect();
        assert_eq!(order, vec![9, 1, 4]);
    }
}
