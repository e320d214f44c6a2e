//! Weighted fusion of the lexical and dense result lists.
//!
//! Each list is min-max normalised to [0, 1] on its own scores (a list whose
//! scores are all equal maps to 1.0), scaled by its retriever's weight and
//! summed per chunk. The merged list is ordered by combined score, then by
//! rank in the higher-weighted retriever's list, then by rank in the other
//! list, then by corpus ordinal.
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, warn};

use carassist_core::config::KnowledgeSettings;
use carassist_core::error::Result;
use carassist_core::traits::Retriever;
use carassist_core::types::{ChunkOrdinal, SearchHit};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub lexical: f32,
    pub dense: f32,
}

impl Default for FusionWeights {
    fn default() -> Self { Self { lexical: 0.4, dense: 0.6 } }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    /// Candidates requested from each retriever.
    pub k_each: usize,
    /// Length of the fused list handed back.
    pub k_final: usize,
    pub weights: FusionWeights,
}

impl Default for FusionParams {
    fn default() -> Self { Self { k_each: 15, k_final: 3, weights: FusionWeights::default() } }
}

impl From<&KnowledgeSettings> for FusionParams {
    fn from(s: &KnowledgeSettings) -> Self {
        Self { k_each: s.k_each, k_final: s.k_final, weights: FusionWeights { lexical: s.lexical_weight, dense: s.dense_weight } }
    }
}

/// One entry of the fused list. Ranks are 0-based positions in each
/// retriever's own list, `None` when the chunk was absent from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedHit {
    pub ordinal: ChunkOrdinal,
    pub score: f32,
    pub dense_rank: Option<usize>,
    pub lexical_rank: Option<usize>,
}

/// Min-max normalise `hits` scores in list order.
pub fn normalize(hits: &[SearchHit]) -> Vec<f32> {
    let (min, max) = hits.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), h| (lo.min(h.score), hi.max(h.score)));
    let span = max - min;
    hits.iter()
        .map(|h| if span > 0.0 && span.is_finite() { (h.score - min) / span } else { 1.0 })
        .collect()
}

fn rank_cmp(a: Option<usize>, b: Option<usize>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Merge two ranked lists into at most `k_final` unique chunks.
pub fn fuse(lexical: &[SearchHit], dense: &[SearchHit], weights: FusionWeights, k_final: usize) -> Vec<FusedHit> {
    let mut by_ordinal: HashMap<ChunkOrdinal, FusedHit> = HashMap::new();
    for (rank, (hit, norm)) in dense.iter().zip(normalize(dense)).enumerate() {
        by_ordinal.entry(hit.ordinal).or_insert(FusedHit { ordinal: hit.ordinal, score: weights.dense * norm, dense_rank: Some(rank), lexical_rank: None });
    }
    for (rank, (hit, norm)) in lexical.iter().zip(normalize(lexical)).enumerate() {
        let entry = by_ordinal.entry(hit.ordinal).or_insert(FusedHit { ordinal: hit.ordinal, score: 0.0, dense_rank: None, lexical_rank: None });
        // a repeated ordinal within one list keeps its best rank
        if entry.lexical_rank.is_none() {
            entry.lexical_rank = Some(rank);
            entry.score += weights.lexical * norm;
        }
    }
    let dense_first = weights.dense >= weights.lexical;
    let mut fused: Vec<FusedHit> = by_ordinal.into_values().collect();
    fused.sort_by(|a, b| {
        let (primary, secondary) = if dense_first {
            (rank_cmp(a.dense_rank, b.dense_rank), rank_cmp(a.lexical_rank, b.lexical_rank))
        } else {
            (rank_cmp(a.lexical_rank, b.lexical_rank), rank_cmp(a.dense_rank, b.dense_rank))
        };
        b.score.total_cmp(&a.score).then(primary).then(secondary).then(a.ordinal.cmp(&b.ordinal))
    });
    fused.truncate(k_final);
    fused
}

/// Runs both retrievers and fuses their lists.
pub struct FusionRetriever<L, D> {
    lexical: L,
    dense: D,
    params: FusionParams,
}

impl<L: Retriever, D: Retriever> FusionRetriever<L, D> {
    pub fn new(lexical: L, dense: D, params: FusionParams) -> Self {
        Self { lexical, dense, params }
    }

    pub fn params(&self) -> &FusionParams { &self.params }

    /// Dependency errors (not loaded / not built) are returned to the
    /// caller. Any other retrieval failure is logged and yields no results.
    pub fn search(&self, text: &str) -> Result<Vec<FusedHit>> {
        let lexical = self.lexical.query(text, self.params.k_each);
        let dense = self.dense.query(text, self.params.k_each);
        let (lexical, dense) = match (lexical, dense) {
            (Ok(l), Ok(d)) => (l, d),
            (Err(e), _) if e.is_dependency() => return Err(e),
            (_, Err(e)) if e.is_dependency() => return Err(e),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, query = text, "hybrid search failed; returning no results");
                return Ok(vec![]);
            }
        };
        let fused = fuse(&lexical, &dense, self.params.weights, self.params.k_final);
        debug!(lexical = lexical.len(), dense = dense.len(), fused = fused.len(), "fused results");
        Ok(fused)
    }
}
