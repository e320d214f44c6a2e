use anyhow::{anyhow, bail, Result};
use std::path::Path;
use tracing::info;

use carassist_core::data_processor::{ChunkingConfig, DataProcessor};
use carassist_core::traits::Embedder;
use carassist_core::types::DocumentChunk;

use crate::writer::ChunkWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub chunks: usize,
    pub dim: usize,
}

/// Embed `chunks` `batch_size` at a time, checking every vector has the
/// embedder's dimension.
pub fn embed_chunks(embedder: &dyn Embedder, chunks: &[DocumentChunk], batch_size: usize) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let embs = embedder.embed_batch(&texts)?;
        if embs.len() != texts.len() {
            return Err(anyhow!("embedder returned {} vectors for {} texts", embs.len(), texts.len()));
        }
        if let Some(v) = embs.iter().find(|v| v.len() != embedder.dim()) {
            return Err(anyhow!("dim mismatch: got {} expected {}", v.len(), embedder.dim()));
        }
        vectors.extend(embs);
    }
    Ok(vectors)
}

/// Rebuild the chunk table at `store_path` from every document under
/// `data_dir`.
pub async fn ingest_directory(
    data_dir: &Path,
    store_path: &Path,
    table: &str,
    chunking: ChunkingConfig,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<IngestReport> {
    let chunks = DataProcessor::with_config(chunking).process_directory(data_dir)?;
    if chunks.is_empty() {
        bail!("no chunks produced from {}", data_dir.display());
    }
    info!(chunks = chunks.len(), embedder = embedder.id(), "embedding chunks");
    let vectors = embed_chunks(embedder, &chunks, batch_size)?;
    let writer = ChunkWriter::create(store_path, table).await?;
    let written = writer.write(&chunks, &vectors, embedder.id()).await?;
    Ok(IngestReport { chunks: written, dim: embedder.dim() })
}
