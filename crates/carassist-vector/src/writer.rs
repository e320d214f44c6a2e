use anyhow::{anyhow, bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use lancedb::Connection;
use arrow_array::{RecordBatch, RecordBatchIterator, Int32Array, FixedSizeListArray, StringArray};
use std::sync::Arc;
use std::path::{Path, PathBuf};
use tracing::info;

use carassist_core::types::DocumentChunk;
use crate::schema::{build_chunk_schema, META_EMBEDDER_ID, META_TABLE};
use crate::table::{has_table, open_db, set_meta};

const BATCH_SIZE: usize = 1000;

/// Builds the persisted chunk table from scratch. The index is never updated
/// incrementally: creating a writer wipes whatever was stored at `path`.
pub struct ChunkWriter { path: PathBuf, db: Connection, table_name: String }

impl ChunkWriter {
	pub async fn create(path: &Path, table_name: &str) -> Result<Self> {
		if path.exists() { std::fs::remove_dir_all(path)?; }
		std::fs::create_dir_all(path)?;
		let db = open_db(&path.to_string_lossy()).await?;
		Ok(Self { path: path.to_path_buf(), db, table_name: table_name.to_string() })
	}

	pub fn path(&self) -> &Path { &self.path }

	/// Write `chunks` in corpus order with their vectors and record the
	/// embedder id. Returns the number of rows written.
	pub async fn write(&self, chunks: &[DocumentChunk], embeddings: &[Vec<f32>], embedder_id: &str) -> Result<usize> {
		if chunks.is_empty() { bail!("no chunks to index"); }
		if chunks.len() != embeddings.len() {
			bail!("chunks and embeddings length must match ({} != {})", chunks.len(), embeddings.len());
		}
		let dim = embeddings[0].len();
		if let Some(bad) = embeddings.iter().position(|e| e.len() != dim) {
			bail!("embedding {} has dimension {}, expected {}", bad, embeddings[bad].len(), dim);
		}
		info!(chunks = chunks.len(), table = %self.table_name, path = %self.path.display(), "writing embedding index");
		let pb = ProgressBar::new(chunks.len() as u64);
		pb.set_style(ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%)").map_err(|e| anyhow!("progress template: {e}"))?.progress_chars("#>-"));
		let mut start = 0usize;
		while start < chunks.len() {
			let end = (start + BATCH_SIZE).min(chunks.len());
			let batch = to_record_batch(start, &chunks[start..end], &embeddings[start..end], dim)?;
			self.insert_batch(batch).await?;
			pb.set_position(end as u64);
			start = end;
		}
		pb.finish_and_clear();
		set_meta(&self.db, META_TABLE, META_EMBEDDER_ID, embedder_id).await?;
		info!(rows = chunks.len(), dim, "embedding index written");
		Ok(chunks.len())
	}

	async fn insert_batch(&self, record_batch: RecordBatch) -> Result<()> {
		let schema = record_batch.schema();
		let reader = Box::new(RecordBatchIterator::new(vec![Ok(record_batch)].into_iter(), schema));
		if has_table(&self.db, &self.table_name).await? {
			self.db.open_table(&self.table_name).execute().await?.add(reader).execute().await?;
		} else {
			self.db.create_table(&self.table_name, reader).execute().await?;
		}
		Ok(())
	}
}

fn to_record_batch(first_ordinal: usize, chunks: &[DocumentChunk], embeddings: &[Vec<f32>], dim: usize) -> Result<RecordBatch> {
	let dim = i32::try_from(dim)?;
	let schema = build_chunk_schema(dim);
	let mut ordinals = Vec::with_capacity(chunks.len());
	let mut pages = Vec::with_capacity(chunks.len());
	let mut chunk_indexes = Vec::with_capacity(chunks.len());
	for (i, c) in chunks.iter().enumerate() {
		ordinals.push(i32::try_from(first_ordinal + i)?);
		pages.push(c.page.map(i32::try_from).transpose()?);
		chunk_indexes.push(i32::try_from(c.chunk_index)?);
	}
	let vectors = embeddings.iter().map(|v| Some(v.iter().map(|&x| Some(x)).collect::<Vec<_>>()));
	let record_batch = RecordBatch::try_new(schema, vec![
		Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.id.as_str()))),
		Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.source.as_str()))),
		Arc::new(Int32Array::from(pages)),
		Arc::new(Int32Array::from(chunk_indexes)),
		Arc::new(Int32Array::from(ordinals)),
		Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.content.as_str()))),
		Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vectors, dim)),
	])?;
	Ok(record_batch)
}

#[cfg(test)]
mod tests {
	use super::*;
	use arrow_array::Array;

	fn chunk(page: Option<u32>, chunk_index: usize) -> DocumentChunk {
		DocumentChunk { id: "manual:1:0".into(), source: "manual.pdf".into(), page, chunk_index, content: "torque specs".into() }
	}

	#[test]
	fn batch_carries_page_index_and_ordinal() {
		let batch = to_record_batch(7, &[chunk(Some(4), 2)], &[vec![0.5, 0.5]], 2).unwrap();
		assert_eq!(batch.num_rows(), 1);
		let int = |name: &str| batch.column_by_name(name).unwrap().as_any().downcast_ref::<Int32Array>().unwrap().value(0);
		assert_eq!(int("page"), 4);
		assert_eq!(int("chunk_index"), 2);
		assert_eq!(int("ordinal"), 7);
	}

	#[test]
	fn out_of_range_values_are_errors_not_truncated() {
		assert!(to_record_batch(0, &[chunk(Some(u32::MAX), 0)], &[vec![0.0, 1.0]], 2).is_err());
		assert!(to_record_batch(0, &[chunk(None, usize::MAX)], &[vec![0.0, 1.0]], 2).is_err());
	}
}
