use anyhow::{anyhow, bail};
use arrow_array::cast::AsArray;
use arrow_array::types::{Float32Type, Int32Type};
use arrow_array::{Array, RecordBatch};
use lancedb::query::ExecutableQuery;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

use carassist_core::error::{Error, Result};
use carassist_core::traits::ChunkStore;
use carassist_core::types::{DocumentChunk, StoredCorpus};

use crate::schema::{META_EMBEDDER_ID, META_TABLE};
use crate::table::{get_meta, has_table, open_db};

/// Drive `make()` to completion on a private current-thread runtime.
///
/// The future is created and polled on a scoped helper thread, so this is
/// safe to call from plain threads and from inside a tokio runtime alike.
pub(crate) fn run_blocking<T, F, Fut>(make: F) -> anyhow::Result<T>
where
    T: Send,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = anyhow::Result<T>>,
{
    std::thread::scope(|s| {
        s.spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
            rt.block_on(make())
        })
        .join()
        .map_err(|_| anyhow!("store reader thread panicked"))?
    })
}

/// Chunk table persisted by [`crate::ChunkWriter`].
pub struct LanceChunkStore {
    path: PathBuf,
    table: String,
}

impl LanceChunkStore {
    pub fn new(path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self { path: path.into(), table: table.into() }
    }

    pub fn path(&self) -> &Path { &self.path }
}

impl ChunkStore for LanceChunkStore {
    fn location(&self) -> String {
        format!("{} (table '{}')", self.path.display(), self.table)
    }

    fn load(&self) -> Result<Option<StoredCorpus>> {
        if !self.path.is_dir() {
            debug!(path = %self.path.display(), "store directory absent");
            return Ok(None);
        }
        let uri = self.path.to_string_lossy().to_string();
        let table = self.table.clone();
        let corpus = run_blocking(move || read_corpus(uri, table)).map_err(|e| Error::load(self.location(), format!("{e:#}")))?;
        if let Some(c) = &corpus {
            info!(location = %self.location(), chunks = c.chunks.len(), "loaded chunk table");
        }
        Ok(corpus)
    }
}

async fn read_corpus(uri: String, table: String) -> anyhow::Result<Option<StoredCorpus>> {
    let db = open_db(&uri).await?;
    if !has_table(&db, &table).await? {
        return Ok(None);
    }
    let t = db.open_table(&table).execute().await?;
    let mut stream = t.query().execute().await?;
    let mut rows: Vec<(usize, DocumentChunk, Vec<f32>)> = Vec::new();
    while let Some(batch) = futures::TryStreamExt::try_next(&mut stream).await? {
        read_rows(&batch, &mut rows)?;
    }
    rows.sort_by_key(|(ordinal, _, _)| *ordinal);
    if let Some(pos) = rows.iter().enumerate().position(|(i, (ordinal, _, _))| i != *ordinal) {
        bail!("ordinals are not contiguous at row {pos}");
    }
    let embedder_id = get_meta(&db, META_TABLE, META_EMBEDDER_ID).await?;
    let mut corpus = StoredCorpus { embedder_id, ..Default::default() };
    for (_, chunk, vector) in rows {
        corpus.chunks.push(chunk);
        corpus.vectors.push(vector);
    }
    Ok(Some(corpus))
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> anyhow::Result<&'a dyn Array> {
    batch.column_by_name(name).map(|c| c.as_ref()).ok_or_else(|| anyhow!("missing column '{name}'"))
}

fn read_rows(batch: &RecordBatch, out: &mut Vec<(usize, DocumentChunk, Vec<f32>)>) -> anyhow::Result<()> {
    let mistyped = |name: &str| anyhow!("column '{name}' has an unexpected type");
    let id = column(batch, "id")?.as_string_opt::<i32>().ok_or_else(|| mistyped("id"))?;
    let source = column(batch, "source")?.as_string_opt::<i32>().ok_or_else(|| mistyped("source"))?;
    let page = column(batch, "page")?.as_primitive_opt::<Int32Type>().ok_or_else(|| mistyped("page"))?;
    let chunk_index = column(batch, "chunk_index")?.as_primitive_opt::<Int32Type>().ok_or_else(|| mistyped("chunk_index"))?;
    let ordinal = column(batch, "ordinal")?.as_primitive_opt::<Int32Type>().ok_or_else(|| mistyped("ordinal"))?;
    let content = column(batch, "content")?.as_string_opt::<i32>().ok_or_else(|| mistyped("content"))?;
    let vector = column(batch, "vector")?.as_fixed_size_list_opt().ok_or_else(|| mistyped("vector"))?;

    for i in 0..batch.num_rows() {
        if vector.is_null(i) {
            bail!("row {} has no vector", id.value(i));
        }
        let values = vector.value(i);
        let values = values.as_primitive_opt::<Float32Type>().ok_or_else(|| mistyped("vector"))?;
        if values.null_count() > 0 {
            bail!("row {} has null vector components", id.value(i));
        }
        let ord = usize::try_from(ordinal.value(i)).map_err(|_| anyhow!("row {} has a negative ordinal", id.value(i)))?;
        let page = if page.is_null(i) {
            None
        } else {
            Some(u32::try_from(page.value(i)).map_err(|_| anyhow!("row {} has a negative page", id.value(i)))?)
        };
        let chunk = DocumentChunk {
            id: id.value(i).to_string(),
            source: source.value(i).to_string(),
            page,
            chunk_index: usize::try_from(chunk_index.value(i)).map_err(|_| anyhow!("row {} has a negative chunk index", id.value(i)))?,
            content: content.value(i).to_string(),
        };
        out.push((ord, chunk, values.values().to_vec()));
    }
    Ok(())
}

/// In-process corpus, for tests and tooling that never touch disk.
#[derive(Default)]
pub struct MemoryChunkStore {
    corpus: Option<StoredCorpus>,
    loads: AtomicUsize,
}

impl MemoryChunkStore {
    pub fn new(corpus: StoredCorpus) -> Self {
        Self { corpus: Some(corpus), loads: AtomicUsize::new(0) }
    }

    /// A store with nothing persisted.
    pub fn empty() -> Self { Self::default() }

    /// Number of times `load` has been called.
    pub fn load_count(&self) -> usize { self.loads.load(Ordering::SeqCst) }
}

impl ChunkStore for MemoryChunkStore {
    fn location(&self) -> String { "memory".to_string() }

    fn load(&self) -> Result<Option<StoredCorpus>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.corpus.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_blocking_works_inside_a_runtime() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let v = rt.block_on(async { run_blocking(|| async { Ok(41 + 1) }) }).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn missing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanceChunkStore::new(dir.path().join("nope"), "chunks");
        assert!(store.load().unwrap().is_none());
    }

    fn row(page: Option<i32>, chunk_index: i32, vector: Vec<Option<f32>>) -> RecordBatch {
        use arrow_array::{FixedSizeListArray, Int32Array, StringArray};
        use std::sync::Arc;
        RecordBatch::try_new(crate::schema::build_chunk_schema(2), vec![
            Arc::new(StringArray::from(vec!["manual:1:0"])),
            Arc::new(StringArray::from(vec!["manual.pdf"])),
            Arc::new(Int32Array::from(vec![page])),
            Arc::new(Int32Array::from(vec![chunk_index])),
            Arc::new(Int32Array::from(vec![0])),
            Arc::new(StringArray::from(vec!["check the oil"])),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vec![Some(vector)], 2)),
        ])
        .unwrap()
    }

    fn read_err(batch: &RecordBatch) -> String {
        let mut out = Vec::new();
        read_rows(batch, &mut out).unwrap_err().to_string()
    }

    #[test]
    fn well_formed_row_is_read() {
        let mut out = Vec::new();
        read_rows(&row(Some(3), 1, vec![Some(0.5), Some(0.25)]), &mut out).unwrap();
        let (ord, chunk, vector) = &out[0];
        assert_eq!(*ord, 0);
        assert_eq!(chunk.page, Some(3));
        assert_eq!(chunk.chunk_index, 1);
        assert_eq!(vector, &vec![0.5, 0.25]);
    }

    #[test]
    fn corrupt_rows_are_rejected() {
        assert!(read_err(&row(Some(-1), 0, vec![Some(1.0), Some(0.0)])).contains("negative page"));
        assert!(read_err(&row(None, -4, vec![Some(1.0), Some(0.0)])).contains("negative chunk index"));
        assert!(read_err(&row(None, 0, vec![Some(1.0), None])).contains("null vector components"));
    }

    #[test]
    fn memory_store_counts_loads() {
        let store = MemoryChunkStore::empty();
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.load_count(), 1);
    }
}
