use std::fs;
use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use carassist_core::data_processor::ChunkingConfig;
use carassist_core::error::Error;
use carassist_core::traits::{ChunkSource, ChunkStore, Embedder};
use carassist_core::types::DocumentChunk;
use carassist_embed::HashEmbedder;
use carassist_vector::table::open_db;
use carassist_vector::{ingest_directory, ChunkWriter, EmbeddingIndex, LanceChunkStore};

fn chunk(n: usize, page: Option<u32>, content: &str) -> DocumentChunk {
    DocumentChunk { id: format!("manual:{}:{n}", page.unwrap_or(0)), source: "data/PDF/manual.pdf".into(), page, chunk_index: n, content: content.into() }
}

#[tokio::test]
async fn written_table_loads_back_in_corpus_order() {
    let tmp = tempfile::tempdir().unwrap();
    let store_dir = tmp.path().join("vector_store");
    let embedder = HashEmbedder::new(32);
    let chunks = vec![
        chunk(0, Some(1), "how to change a tire"),
        chunk(1, Some(2), "checking the oil level"),
        chunk(2, None, "brake fluid reservoir"),
    ];
    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let vectors = embedder.embed_batch(&texts).unwrap();

    let writer = ChunkWriter::create(&store_dir, "chunks").await.unwrap();
    assert_eq!(writer.write(&chunks, &vectors, embedder.id()).await.unwrap(), 3);

    let corpus = LanceChunkStore::new(&store_dir, "chunks").load().unwrap().unwrap();
    assert_eq!(corpus.chunks, chunks);
    assert_eq!(corpus.vectors, vectors);
    assert_eq!(corpus.embedder_id.as_deref(), Some("hash:d32"));
}

#[tokio::test]
async fn rewriting_replaces_the_previous_index() {
    let tmp = tempfile::tempdir().unwrap();
    let store_dir = tmp.path().join("vector_store");
    let embedder = HashEmbedder::new(8);
    for content in ["first build", "second build"] {
        let chunks = vec![chunk(0, None, content)];
        let vectors = embedder.embed_batch(&[content.to_string()]).unwrap();
        ChunkWriter::create(&store_dir, "chunks").await.unwrap().write(&chunks, &vectors, embedder.id()).await.unwrap();
    }
    let corpus = LanceChunkStore::new(&store_dir, "chunks").load().unwrap().unwrap();
    assert_eq!(corpus.chunks.len(), 1);
    assert_eq!(corpus.chunks[0].content, "second build");
}

#[test]
fn directory_without_table_is_absent() {
    let tmp = tempfile::tempdir().unwrap();
    let store = LanceChunkStore::new(tmp.path(), "chunks");
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn malformed_table_is_a_load_error_naming_the_location() {
    let tmp = tempfile::tempdir().unwrap();
    let uri = tmp.path().to_string_lossy().to_string();
    let db = open_db(&uri).await.unwrap();
    let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Utf8, false)]));
    let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(StringArray::from(vec!["x"]))]).unwrap();
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
    db.create_table("chunks", reader).execute().await.unwrap();

    let store = LanceChunkStore::new(tmp.path(), "chunks");
    match store.load() {
        Err(Error::Load { location, reason }) => {
            assert!(location.contains(&uri));
            assert!(reason.contains("missing column"), "{reason}");
        }
        other => panic!("expected load error, got {other:?}"),
    }
}

#[tokio::test]
async fn index_built_with_another_embedder_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let store_dir = tmp.path().join("vector_store");
    let chunks = vec![chunk(0, None, "spark plug gap")];
    let built_with = HashEmbedder::new(16);
    let vectors = built_with.embed_batch(&["spark plug gap".to_string()]).unwrap();
    ChunkWriter::create(&store_dir, "chunks").await.unwrap().write(&chunks, &vectors, built_with.id()).await.unwrap();

    let index = EmbeddingIndex::new(Arc::new(LanceChunkStore::new(&store_dir, "chunks")), Arc::new(HashEmbedder::new(24)));
    assert!(matches!(index.load(), Err(Error::Load { .. })));
    assert!(matches!(index.chunks(), Err(Error::NotLoaded)));
}

#[tokio::test]
async fn ingest_then_query() {
    let tmp = tempfile::tempdir().unwrap();
    let data = tmp.path().join("PDF");
    fs::create_dir_all(&data).unwrap();
    fs::write(data.join("tires.txt"), "Here is how to change a tire on the roadside.").unwrap();
    fs::write(data.join("oil.txt"), "Synthetic oil should be replaced every ten thousand miles.").unwrap();
    let store_dir = tmp.path().join("vector_store");
    let embedder = HashEmbedder::new(256);

    let report = ingest_directory(&data, &store_dir, "chunks", ChunkingConfig::default(), &embedder, 4).await.unwrap();
    assert_eq!(report.chunks, 2);

    let index = EmbeddingIndex::new(Arc::new(LanceChunkStore::new(&store_dir, "chunks")), Arc::new(embedder));
    let corpus = index.load().unwrap().unwrap();
    let hits = index.query("how to change a tire", 2).unwrap();
    assert!(!hits.is_empty());
    assert_eq!(corpus.chunk(hits[0].ordinal).unwrap().file_name(), "tires.txt");
}
