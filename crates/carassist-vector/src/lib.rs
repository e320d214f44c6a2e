//! carassist-vector
//!
//! Dense retrieval: the persisted LanceDB chunk table, its writer and loader,
//! and the load-once [`EmbeddingIndex`].
pub mod index;
pub mod ingest;
pub mod schema;
pub mod store;
pub mod table;
pub mod writer;

pub use index::{DenseCorpus, EmbeddingIndex, DEFAULT_MIN_SIMILARITY};
pub use ingest::{embed_chunks, ingest_directory, IngestReport};
pub use store::{LanceChunkStore, MemoryChunkStore};
pub use writer::ChunkWriter;
