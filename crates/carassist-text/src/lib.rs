//! carassist-text
//!
//! Lexical side of hybrid retrieval: an in-RAM tantivy BM25 index rebuilt from
//! the chunk set the embedding index holds.
pub mod lexical;
pub mod tantivy_utils;

pub use lexical::{LexicalModel, LexicalRetriever};
