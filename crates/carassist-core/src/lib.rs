//! carassist-core
//!
//! Domain types, engine traits, the error taxonomy, layered configuration and
//! document ingestion shared by every retrieval and streaming crate.

pub mod config;
pub mod data_processor;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
