//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (`__` separates nested keys, e.g. `APP_KNOWLEDGE__STORE_PATH`). Typed
//! sections carry defaults so an empty configuration is usable.
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::Error;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.settings()?.validate()?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn settings(&self) -> anyhow::Result<Settings> {
        self.figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to read settings: {}", e))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub knowledge: KnowledgeSettings,
    pub embedding: EmbeddingSettings,
    pub ingest: IngestSettings,
    pub assistant: AssistantSettings,
    pub history: HistorySettings,
}

impl Settings {
    pub fn validate(&self) -> Result<(), Error> {
        let k = &self.knowledge;
        if k.k_each == 0 || k.k_final == 0 {
            return Err(Error::InvalidConfig("knowledge.k_each and knowledge.k_final must be positive".into()));
        }
        if k.lexical_weight < 0.0 || k.dense_weight < 0.0 || k.lexical_weight + k.dense_weight <= 0.0 {
            return Err(Error::InvalidConfig("fusion weights must be non-negative and not both zero".into()));
        }
        if self.ingest.chunk_size == 0 || self.ingest.chunk_overlap >= self.ingest.chunk_size {
            return Err(Error::InvalidConfig("ingest.chunk_overlap must be smaller than ingest.chunk_size".into()));
        }
        if self.embedding.backend == EmbeddingBackend::Hash && self.embedding.dim == 0 {
            return Err(Error::InvalidConfig("embedding.dim must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeSettings {
    pub store_path: String,
    pub table: String,
    pub k_each: usize,
    pub k_final: usize,
    pub lexical_weight: f32,
    pub dense_weight: f32,
    pub min_similarity: f32,
}

impl Default for KnowledgeSettings {
    fn default() -> Self {
        Self {
            store_path: "data/vector_store".into(),
            table: "chunks".into(),
            k_each: 15,
            k_final: 3,
            lexical_weight: 0.4,
            dense_weight: 0.6,
            min_similarity: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Bert,
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub model_dir: String,
    pub dim: usize,
    pub max_len: usize,
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Bert,
            model_dir: "models/all-MiniLM-L6-v2".into(),
            dim: 512,
            max_len: 256,
            batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub data_dir: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self { data_dir: "data/PDF".into(), chunk_size: 1000, chunk_overlap: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantSettings {
    pub ollama_url: String,
    pub model: String,
    /// Number of past user/assistant exchanges fed back into generation.
    pub memory_window: usize,
    /// Empty string disables filtering.
    pub final_answer_marker: String,
    pub request_timeout_secs: u64,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            ollama_url: "http://127.0.0.1:11434".into(),
            model: "mistral:latest".into(),
            memory_window: 5,
            final_answer_marker: "Final Answer:".into(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    pub api_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self { api_url: None, timeout_secs: 5 }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
