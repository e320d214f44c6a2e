use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use carassist_core::config::Settings;
use carassist_core::error::{Error, Result};
use carassist_core::traits::Embedder;
use carassist_embed::build_embedder;
use carassist_text::LexicalRetriever;
use carassist_vector::{EmbeddingIndex, LanceChunkStore};

use crate::fusion::{FusionParams, FusionRetriever};

pub const NOT_INITIALIZED_MESSAGE: &str = "Knowledge base not initialized. Please ensure the embedding index exists (run `carassist ingest`).";
pub const NO_INFORMATION_MESSAGE: &str = "The PDF documents do not contain specific information about this topic.";

/// A retrieved chunk ready for display.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub file_name: String,
    pub page: Option<u32>,
    pub content: String,
    pub score: f32,
}

impl Passage {
    pub fn format_block(&self) -> String {
        let page = self.page.map_or_else(|| "N/A".to_string(), |p| p.to_string());
        format!("📄 [{} - page {}]\n{}", self.file_name, page, self.content)
    }
}

pub fn format_passages(passages: &[Passage]) -> String {
    passages.iter().map(Passage::format_block).collect::<Vec<_>>().join("\n\n")
}

/// The shared retrieval context: dense index, lexical retriever and fusion
/// parameters. Initialises itself on first search and lives for the process.
pub struct KnowledgeBase {
    index: EmbeddingIndex,
    lexical: LexicalRetriever,
    params: FusionParams,
}

impl KnowledgeBase {
    pub fn new(index: EmbeddingIndex, params: FusionParams) -> Self {
        Self { index, lexical: LexicalRetriever::new(), params }
    }

    /// Knowledge base over the LanceDB store named in `settings`, with
    /// relative paths resolved against `base`.
    pub fn from_settings(settings: &Settings, base: &Path) -> anyhow::Result<Self> {
        let embedder = build_embedder(&settings.embedding)?;
        Ok(Self::with_embedder(settings, base, embedder))
    }

    pub fn with_embedder(settings: &Settings, base: &Path, embedder: Arc<dyn Embedder>) -> Self {
        let k = &settings.knowledge;
        let store_path = carassist_core::config::resolve_with_base(base, &k.store_path);
        let store = LanceChunkStore::new(store_path, k.table.clone());
        let index = EmbeddingIndex::new(Arc::new(store), embedder).with_min_similarity(k.min_similarity);
        Self::new(index, FusionParams::from(k))
    }

    pub fn params(&self) -> &FusionParams { &self.params }
    pub fn index(&self) -> &EmbeddingIndex { &self.index }

    /// Load the embedding index and build the lexical retriever over it.
    /// Both steps run at most once.
    pub fn initialize(&self) -> Result<()> {
        if self.index.load()?.is_none() {
            return Err(Error::DependencyUnavailable("no persisted embedding index".into()));
        }
        self.lexical.ensure_built(&self.index)
    }

    /// Fused passages for `query`, most relevant first.
    pub fn search(&self, query: &str) -> Result<Vec<Passage>> {
        self.initialize()?;
        let corpus = self.index.corpus()?;
        let fused = FusionRetriever::new(&self.lexical, &self.index, self.params).search(query)?;
        Ok(fused
            .iter()
            .filter_map(|hit| {
                corpus.chunk(hit.ordinal).map(|c| Passage {
                    file_name: c.file_name().to_string(),
                    page: c.page,
                    content: c.content.trim().to_string(),
                    score: hit.score,
                })
            })
            .collect())
    }

    /// Tool entry point: always answers with text.
    pub fn search_pdf_knowledge(&self, query: &str) -> String {
        info!(query, "searching PDF knowledge base");
        if query.trim().is_empty() {
            return NO_INFORMATION_MESSAGE.to_string();
        }
        match self.search(query) {
            Ok(passages) if passages.is_empty() => {
                info!("no relevant passages found");
                NO_INFORMATION_MESSAGE.to_string()
            }
            Ok(passages) => {
                info!(passages = passages.len(), "found relevant passages");
                format_passages(&passages)
            }
            Err(e) if e.is_dependency() => {
                warn!(error = %e, "knowledge base unavailable");
                NOT_INITIALIZED_MESSAGE.to_string()
            }
            Err(e) => {
                warn!(error = %e, "error searching documents");
                format!("Error searching documents: {e}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_shows_file_and_page() {
        let p = Passage { file_name: "manual.pdf".into(), page: Some(12), content: "Loosen the lug nuts.".into(), score: 1.0 };
        assert_eq!(p.format_block(), "📄 [manual.pdf - page 12]\nLoosen the lug nuts.");
    }

    #[test]
    fn missing_page_reads_na_and_blocks_are_blank_line_separated() {
        let a = Passage { file_name: "a.txt".into(), page: None, content: "one".into(), score: 0.9 };
        let b = Passage { file_name: "b.pdf".into(), page: Some(1), content: "two".into(), score: 0.5 };
        assert_eq!(format_passages(&[a, b]), "📄 [a.txt - page N/A]\none\n\n📄 [b.pdf - page 1]\ntwo");
    }
}
