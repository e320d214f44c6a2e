use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::Value;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use tracing::{debug, info, warn};

use carassist_core::error::{Error, Result};
use carassist_core::traits::{ChunkSource, Retriever};
use carassist_core::types::{sort_hits, DocumentChunk, SearchHit, SourceKind};

use crate::tantivy_utils::{build_schema, register_tokenizer, LexicalFields};

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// BM25 model over one chunk set.
pub struct LexicalModel {
	index: Index,
	reader: IndexReader,
	fields: LexicalFields,
	len: usize,
}

impl LexicalModel {
	pub fn build(chunks: &[DocumentChunk]) -> Result<Self> {
		Self::try_build(chunks).map_err(|e| Error::Search(format!("building lexical index: {e}")))
	}

	fn try_build(chunks: &[DocumentChunk]) -> tantivy::Result<Self> {
		let (schema, fields) = build_schema();
		let index = Index::create_in_ram(schema);
		register_tokenizer(&index);
		// one indexing thread keeps a single segment in corpus order
		let mut index_writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
		for (ordinal, c) in chunks.iter().enumerate() {
			index_writer.add_document(doc!(
				fields.ordinal => ordinal as u64,
				fields.text => c.content.as_str(),
			))?;
		}
		index_writer.commit()?;
		let reader: IndexReader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
		Ok(Self { index, reader, fields, len: chunks.len() })
	}

	pub fn len(&self) -> usize { self.len }
	pub fn is_empty(&self) -> bool { self.len == 0 }

	pub fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> {
		self.try_query(text, k).map_err(|e| Error::Search(format!("lexical query: {e}")))
	}

	fn try_query(&self, text: &str, k: usize) -> tantivy::Result<Vec<SearchHit>> {
		if self.len == 0 {
			return Ok(vec![]);
		}
		let searcher = self.reader.searcher();
		let qp = QueryParser::for_index(&self.index, vec![self.fields.text]);
		let (q, errors) = qp.parse_query_lenient(text);
		if !errors.is_empty() {
			debug!(errors = errors.len(), "lenient query parse dropped terms");
		}
		// collect every match so equal scores can be ordered by ordinal before truncating
		let top_docs = searcher.search(&q, &TopDocs::with_limit(self.len))?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr)?;
			let Some(ordinal) = doc.get_first(self.fields.ordinal).and_then(|v| v.as_u64()) else {
				warn!(?addr, "lexical document without ordinal");
				continue;
			};
			hits.push(SearchHit { ordinal: ordinal as usize, score, source: SourceKind::Lexical });
		}
		sort_hits(&mut hits);
		hits.truncate(k);
		Ok(hits)
	}
}

/// Sparse retriever derived from the embedding index's chunk set. Built
/// lazily on first use and kept until [`LexicalRetriever::clear`].
#[derive(Default)]
pub struct LexicalRetriever {
	model: OnceLock<Arc<LexicalModel>>,
	init: Mutex<()>,
}

impl LexicalRetriever {
	pub fn new() -> Self { Self::default() }

	pub fn is_built(&self) -> bool { self.model.get().is_some() }

	/// Build the BM25 model from `source` unless already built.
	pub fn ensure_built(&self, source: &dyn ChunkSource) -> Result<()> {
		if self.model.get().is_some() {
			return Ok(());
		}
		let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);
		if self.model.get().is_some() {
			return Ok(());
		}
		let chunks = source.chunks().map_err(|e| match e {
			Error::NotLoaded => Error::DependencyUnavailable("embedding index is not loaded".into()),
			other => other,
		})?;
		let start = Instant::now();
		let model = LexicalModel::build(&chunks)?;
		info!(chunks = model.len(), elapsed_ms = start.elapsed().as_millis() as u64, "lexical index built");
		let _ = self.model.set(Arc::new(model));
		Ok(())
	}

	/// Drop the built model; the next `ensure_built` rebuilds it.
	pub fn clear(&mut self) {
		self.model.take();
	}

	pub fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> {
		let model = self.model.get().ok_or(Error::NotBuilt)?;
		if text.trim().is_empty() {
			return Err(Error::InvalidQuery("query text is empty".into()));
		}
		if k == 0 {
			return Err(Error::InvalidQuery("k must be positive".into()));
		}
		let hits = model.query(text, k)?;
		debug!(hits = hits.len(), k, "lexical query");
		Ok(hits)
	}
}

impl Retriever for LexicalRetriever {
	fn kind(&self) -> SourceKind { SourceKind::Lexical }
	fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> { LexicalRetriever::query(self, text, k) }
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Fixed(Option<Vec<DocumentChunk>>);

	impl ChunkSource for Fixed {
		fn chunks(&self) -> Result<Arc<[DocumentChunk]>> {
			self.0.clone().map(Into::into).ok_or(Error::NotLoaded)
		}
	}

	fn chunk(n: usize, content: &str) -> DocumentChunk {
		DocumentChunk { id: format!("m:0:{n}"), source: "m.txt".into(), page: None, chunk_index: n, content: content.into() }
	}

	fn corpus() -> Fixed {
		Fixed(Some(vec![
			chunk(0, "Check the tire pressure monthly."),
			chunk(1, "How to change a tire: loosen the lug nuts, jack up the car, swap the tire."),
			chunk(2, "Engine oil should be changed every 5000 miles."),
		]))
	}

	#[test]
	fn build_requires_a_loaded_index() {
		let r = LexicalRetriever::new();
		assert!(matches!(r.ensure_built(&Fixed(None)), Err(Error::DependencyUnavailable(_))));
		assert!(!r.is_built());
	}

	#[test]
	fn query_before_build_is_not_built() {
		let r = LexicalRetriever::new();
		assert!(matches!(r.query("tire", 3), Err(Error::NotBuilt)));
	}

	#[test]
	fn ranks_term_frequency_and_stems() {
		let r = LexicalRetriever::new();
		r.ensure_built(&corpus()).unwrap();
		let hits = r.query("changing tires", 3).unwrap();
		let order: Vec<_> = hits.iter().map(|h| h.ordinal).collect();
		assert_eq!(order[0], 1);
		assert!(order.contains(&0));
		assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
		assert!(hits.iter().all(|h| h.source == SourceKind::Lexical));
	}

	#[test]
	fn punctuation_does_not_fail_the_query() {
		let r = LexicalRetriever::new();
		r.ensure_built(&corpus()).unwrap();
		assert!(r.query("tire?? (pressure AND", 3).is_ok());
	}

	#[test]
	fn equal_scores_follow_corpus_order() {
		let r = LexicalRetriever::new();
		r.ensure_built(&Fixed(Some(vec![chunk(0, "brake pads"), chunk(1, "brake pads"), chunk(2, "brake pads")]))).unwrap();
		let order: Vec<_> = r.query("brake", 2).unwrap().iter().map(|h| h.ordinal).collect();
		assert_eq!(order, vec![0, 1]);
	}

	#[test]
	fn clear_forces_rebuild() {
		let mut r = LexicalRetriever::new();
		r.ensure_built(&corpus()).unwrap();
		r.clear();
		assert!(matches!(r.query("tire", 3), Err(Error::NotBuilt)));
		r.ensure_built(&Fixed(Some(vec![chunk(0, "wiper fluid")]))).unwrap();
		assert_eq!(r.query("wiper", 3).unwrap().len(), 1);
		assert!(r.query("tire", 3).unwrap().is_empty());
	}
}
