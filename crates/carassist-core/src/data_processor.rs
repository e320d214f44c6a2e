//! Document ingestion: walk a directory of `.txt`/`.pdf` files and cut each
//! page into fixed-size, overlapping character windows.
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

use crate::config::IngestSettings;
use crate::types::DocumentChunk;

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Window length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive windows.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 1000, overlap: 100 }
    }
}

impl From<&IngestSettings> for ChunkingConfig {
    fn from(s: &IngestSettings) -> Self {
        Self { chunk_size: s.chunk_size, overlap: s.chunk_overlap }
    }
}

/// One extracted page; `number` is `None` for unpaged sources.
struct Page {
    number: Option<u32>,
    text: String,
}

#[derive(Default)]
pub struct DataProcessor {
    chunking_config: ChunkingConfig,
}

impl DataProcessor {
    pub fn new() -> Self { Self::default() }

    pub fn with_config(chunking_config: ChunkingConfig) -> Self {
        Self { chunking_config }
    }

    pub fn process_directory(&self, data_dir: &Path) -> Result<Vec<DocumentChunk>> {
        let files = self.list_source_files(data_dir);
        if files.is_empty() {
            warn!(dir = %data_dir.display(), "no .txt or .pdf files found");
            return Ok(vec![]);
        }
        let mut all_chunks = Vec::new();
        for (file_index, file_path) in files.iter().enumerate() {
            info!(file = %file_path.display(), "processing file {}/{}", file_index + 1, files.len());
            let pages = match self.extract_pages(file_path) {
                Ok(pages) => pages,
                Err(e) => {
                    warn!(file = %file_path.display(), error = %e, "skipping unreadable document");
                    continue;
                }
            };
            all_chunks.extend(self.chunk_pages(file_path, &pages));
        }
        info!(files = files.len(), chunks = all_chunks.len(), "processed documents");
        Ok(all_chunks)
    }

    fn extract_pages(&self, file_path: &Path) -> Result<Vec<Page>> {
        match file_path.extension().and_then(|s| s.to_str()) {
            Some("pdf") => {
                let text = extract_pdf_text(file_path)?;
                Ok(text
                    .split('\x0c')
                    .enumerate()
                    .map(|(i, text)| Page { number: Some(i as u32 + 1), text: text.to_string() })
                    .collect())
            }
            _ => Ok(vec![Page { number: None, text: self.read_file_content(file_path)? }]),
        }
    }

    fn read_file_content(&self, file_path: &Path) -> Result<String> {
        match fs::read_to_string(file_path) {
            Ok(content) => Ok(content),
            Err(_) => Ok(String::from_utf8_lossy(&fs::read(file_path)?).to_string()),
        }
    }

    fn chunk_pages(&self, file_path: &Path, pages: &[Page]) -> Vec<DocumentChunk> {
        let stem = file_path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        let source = file_path.to_string_lossy().to_string();
        let mut chunks = Vec::new();
        for page in pages {
            for (chunk_index, content) in self.split_with_overlap(&page.text).into_iter().enumerate() {
                chunks.push(DocumentChunk {
                    id: format!("{}:{}:{}", stem, page.number.unwrap_or(0), chunk_index),
                    source: source.clone(),
                    page: page.number,
                    chunk_index,
                    content,
                });
            }
        }
        chunks
    }

    /// Cut `text` into windows of at most `chunk_size` characters, preferring
    /// a whitespace boundary in the second half of each window.
    pub fn split_with_overlap(&self, text: &str) -> Vec<String> {
        let size = self.chunking_config.chunk_size.max(1);
        let overlap = self.chunking_config.overlap.min(size - 1);
        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let mut end = (start + size).min(chars.len());
            if end < chars.len() {
                let floor = (start + size / 2).max(start + overlap + 1);
                if let Some(ws) = (floor..end).rev().find(|&i| chars[i].is_whitespace()) {
                    end = ws;
                }
            }
            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() { chunks.push(piece.to_string()); }
            if end >= chars.len() { break; }
            start = if end > start + overlap { end - overlap } else { end };
        }
        chunks
    }

    fn list_source_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()) {
            let path = entry.path();
            if matches!(path.extension().and_then(|s| s.to_str()), Some("txt") | Some("pdf")) { files.push(path.to_path_buf()); }
        }
        files.sort(); files
    }
}

/// Extract text with the poppler `pdftotext` binary; pages are separated by
/// form feeds in its output.
fn extract_pdf_text(path: &Path) -> Result<String> {
    let output = Command::new("pdftotext")
        .arg("-layout")
        .arg(path)
        .arg("-")
        .output()
        .with_context(|| format!("pdftotext command failed for {} (is poppler installed?)", path.display()))?;
    if !output.status.success() {
        return Err(anyhow!("pdftotext failed: {}", String::from_utf8_lossy(&output.stderr).trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(chunk_size: usize, overlap: usize) -> DataProcessor {
        DataProcessor::with_config(ChunkingConfig { chunk_size, overlap })
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(processor(100, 10).split_with_overlap("  Short text \n"), vec!["Short text"]);
    }

    #[test]
    fn windows_respect_size_and_overlap() {
        let text = "aaaa bbbb cccc dddd eeee ffff";
        let chunks = processor(10, 5).split_with_overlap(text);
        assert!(chunks.len() > 1);
        for c in &chunks { assert!(c.chars().count() <= 10, "chunk too long: {c:?}"); }
        assert!(chunks.first().unwrap().starts_with("aaaa"));
        assert!(chunks.last().unwrap().ends_with("ffff"));
        // consecutive windows share text
        assert!(chunks.windows(2).all(|w| w[1].split_whitespace().next().is_some_and(|t| w[0].contains(t))));
    }

    #[test]
    fn text_without_whitespace_is_hard_split() {
        let chunks = processor(4, 0).split_with_overlap("abcdefghij");
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn blank_text_yields_nothing() {
        assert!(processor(10, 2).split_with_overlap("   \n\t ").is_empty());
    }
}
