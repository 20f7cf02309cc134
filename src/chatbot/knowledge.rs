//! Static keyword knowledge base.
//!
//! Entries are kept in file order. Lookup returns the first entry with any
//! keyword contained in the (lowercased) message, so order matters.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("failed to read knowledge file '{}': {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse knowledge file '{}': {source}", .path.display())]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("knowledge entry {index} has no keywords")]
    NoKeywords { index: usize },
    #[error("knowledge entry {index} has an empty keyword")]
    EmptyKeyword { index: usize },
    #[error("knowledge entry {index} has an empty response")]
    EmptyResponse { index: usize },
}

/// One keyword-triggered canned response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KnowledgeEntry {
    pub keywords: Vec<String>,
    pub response: String,
    #[serde(default)]
    pub image: Option<PathBuf>,
}

impl KnowledgeEntry {
    fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|k| lowered.contains(k.as_str()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    entries: Vec<KnowledgeEntry>,
}

impl KnowledgeBase {
    /// Validate entries and lowercase their keywords.
    pub fn from_entries(entries: Vec<KnowledgeEntry>) -> Result<Self, KnowledgeError> {
        let mut normalized = Vec::with_capacity(entries.len());

        for (index, mut entry) in entries.into_iter().enumerate() {
            if entry.keywords.is_empty() {
                return Err(KnowledgeError::NoKeywords { index });
            }
            if entry.keywords.iter().any(|k| k.trim().is_empty()) {
                return Err(KnowledgeError::EmptyKeyword { index });
            }
            if entry.response.trim().is_empty() {
                return Err(KnowledgeError::EmptyResponse { index });
            }
            entry.keywords = entry.keywords.iter().map(|k| k.to_lowercase()).collect();
            normalized.push(entry);
        }

        Ok(Self { entries: normalized })
    }

    /// Load from a JSON array. Relative image paths resolve against the file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, KnowledgeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| KnowledgeError::ReadFile { path: path.to_path_buf(), source: e })?;
        let mut entries: Vec<KnowledgeEntry> = serde_json::from_str(&content)
            .map_err(|e| KnowledgeError::ParseJson { path: path.to_path_buf(), source: e })?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        for entry in &mut entries {
            if let Some(image) = entry.image.take() {
                let image = if image.is_relative() { base_dir.join(image) } else { image };
                if !image.exists() {
                    warn!("Knowledge image {} does not exist", image.display());
                }
                entry.image = Some(image);
            }
        }

        Self::from_entries(entries)
    }

    /// First entry (by definition order) with a keyword contained in `text`.
    pub fn find(&self, text: &str) -> Option<(usize, &KnowledgeEntry)> {
        let lowered = text.to_lowercase();
        self.entries
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.matches(&lowered))
    }

    pub fn entries(&self) -> &[KnowledgeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
