//! Livery catalog (`LiveriesList.txt`)
//!
//! A line-oriented list of display names and download URLs. Lines may be
//! wrapped in quotes, optionally followed by a comma. Lines starting with
//! `http` are URLs; everything else is a name. Names and URLs pair up in
//! order.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

/// File name of the catalog beside the executable
pub const CATALOG_FILE_NAME: &str = "LiveriesList.txt";

/// Catalog parse errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Livery name count ({names}) does not match download link count ({urls})")]
    CountMismatch { names: usize, urls: usize },
}

/// One installable livery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Livery {
    pub name: String,
    pub url: String,
}

/// Parsed catalog, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveryCatalog {
    liveries: Vec<Livery>,
}

impl LiveryCatalog {
    /// Parse catalog text
    pub fn parse(text: &str) -> Result<Self, CatalogError> {
        let mut names = Vec::new();
        let mut urls = Vec::new();

        for line in text.lines() {
            let line = unquote(line.trim());
            if line.is_empty() {
                continue;
            }
            if line.starts_with("http") {
                urls.push(line.to_string());
            } else {
                names.push(line.to_string());
            }
        }

        if names.len() != urls.len() {
            return Err(CatalogError::CountMismatch {
                names: names.len(),
                urls: urls.len(),
            });
        }

        let liveries = names
            .into_iter()
            .zip(urls)
            .map(|(name, url)| Livery { name, url })
            .collect();
        Ok(Self { liveries })
    }

    /// Load from disk; a missing file is an empty catalog
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        Self::parse(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn liveries(&self) -> &[Livery] {
        &self.liveries
    }

    pub fn len(&self) -> usize {
        self.liveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.liveries.is_empty()
    }

    /// First livery with this exact name
    pub fn find(&self, name: &str) -> Option<&Livery> {
        self.liveries.iter().find(|l| l.name == name)
    }
}

/// Strip `"..."` or `"...",` around a line
fn unquote(line: &str) -> &str {
    if let Some(inner) = line.strip_prefix('"') {
        if let Some(inner) = inner.strip_suffix("\",") {
            return inner.trim();
        }
        if let Some(inner) = inner.strip_suffix('"') {
            return inner.trim();
        }
    }
    line
}
