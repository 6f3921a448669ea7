//! Per-webpage input artefacts written by the crawler and HPG exporter

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::graph::NodeId;

pub const WEBPAGES_FILENAME: &str = "webpages.json";
pub const URL_FILENAME: &str = "url.out";
pub const SOURCES_FILENAME: &str = "sources.out.json";
pub const SINKS_FILENAME: &str = "sinks.out.json";
pub const FLOWS_TEXT_FILENAME: &str = "sinks.flows.out";
pub const FLOWS_JSON_FILENAME: &str = "sinks.flows.out.json";

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid JSON in '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A DOM-clobbering candidate name and the HTML element it comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// A pre-extracted sink node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkEntry {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebpageArtifacts {
    pub url: String,
    pub sources: Vec<SourceEntry>,
    /// `None` when no pre-extracted sink list exists; the whole graph is scanned.
    pub sinks: Option<Vec<SinkEntry>>,
}

impl WebpageArtifacts {
    /// Loads the optional artefacts of one webpage directory. Missing files
    /// are defaults; present but malformed files are errors.
    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        let url_path = dir.join(URL_FILENAME);
        let url = if url_path.exists() {
            read(&url_path)?.trim().to_string()
        } else {
            String::new()
        };
        let sources = read_json_opt(&dir.join(SOURCES_FILENAME))?.unwrap_or_default();
        let sinks = read_json_opt(&dir.join(SINKS_FILENAME))?;
        Ok(Self { url, sources, sinks })
    }

    /// Names of `document.<name>` sources, used as DOM-read fingerprints.
    pub fn document_variables(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter_map(|s| s.name.strip_prefix("document."))
            .map(str::to_string)
            .collect()
    }

    pub fn sink_ids(&self) -> Option<Vec<NodeId>> {
        self.sinks
            .as_ref()
            .map(|sinks| sinks.iter().map(|s| s.id).collect())
    }
}

/// Webpage directory names of a site; falls back to an empty list when the
/// site has no `webpages.json`.
pub fn read_webpage_list(site_dir: &Path) -> Result<Vec<String>, ArtifactError> {
    Ok(read_json_opt(&site_dir.join(WEBPAGES_FILENAME))?.unwrap_or_default())
}

pub fn write_file(path: &Path, content: &str) -> Result<(), ArtifactError> {
    fs::write(path, content).map_err(|source| ArtifactError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn read(path: &Path) -> Result<String, ArtifactError> {
    fs::read_to_string(path).map_err(|source| ArtifactError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ArtifactError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = read(path)?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| ArtifactError::Parse {
            path: path.to_path_buf(),
            source,
        })
}
