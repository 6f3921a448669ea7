//! Configuration loading and parsing for JAW
//!
//! Provides functionality to load and parse `jaw.toml` configuration files.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "jaw.toml";

pub const DEFAULT_MAX_DEPTH: usize = 100;
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 45 * 60;
pub const DEFAULT_SITE_TIMEOUT_SECS: u64 = 24 * 60 * 60;

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &["trace", "budget", "pointer", "sources", "sinks"];
const KNOWN_SECTION_KEYS: &[(&str, &[&str])] = &[
    ("trace", &["max_depth", "beautify", "extra_builtins"]),
    ("budget", &["run_timeout_secs", "site_timeout_secs"]),
    ("pointer", &["materialise"]),
    ("sources", &["domclob", "document_variables"]),
    ("sinks", &["disabled"]),
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid TOML in '{path}': {message}")]
    ParseError { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Default)]
pub struct ConfigResult {
    pub config: Config,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub trace: TraceConfig,
    pub budget: BudgetConfig,
    pub pointer: PointerConfig,
    pub sources: SourcesConfig,
    pub sinks: SinksConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TraceConfig {
    pub max_depth: usize,
    pub beautify: bool,
    pub extra_builtins: Vec<String>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            beautify: true,
            extra_builtins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BudgetConfig {
    pub run_timeout_secs: u64,
    pub site_timeout_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: DEFAULT_RUN_TIMEOUT_SECS,
            site_timeout_secs: DEFAULT_SITE_TIMEOUT_SECS,
        }
    }
}

impl BudgetConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn site_timeout(&self) -> Duration {
        Duration::from_secs(self.site_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PointerConfig {
    pub materialise: bool,
}

impl Default for PointerConfig {
    fn default() -> Self {
        Self { materialise: true }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourcesConfig {
    pub domclob: Vec<String>,
    pub document_variables: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SinksConfig {
    pub disabled: Vec<String>,
}

pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();
    loop {
        let config_path = current.join(CONFIG_FILENAME);
        if config_path.exists() {
            return Some(config_path);
        }
        if !current.pop() {
            return None;
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    Ok(load_config_with_warnings(path)?.config)
}

pub fn load_config_with_warnings(path: &Path) -> Result<ConfigResult, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.message().to_string(),
    })?;

    let warnings = detect_unknown_keys(&content);

    Ok(ConfigResult { config, warnings })
}

fn detect_unknown_keys(content: &str) -> Vec<String> {
    let mut warnings = Vec::new();

    let table: toml::Table = match content.parse() {
        Ok(t) => t,
        Err(_) => return warnings,
    };

    let known_top: HashSet<&str> = KNOWN_TOP_LEVEL_KEYS.iter().copied().collect();
    for key in table.keys() {
        if !known_top.contains(key.as_str()) {
            warnings.push(format!("Unknown config option: '{}'", key));
        }
    }

    for (section, known) in KNOWN_SECTION_KEYS {
        if let Some(toml::Value::Table(values)) = table.get(*section) {
            for key in values.keys() {
                if !known.contains(&key.as_str()) {
                    warnings.push(format!("Unknown config option in [{section}]: '{key}'"));
                }
            }
        }
    }

    warnings
}

pub fn load_config_or_default_with_warnings(start_dir: &Path) -> ConfigResult {
    match find_config_file(start_dir) {
        Some(path) => load_config_with_warnings(&path).unwrap_or_default(),
        None => ConfigResult::default(),
    }
}

/// Contents written by `jaw init`.
pub fn default_config_toml() -> String {
    format!(
        r#"[trace]
max_depth = {DEFAULT_MAX_DEPTH}
beautify = true
extra_builtins = []

[budget]
run_timeout_secs = {DEFAULT_RUN_TIMEOUT_SECS}
site_timeout_secs = {DEFAULT_SITE_TIMEOUT_SECS}

[pointer]
materialise = true

[sources]
domclob = []
document_variables = []

[sinks]
disabled = []
"#
    )
}
