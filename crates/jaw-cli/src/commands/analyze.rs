//! Analyze command - runs the engine over every webpage of a site

use crate::output::SiteSummary;
use crate::output::json::JsonFormatter;
use crate::output::pretty::PrettyFormatter;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use jaw_core::artifacts::read_webpage_list;
use jaw_core::config::{
    ConfigResult, load_config_or_default_with_warnings, load_config_with_warnings,
};
use jaw_core::graph::csv::NODES_FILENAME;
use jaw_core::{AnalysisEngine, WebpageOutcome};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Site directory holding one sub-directory per webpage
    #[arg(value_name = "SITE_DIR")]
    pub site_dir: PathBuf,

    /// Configuration file (defaults to the nearest jaw.toml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of webpages analysed in parallel (defaults to one per core)
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Output format for the site summary (text, json)
    #[arg(short, long, default_value = "text")]
    pub format: String,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl AnalyzeArgs {
    pub fn run(&self) -> Result<()> {
        self.configure_colors();
        if !matches!(self.format.as_str(), "text" | "json") {
            anyhow::bail!("Invalid format '{}'. Valid values: text, json", self.format);
        }

        let config_result = self.load_config()?;
        for warning in &config_result.warnings {
            eprintln!("{} {}", "warning:".yellow().bold(), warning);
        }
        let config = config_result.config;

        let webpages = discover_webpages(&self.site_dir)?;
        if webpages.is_empty() {
            println!("No webpages found in {}.", self.site_dir.display());
            return Ok(());
        }

        let started = Instant::now();
        let site_deadline = started + config.budget.site_timeout();
        let engine = AnalysisEngine::new(config);
        info!(site = %self.site_dir.display(), webpages = webpages.len(), "analysing site");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs.unwrap_or(0))
            .build()
            .context("Failed to start worker pool")?;
        let results: Vec<Result<WebpageOutcome, String>> = pool.install(|| {
            webpages
                .par_iter()
                .map(|dir| {
                    if Instant::now() >= site_deadline {
                        warn!(webpage = %dir.display(), "site budget exhausted; not started");
                        return Err(webpage_name(dir));
                    }
                    Ok(engine.run_webpage(dir, Some(site_deadline)))
                })
                .collect()
        });

        let mut summary = SiteSummary {
            site: self.site_dir.display().to_string(),
            ..SiteSummary::default()
        };
        for result in results {
            match result {
                Ok(outcome) => summary.webpages.push(outcome),
                Err(skipped) => summary.skipped.push(skipped),
            }
        }
        summary.elapsed = started.elapsed();

        match self.format.as_str() {
            "json" => println!("{}", JsonFormatter::format(&summary)),
            _ => print!("{}", PrettyFormatter::format(&summary)),
        }
        Ok(())
    }

    fn load_config(&self) -> Result<ConfigResult> {
        match &self.config {
            Some(path) => Ok(load_config_with_warnings(path)?),
            None => Ok(load_config_or_default_with_warnings(&self.site_dir)),
        }
    }

    fn configure_colors(&self) {
        let no_color_env = std::env::var("NO_COLOR").is_ok();
        if self.no_color || no_color_env {
            colored::control::set_override(false);
        }
    }
}

/// Webpage directories of a site: the `webpages.json` listing when present,
/// otherwise every sub-directory holding an exported `nodes.csv`.
fn discover_webpages(site_dir: &Path) -> Result<Vec<PathBuf>> {
    if !site_dir.is_dir() {
        anyhow::bail!("Site directory does not exist: {}", site_dir.display());
    }

    let listed = read_webpage_list(site_dir)?;
    if !listed.is_empty() {
        let mut webpages = Vec::new();
        for name in listed {
            let dir = site_dir.join(&name);
            if dir.is_dir() {
                webpages.push(dir);
            } else {
                warn!(webpage = %name, "listed webpage directory is missing");
            }
        }
        return Ok(webpages);
    }

    let mut webpages: Vec<PathBuf> = WalkDir::new(site_dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter(|e| e.path().join(NODES_FILENAME).is_file())
        .map(|e| e.path().to_path_buf())
        .collect();
    webpages.sort();
    Ok(webpages)
}

fn webpage_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jaw_core::artifacts::{FLOWS_JSON_FILENAME, FLOWS_TEXT_FILENAME, WEBPAGES_FILENAME};
    use std::fs;
    use tempfile::tempdir;

    fn webpage(site: &Path, name: &str) -> PathBuf {
        let dir = site.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(NODES_FILENAME), "Id:ID¿Type\n").unwrap();
        dir
    }

    fn args(site: &Path, format: &str) -> AnalyzeArgs {
        AnalyzeArgs {
            site_dir: site.to_path_buf(),
            config: None,
            jobs: Some(2),
            format: format.to_string(),
            no_color: true,
        }
    }

    #[test]
    fn discovers_webpages_with_exported_graphs() {
        let site = tempdir().unwrap();
        let b = webpage(site.path(), "b");
        let a = webpage(site.path(), "a");
        fs::create_dir(site.path().join("no-graph")).unwrap();
        webpage(site.path(), ".cache");

        let found = discover_webpages(site.path()).unwrap();
        assert_eq!(found, vec![a, b]);
    }

    #[test]
    fn webpage_list_takes_precedence() {
        let site = tempdir().unwrap();
        webpage(site.path(), "a");
        let b = webpage(site.path(), "b");
        fs::write(site.path().join(WEBPAGES_FILENAME), r#"["b", "missing"]"#).unwrap();

        let found = discover_webpages(site.path()).unwrap();
        assert_eq!(found, vec![b]);
    }

    #[test]
    fn missing_site_is_an_error() {
        let site = tempdir().unwrap();
        assert!(discover_webpages(&site.path().join("nope")).is_err());
    }

    #[test]
    fn rejects_unknown_format() {
        let site = tempdir().unwrap();
        assert!(args(site.path(), "sarif").run().is_err());
    }

    #[test]
    fn run_writes_reports_for_every_webpage() {
        let site = tempdir().unwrap();
        let a = webpage(site.path(), "a");
        fs::write(a.join("rels.csv"), ":START_ID¿:END_ID¿:TYPE¿RelationType¿Arguments\n").unwrap();
        let broken = site.path().join("broken");
        fs::create_dir(&broken).unwrap();
        fs::write(broken.join(NODES_FILENAME), "Id:ID¿Type\nnot-a-number¿Program\n").unwrap();

        args(site.path(), "json").run().unwrap();

        assert!(a.join(FLOWS_JSON_FILENAME).exists());
        assert!(a.join(FLOWS_TEXT_FILENAME).exists());
        let stub = fs::read_to_string(broken.join(FLOWS_JSON_FILENAME)).unwrap();
        assert!(stub.starts_with("{\"error\":"));
    }
}
