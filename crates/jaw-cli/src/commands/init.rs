//! Init command - writes a default `jaw.toml`

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use jaw_core::config::{CONFIG_FILENAME, default_config_toml};
use std::fs;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory to write the configuration into (defaults to the current one)
    #[arg(value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Force overwrite existing configuration
    #[arg(short, long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(&self) -> Result<()> {
        let dir = self.dir.clone().unwrap_or_else(|| PathBuf::from("."));
        if !dir.is_dir() {
            anyhow::bail!("Directory does not exist: {}", dir.display());
        }
        let config_path = dir.join(CONFIG_FILENAME);

        if config_path.exists() && !self.force {
            anyhow::bail!(
                "Config file '{}' already exists. Use --force to overwrite.",
                config_path.display()
            );
        }

        fs::write(&config_path, default_config_toml())?;
        println!(
            "{} Created {} configuration file",
            "✓".green().bold(),
            config_path.display().to_string().cyan()
        );
        Ok(())
    }
}
