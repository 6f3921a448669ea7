//! CLI command implementations

pub mod analyze;
pub mod explain;
pub mod init;

pub use analyze::AnalyzeArgs;
pub use explain::ExplainArgs;
pub use init::InitArgs;

use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyse every webpage of a crawled site
    Analyze(AnalyzeArgs),

    /// Write a default jaw.toml
    Init(InitArgs),

    /// Describe a semantic type
    Explain(ExplainArgs),
}
