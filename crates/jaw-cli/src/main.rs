//! JAW CLI - Command-line interface for the JAW analysis engine
//!
//! Runs sink discovery, back-tracing and reachability over the hybrid
//! property graphs of a crawled site and writes a flow report per webpage.

mod commands;
mod logging;
mod output;

use clap::Parser;
use commands::Commands;
use logging::LoggingArgs;

#[derive(Parser, Debug)]
#[command(
    name = "jaw",
    author,
    version,
    about = "Static request-hijacking and client-side CSRF analysis over HPGs",
    long_about = "JAW analyses the hybrid property graphs of a crawled site.\n\n\
                  For every request-like sink it back-traces the values flowing into\n\
                  its arguments, tags them with the attacker-controllable sources they\n\
                  read, and reports which event can reach the sink."
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Commands,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init_logging(&cli.logging);

    match cli.command {
        Commands::Analyze(args) => args.run(),
        Commands::Init(args) => args.run(),
        Commands::Explain(args) => args.run(),
    }
}
