//! Explain command - describes an entry of the semantic-type vocabulary

use clap::Args;
use colored::Colorize;
use jaw_core::semantic::SemanticType;
use jaw_core::sinks::SinkFamily;

#[derive(Args, Debug)]
pub struct ExplainArgs {
    #[arg(
        value_name = "SEMANTIC_TYPE",
        help = "Semantic type to explain (e.g. \"RD_WIN_LOC\", \"wr_req_url\")"
    )]
    pub semantic_type: String,
}

impl ExplainArgs {
    pub fn run(&self) -> anyhow::Result<()> {
        match resolve(&self.semantic_type) {
            Some(ty) => {
                println!();
                println!("{}", ty.as_str().bold());
                println!();
                println!("  {}: {}", "description".cyan(), ty.description());
                let kind = if ty == SemanticType::NonReach {
                    "none"
                } else if ty.is_source() {
                    "source"
                } else {
                    "sink"
                };
                println!("  {}: {}", "kind".cyan(), kind);

                let families = sink_families(ty);
                if !families.is_empty() {
                    println!();
                    println!("  {}:", "sink families".cyan());
                    for family in families {
                        println!("    {family}");
                    }
                }
                println!();
                Ok(())
            }
            None => {
                eprintln!(
                    "{} unknown semantic type '{}'",
                    "error:".red().bold(),
                    self.semantic_type
                );
                eprintln!();
                eprintln!("Available semantic types:");
                for ty in SemanticType::ALL {
                    eprintln!("  {} ({})", ty.as_str(), ty.description());
                }
                std::process::exit(1);
            }
        }
    }
}

/// Looks a type up by its report name, ignoring case and `-`/`_` differences.
fn resolve(name: &str) -> Option<SemanticType> {
    let normalised = name.trim().to_ascii_uppercase().replace('-', "_");
    SemanticType::from_name(&normalised)
}

fn sink_families(ty: SemanticType) -> Vec<SinkFamily> {
    SinkFamily::ALL
        .into_iter()
        .filter(|family| family.semantic_type() == ty)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_report_names_case_insensitively() {
        assert_eq!(resolve("RD_WIN_LOC"), Some(SemanticType::RdWinLoc));
        assert_eq!(resolve("wr-req-url"), Some(SemanticType::WrReqUrl));
        assert_eq!(resolve(" rd_pm "), Some(SemanticType::RdPm));
    }

    #[test]
    fn unknown_names_do_not_resolve() {
        assert_eq!(resolve("RD_NOTHING"), None);
    }

    #[test]
    fn write_types_list_their_sink_families() {
        let families = sink_families(SemanticType::WrWebsocketUrl);
        assert_eq!(families, vec![SinkFamily::WebSocket]);

        let url_families = sink_families(SemanticType::WrReqUrl);
        assert!(url_families.contains(&SinkFamily::Fetch));
        assert!(url_families.contains(&SinkFamily::XhrOpen));
    }

    #[test]
    fn source_types_have_no_sink_families() {
        assert!(sink_families(SemanticType::RdCookie).is_empty());
    }
}
