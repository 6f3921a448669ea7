//! Pretty formatter for human-readable terminal output
//!
//! One line per webpage followed by a site summary.

use colored::{ColoredString, Colorize};
use jaw_core::WebpageOutcome;

use super::SiteSummary;

pub struct PrettyFormatter;

impl PrettyFormatter {
    pub fn format(summary: &SiteSummary) -> String {
        let mut output = String::new();

        for outcome in &summary.webpages {
            output.push_str(&Self::format_webpage(outcome));
            output.push('\n');
        }
        for webpage in &summary.skipped {
            output.push_str(&format!("{} {}\n", Self::status("skipped"), webpage.dimmed()));
        }

        output.push_str(&Self::format_summary(summary));
        output
    }

    fn format_webpage(outcome: &WebpageOutcome) -> String {
        if let Some(error) = &outcome.error {
            return format!("{} {}: {}", Self::status("error"), outcome.webpage, error);
        }

        let mut line = format!(
            "{} {}: {} {}",
            Self::status("ok"),
            outcome.webpage,
            outcome.flows.to_string().bold(),
            plural(outcome.flows, "flow", "flows")
        );
        if outcome.partial > 0 {
            line.push_str(&format!(" ({})", format!("{} partial", outcome.partial).yellow()));
        }
        if outcome.points_to_edges > 0 {
            line.push_str(&format!(
                ", {} pointsTo {}",
                outcome.points_to_edges,
                plural(outcome.points_to_edges, "edge", "edges")
            ));
        }
        line
    }

    fn status(kind: &str) -> ColoredString {
        match kind {
            "ok" => "✓".green().bold(),
            "error" => "✗".red().bold(),
            _ => "-".yellow().bold(),
        }
    }

    fn format_summary(summary: &SiteSummary) -> String {
        let analysed = summary.webpages.len() - summary.failed();
        let mut parts = vec![format!(
            "{} {}",
            analysed,
            plural(analysed, "webpage analysed", "webpages analysed")
        )];
        if summary.failed() > 0 {
            parts.push(format!("{} failed", summary.failed()).red().to_string());
        }
        if !summary.skipped.is_empty() {
            parts.push(
                format!("{} skipped", summary.skipped.len())
                    .yellow()
                    .to_string(),
            );
        }

        format!(
            "\n{}: {} {} ({}) in {:.1}s\n",
            summary.site.cyan(),
            summary.flows().to_string().bold(),
            plural(summary.flows(), "flow", "flows"),
            parts.join(", "),
            summary.elapsed.as_secs_f64()
        )
    }
}

fn plural<'a>(count: usize, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 { one } else { many }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::sample_summary;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn lists_each_webpage() {
        plain();
        let output = PrettyFormatter::format(&sample_summary());

        assert!(output.contains("✓ page-a: 3 flows (1 partial), 2 pointsTo edges"));
        assert!(output.contains("✗ page-b: Failed to read 'nodes.csv'"));
        assert!(output.contains("- page-c"));
    }

    #[test]
    fn summary_counts_outcomes() {
        plain();
        let output = PrettyFormatter::format(&sample_summary());

        assert!(output.contains(
            "data/example.com: 3 flows (1 webpage analysed, 1 failed, 1 skipped) in 1.5s"
        ));
    }

    #[test]
    fn singular_forms() {
        plain();
        let outcome = WebpageOutcome {
            webpage: "only".to_string(),
            flows: 1,
            ..WebpageOutcome::default()
        };
        assert_eq!(PrettyFormatter::format_webpage(&outcome), "✓ only: 1 flow");
    }
}
