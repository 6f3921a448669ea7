//! JSON output for scripting around `jaw analyze`

use jaw_core::WebpageOutcome;
use serde::Serialize;

use super::SiteSummary;

#[derive(Serialize)]
pub struct JsonOutput<'a> {
    pub version: &'static str,
    pub metadata: JsonMetadata<'a>,
    pub summary: JsonSummary,
    pub webpages: &'a [WebpageOutcome],
    pub skipped: &'a [String],
}

#[derive(Serialize)]
pub struct JsonMetadata<'a> {
    pub jaw_version: &'static str,
    pub site: &'a str,
    pub elapsed_ms: u64,
}

#[derive(Serialize)]
pub struct JsonSummary {
    pub total_webpages: usize,
    pub analysed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub flows: usize,
    pub partial_flows: usize,
    pub points_to_edges: usize,
}

pub struct JsonFormatter;

impl JsonFormatter {
    pub fn format(summary: &SiteSummary) -> String {
        let output = JsonOutput {
            version: "1.0",
            metadata: JsonMetadata {
                jaw_version: env!("CARGO_PKG_VERSION"),
                site: &summary.site,
                elapsed_ms: u64::try_from(summary.elapsed.as_millis()).unwrap_or(u64::MAX),
            },
            summary: JsonSummary {
                total_webpages: summary.webpages.len() + summary.skipped.len(),
                analysed: summary.webpages.len() - summary.failed(),
                failed: summary.failed(),
                skipped: summary.skipped.len(),
                flows: summary.flows(),
                partial_flows: summary.partial_flows(),
                points_to_edges: summary.points_to_edges(),
            },
            webpages: &summary.webpages,
            skipped: &summary.skipped,
        };
        serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::sample_summary;

    #[test]
    fn format_produces_valid_json_with_totals() {
        let json = JsonFormatter::format(&sample_summary());
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["version"], "1.0");
        assert_eq!(value["metadata"]["site"], "data/example.com");
        assert_eq!(value["metadata"]["elapsed_ms"], 1500);
        assert_eq!(value["summary"]["total_webpages"], 3);
        assert_eq!(value["summary"]["analysed"], 1);
        assert_eq!(value["summary"]["failed"], 1);
        assert_eq!(value["summary"]["skipped"], 1);
        assert_eq!(value["summary"]["flows"], 3);
    }

    #[test]
    fn format_lists_webpage_outcomes() {
        let json = JsonFormatter::format(&sample_summary());
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        let webpages = value["webpages"].as_array().unwrap();
        assert_eq!(webpages.len(), 2);
        assert_eq!(webpages[0]["webpage"], "page-a");
        assert!(webpages[0].get("error").is_none());
        assert_eq!(webpages[1]["error"], "Failed to read 'nodes.csv'");
        assert_eq!(value["skipped"][0], "page-c");
    }
}
