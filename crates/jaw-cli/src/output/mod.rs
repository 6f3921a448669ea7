//! Site-level summaries printed after `jaw analyze`

pub mod json;
pub mod pretty;

use std::time::Duration;

use jaw_core::WebpageOutcome;

/// Outcome of one `analyze` invocation over a site directory.
#[derive(Debug, Default)]
pub struct SiteSummary {
    pub site: String,
    pub webpages: Vec<WebpageOutcome>,
    /// Webpages never started because the site budget ran out.
    pub skipped: Vec<String>,
    pub elapsed: Duration,
}

impl SiteSummary {
    pub fn flows(&self) -> usize {
        self.webpages.iter().map(|w| w.flows).sum()
    }

    pub fn partial_flows(&self) -> usize {
        self.webpages.iter().map(|w| w.partial).sum()
    }

    pub fn failed(&self) -> usize {
        self.webpages.iter().filter(|w| w.error.is_some()).count()
    }

    pub fn points_to_edges(&self) -> usize {
        self.webpages.iter().map(|w| w.points_to_edges).sum()
    }
}

#[cfg(test)]
pub(crate) fn sample_summary() -> SiteSummary {
    SiteSummary {
        site: "data/example.com".to_string(),
        webpages: vec![
            WebpageOutcome {
                webpage: "page-a".to_string(),
                flows: 3,
                partial: 1,
                points_to_edges: 2,
                error: None,
            },
            WebpageOutcome {
                webpage: "page-b".to_string(),
                error: Some("Failed to read 'nodes.csv'".to_string()),
                ..WebpageOutcome::default()
            },
        ],
        skipped: vec!["page-c".to_string()],
        elapsed: Duration::from_millis(1500),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_add_up_over_webpages() {
        let summary = sample_summary();
        assert_eq!(summary.flows(), 3);
        assert_eq!(summary.partial_flows(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.points_to_edges(), 2);
    }
}
