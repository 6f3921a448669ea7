//! Per-webpage flow report and its two on-disk renderings

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::artifacts::{ArtifactError, FLOWS_JSON_FILENAME, FLOWS_TEXT_FILENAME, write_file};
use crate::graph::NodeId;
use crate::reach::Reachability;
use crate::semantic::SemanticTypeSet;
use crate::trace::Slice;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceEntry {
    pub index: usize,
    pub loc: String,
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSlices {
    pub semantic_types: SemanticTypeSet,
    pub slices: Vec<SliceEntry>,
}

impl VariableSlices {
    pub fn new(semantic_types: SemanticTypeSet, slices: &[Slice]) -> Self {
        Self {
            semantic_types,
            slices: slices
                .iter()
                .enumerate()
                .map(|(index, slice)| SliceEntry {
                    index,
                    loc: slice.location.clone(),
                    code: slice.code.clone(),
                })
                .collect(),
        }
    }
}

/// One sink and everything traced back from its argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    pub webpage: String,
    pub script: String,
    pub semantic_types: SemanticTypeSet,
    pub node_id: NodeId,
    pub cfg_node_id: NodeId,
    pub loc: String,
    pub sink_type: String,
    pub sink_code: String,
    pub program_slices: BTreeMap<String, VariableSlices>,
    pub reachability: Reachability,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebpageReport {
    pub url: String,
    pub flows: Vec<Flow>,
}

/// Written in place of a report when a webpage could not be analysed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorStub {
    pub error: String,
}

impl WebpageReport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            flows: Vec::new(),
        }
    }

    pub fn partial_flows(&self) -> usize {
        self.flows.iter().filter(|f| f.partial).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "[*] url: {}", self.url);
        let _ = writeln!(out, "[*] flows: {}", self.flows.len());
        for flow in &self.flows {
            let _ = writeln!(out);
            let _ = writeln!(out, "[sink] {} @ {} (node {})", flow.sink_type, flow.loc, flow.node_id);
            let _ = writeln!(out, "  webpage: {}", flow.webpage);
            let _ = writeln!(out, "  script: {}", flow.script);
            let _ = writeln!(out, "  code: {}", flow.sink_code);
            let _ = writeln!(out, "  cfg node: {}", flow.cfg_node_id);
            let _ = writeln!(out, "  semantic types: {}", flow.semantic_types);
            let _ = writeln!(out, "  reachability: {}", flow.reachability.label());
            if let Reachability::Witnesses(witnesses) = &flow.reachability {
                for witness in witnesses {
                    let _ = writeln!(
                        out,
                        "    <- {} (call {}, top {})",
                        witness.verdict, witness.call_expr_id, witness.top_expr_id
                    );
                }
            }
            if flow.partial {
                let _ = writeln!(out, "  partial: true");
            }
            for (variable, slices) in &flow.program_slices {
                let _ = writeln!(out, "  [{variable}] {}", slices.semantic_types);
                for entry in &slices.slices {
                    let _ = writeln!(out, "    {:>3} {:<12} {}", entry.index, entry.loc, entry.code);
                }
            }
        }
        out
    }

    /// Writes `sinks.flows.out` and `sinks.flows.out.json` into `dir`.
    pub fn write(&self, dir: &Path) -> Result<(), ArtifactError> {
        let json = self.to_json().map_err(|source| ArtifactError::Parse {
            path: dir.join(FLOWS_JSON_FILENAME),
            source,
        })?;
        write_file(&dir.join(FLOWS_JSON_FILENAME), &json)?;
        write_file(&dir.join(FLOWS_TEXT_FILENAME), &self.to_text())
    }
}

impl ErrorStub {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    pub fn write(&self, dir: &Path) -> Result<(), ArtifactError> {
        let json = serde_json::to_string(self).map_err(|source| ArtifactError::Parse {
            path: dir.join(FLOWS_JSON_FILENAME),
            source,
        })?;
        write_file(&dir.join(FLOWS_TEXT_FILENAME), &json)?;
        write_file(&dir.join(FLOWS_JSON_FILENAME), &json)
    }
}
