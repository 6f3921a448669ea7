//! Core analysis engine for JAW
//!
//! Consumes a Hybrid Property Graph (AST, CFG, PDG, call graph and event
//! graph of one webpage's JavaScript) and reports, for every request-issuing
//! sink, the program slices its arguments are built from, their semantic
//! types, and which event can reach the sink.

pub mod analysis;
pub mod artifacts;
pub mod beautify;
pub mod binding;
pub mod config;
pub mod graph;
pub mod pointer;
pub mod reach;
pub mod render;
pub mod report;
pub mod semantic;
pub mod sinks;
pub mod trace;

pub use analysis::{AnalysisEngine, PageContext, WebpageOutcome};
pub use graph::{GraphError, GraphService, InMemoryGraph, Node, NodeId, NodeType};
pub use semantic::{SemanticType, SemanticTypeSet};
