//! Per-webpage analysis driver
//!
//! Ties the sink scanner, back-tracer, semantic tagger and reachability
//! analyser together. A run never fails: graph errors mark the affected flow
//! as partial, and unreadable inputs produce an error stub on disk.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::artifacts::{SourceEntry, WebpageArtifacts};
use crate::config::Config;
use crate::graph::{GraphError, GraphService, InMemoryGraph, NodeId, csv};
use crate::reach::{Reachability, ReachabilityAnalyser};
use crate::render::{ExpressionRenderer, Rendered, THIS_IDENTIFIER};
use crate::report::{ErrorStub, Flow, VariableSlices, WebpageReport};
use crate::semantic::FingerprintRegistry;
use crate::sinks::{SinkCandidate, SinkFamily, SinkScanner};
use crate::trace::{BackTracer, Builtins, SliceSet, THIS_VARIABLE, TraceOptions, cfg_statement};

/// What the engine knows about the webpage beyond its graph.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub webpage: String,
    pub url: String,
    pub sources: Vec<SourceEntry>,
    pub sink_ids: Option<Vec<NodeId>>,
    pub deadline: Option<Instant>,
}

impl PageContext {
    pub fn from_artifacts(webpage: impl Into<String>, artifacts: &WebpageArtifacts) -> Self {
        Self {
            webpage: webpage.into(),
            url: artifacts.url.clone(),
            sources: artifacts.sources.clone(),
            sink_ids: artifacts.sink_ids(),
            deadline: None,
        }
    }
}

/// Result of one webpage run, as reported by the CLI.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WebpageOutcome {
    pub webpage: String,
    pub flows: usize,
    pub partial: usize,
    pub points_to_edges: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct AnalysisEngine {
    config: Config,
    builtins: Arc<Builtins>,
    fingerprints: Arc<FingerprintRegistry>,
    disabled: Vec<SinkFamily>,
}

impl AnalysisEngine {
    pub fn new(config: Config) -> Self {
        let mut builtins = Builtins::with_defaults();
        builtins.extend(&config.trace.extra_builtins);

        let mut fingerprints = FingerprintRegistry::with_defaults();
        for name in &config.sources.domclob {
            fingerprints.register_domclob_source(name);
        }
        for name in &config.sources.document_variables {
            fingerprints.register_document_variable(name);
        }

        let mut disabled = Vec::new();
        for name in &config.sinks.disabled {
            match SinkFamily::from_name(name) {
                Some(family) => disabled.push(family),
                None => warn!(sink = %name, "unknown sink family in [sinks].disabled"),
            }
        }

        Self {
            config,
            builtins: Arc::new(builtins),
            fingerprints: Arc::new(fingerprints),
            disabled,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// Analyses one webpage's graph. Pointer resolutions are written back into
    /// `graph` when materialisation is enabled.
    pub fn analyze_graph<G: GraphService + ?Sized>(&self, graph: &G, page: &PageContext) -> WebpageReport {
        let mut report = WebpageReport::new(page.url.clone());

        let mut fingerprints = (*self.fingerprints).clone();
        let mut document_variables = Vec::new();
        for source in &page.sources {
            fingerprints.register_domclob_source(&source.name);
            if let Some(name) = source.name.strip_prefix("document.") {
                document_variables.push(name.to_string());
            }
        }

        let run_deadline = Instant::now() + self.config.budget.run_timeout();
        let deadline = match page.deadline {
            Some(site) => site.min(run_deadline),
            None => run_deadline,
        };
        let options = TraceOptions {
            max_depth: self.config.trace.max_depth,
            beautify: self.config.trace.beautify,
            deadline: Some(deadline),
            materialise_pointers: self.config.pointer.materialise,
        };

        let mut scanner = SinkScanner::new(graph).with_disabled(self.disabled.iter().copied());
        if let Some(ids) = &page.sink_ids {
            scanner = scanner.restrict_to(ids.iter().copied());
        }
        let sinks = match scanner.scan() {
            Ok(sinks) => sinks,
            Err(err) => {
                warn!(webpage = %page.webpage, error = %err, "sink scan failed");
                return report;
            }
        };

        let mut tracer = BackTracer::new(graph, &self.builtins, options);
        let reach = ReachabilityAnalyser::new(graph);
        let mut scan = FlowScan {
            graph,
            tracer: &mut tracer,
            reach: &reach,
            fingerprints: &fingerprints,
            document_variables: &document_variables,
            page,
        };
        for sink in &sinks {
            report.flows.push(scan.flow(sink));
        }

        info!(
            webpage = %page.webpage,
            sinks = sinks.len(),
            partial = report.partial_flows(),
            "analysed webpage"
        );
        report
    }

    /// Loads, analyses and writes the outputs of one webpage directory.
    #[instrument(skip(self, site_deadline), fields(dir = %dir.display()))]
    pub fn run_webpage(&self, dir: &Path, site_deadline: Option<Instant>) -> WebpageOutcome {
        let webpage = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut outcome = WebpageOutcome {
            webpage: webpage.clone(),
            ..WebpageOutcome::default()
        };

        let loaded = WebpageArtifacts::load(dir)
            .map_err(|err| err.to_string())
            .and_then(|artifacts| {
                csv::load_dir(dir)
                    .map(|graph| (artifacts, graph))
                    .map_err(|err| err.to_string())
            });
        let (artifacts, graph) = match loaded {
            Ok(loaded) => loaded,
            Err(error) => {
                warn!(%error, "skipping webpage");
                if let Err(err) = ErrorStub::new(error.clone()).write(dir) {
                    warn!(error = %err, "failed to write error stub");
                }
                outcome.error = Some(error);
                return outcome;
            }
        };

        let mut page = PageContext::from_artifacts(webpage, &artifacts);
        page.deadline = site_deadline;
        let report = self.analyze_graph(&graph, &page);
        outcome.flows = report.flows.len();
        outcome.partial = report.partial_flows();

        if let Err(err) = report.write(dir) {
            warn!(error = %err, "failed to write report");
            outcome.error = Some(err.to_string());
        }
        outcome.points_to_edges = self.persist_points_to(dir, &graph);
        outcome
    }

    fn persist_points_to(&self, dir: &Path, graph: &InMemoryGraph) -> usize {
        if !self.config.pointer.materialise {
            return 0;
        }
        let created = graph.created_edges();
        if created.is_empty() {
            return 0;
        }
        match csv::append_points_to(dir, &created) {
            Ok(path) => {
                debug!(path = %path.display(), edges = created.len(), "persisted pointsTo edges");
                created.len()
            }
            Err(err) => {
                warn!(error = %err, "failed to persist pointsTo edges");
                0
            }
        }
    }
}

struct FlowScan<'a, 'g, G: GraphService + ?Sized> {
    graph: &'g G,
    tracer: &'a mut BackTracer<'g, G>,
    reach: &'a ReachabilityAnalyser<'g, G>,
    fingerprints: &'a FingerprintRegistry,
    document_variables: &'a [String],
    page: &'a PageContext,
}

impl<G: GraphService + ?Sized> FlowScan<'_, '_, G> {
    fn flow(&mut self, sink: &SinkCandidate) -> Flow {
        let mut partial = false;

        let renderer = ExpressionRenderer::new(self.graph);
        let argument = renderer.render_node(&sink.argument).unwrap_or_else(|err| {
            partial |= degraded(sink, "rendering sink argument", &err);
            Rendered::default()
        });
        let sink_code = match renderer.render_node(&sink.node) {
            Ok(rendered) => rendered.code,
            Err(err) => {
                partial |= degraded(sink, "rendering sink", &err);
                String::new()
            }
        };
        let statement = match cfg_statement(self.graph, sink.node.id) {
            Ok(statement) => statement,
            Err(err) => {
                partial |= degraded(sink, "locating sink statement", &err);
                sink.node.clone()
            }
        };
        let script = match self.script_of(sink.node.id) {
            Ok(script) => script,
            Err(err) => {
                partial |= degraded(sink, "locating script", &err);
                String::new()
            }
        };

        let mut semantic_types = self.fingerprints.tag_code(&argument.code);
        semantic_types.insert(sink.family.semantic_type());

        let mut program_slices = BTreeMap::new();
        for (name, origin) in argument.identifiers.iter() {
            let is_this = name == THIS_IDENTIFIER;
            if !is_this && self.tracer.builtins().contains(name) {
                continue;
            }
            let mut slices = SliceSet::new();
            let traced = if is_this {
                self.tracer.trace_this_into(origin, statement.id, &mut slices)
            } else {
                self.tracer.trace_into(name, statement.id, &mut slices)
            };
            if let Err(err) = traced {
                partial |= degraded(sink, "back-tracing", &err);
            }
            if let Some(truncation) = self.tracer.truncation() {
                debug!(sink = %sink.nid(), variable = name, ?truncation, "trace truncated");
                partial = true;
            }

            let slices = slices.into_vec();
            let types = self.fingerprints.tag_slices(&slices, self.document_variables);
            semantic_types.union_with(&types);
            let key = if is_this { THIS_VARIABLE } else { name };
            program_slices.insert(key.to_string(), VariableSlices::new(types, &slices));
        }

        let reachability = self.reach.reach(sink.node.id).unwrap_or_else(|err| {
            partial |= degraded(sink, "reachability", &err);
            Reachability::Unreachable
        });

        debug!(sink = %sink.nid(), types = %semantic_types, "built flow");
        Flow {
            webpage: self.page.webpage.clone(),
            script,
            semantic_types,
            node_id: sink.node.id,
            cfg_node_id: statement.id,
            loc: sink.node.location.clone(),
            sink_type: sink.family.as_str().to_string(),
            sink_code,
            program_slices,
            reachability,
            partial,
        }
    }

    /// The root program node containing `node`, identified by its id.
    fn script_of(&self, node: NodeId) -> Result<String, GraphError> {
        let mut current = node;
        while let Some((_, parent)) = self.graph.ast_parent(current)? {
            current = parent.id;
        }
        Ok(current.to_string())
    }
}

/// Logs a graph error that degrades a flow; always `true`.
fn degraded(sink: &SinkCandidate, what: &str, err: &GraphError) -> bool {
    warn!(sink = %sink.nid(), error = %err, "{what} failed; flow is partial");
    true
}
