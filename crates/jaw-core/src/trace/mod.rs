//! Symbolic back-tracing over PDG def-use chains
//!
//! [`BackTracer::trace_value`] answers "where can the value of `varname` at
//! `context` come from?" by walking `PDG_parentOf` edges against their
//! direction. Crossing into a function parameter switches to the call sites
//! that bind it (tagging slices with `[scope-id=<call>]`), and every `this`
//! occurrence is resolved through the [`PointerResolver`].
//!
//! Recursion is bounded three ways: a per-query `(varname, context)` visited
//! set, a frame budget, and an optional wall-clock deadline. Hitting a budget
//! truncates the branch; it never fails the query.

pub mod builtins;
pub mod slice;

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::{debug, trace};

use crate::beautify::beautify_slice;
use crate::binding::{ArgumentKind, BoundArgument, CallBindingExtractor};
use crate::config::DEFAULT_MAX_DEPTH;
use crate::graph::{GraphError, GraphService, Node, NodeId, NodeType, Relation};
use crate::pointer::{Owner, PointerResolver};
use crate::render::{ExpressionRenderer, THIS_IDENTIFIER, child_by_relation, quote};

pub use builtins::Builtins;
pub use slice::{
    FUNCTION_ARGUMENT, FUNCTION_CALL_DEFINITION, INVOCATION_VALUE, POINTS_TO, Slice, SliceSet,
    call_scope, def_scope, scoped,
};

/// PDG variable name under which `this` flows between statements.
pub const THIS_VARIABLE: &str = "this";

#[derive(Debug, Clone)]
pub struct TraceOptions {
    pub max_depth: usize,
    pub beautify: bool,
    pub deadline: Option<Instant>,
    pub materialise_pointers: bool,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            beautify: true,
            deadline: None,
            materialise_pointers: true,
        }
    }
}

/// Why a query stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    Depth,
    Deadline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProducerFilter {
    Any,
    /// Only `VariableDeclaration` producers, used when tracing `this` owners.
    Declarations,
}

pub struct BackTracer<'g, G: GraphService + ?Sized> {
    graph: &'g G,
    builtins: &'g Builtins,
    options: TraceOptions,
    bindings: CallBindingExtractor<'g, G>,
    pointers: PointerResolver<'g, G>,
    call_targets: HashMap<NodeId, Option<NodeId>>,
    visited: HashSet<(String, NodeId)>,
    deepest: usize,
    truncation: Option<Truncation>,
}

impl<'g, G: GraphService + ?Sized> BackTracer<'g, G> {
    pub fn new(graph: &'g G, builtins: &'g Builtins, options: TraceOptions) -> Self {
        let pointers = PointerResolver::new(graph).with_materialise(options.materialise_pointers);
        Self {
            graph,
            builtins,
            options,
            bindings: CallBindingExtractor::new(graph),
            pointers,
            call_targets: HashMap::new(),
            visited: HashSet::new(),
            deepest: 0,
            truncation: None,
        }
    }

    pub fn builtins(&self) -> &Builtins {
        self.builtins
    }

    pub fn options(&self) -> &TraceOptions {
        &self.options
    }

    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.options.deadline = deadline;
    }

    /// Deepest recursion frame reached since construction.
    pub fn max_depth_reached(&self) -> usize {
        self.deepest
    }

    /// Set when the last query was cut short by a budget.
    pub fn truncation(&self) -> Option<Truncation> {
        self.truncation
    }

    pub fn trace_value(&mut self, varname: &str, context: NodeId) -> Result<Vec<Slice>, GraphError> {
        let mut out = SliceSet::new();
        self.trace_into(varname, context, &mut out)?;
        Ok(out.into_vec())
    }

    /// Like [`trace_value`](Self::trace_value) but collects into `out`, so the
    /// slices found before a graph error are kept by the caller.
    pub fn trace_into(
        &mut self,
        varname: &str,
        context: NodeId,
        out: &mut SliceSet,
    ) -> Result<(), GraphError> {
        self.begin_query();
        let context = self.graph.get_node(context)?;
        self.trace(varname, &context, "", 0, ProducerFilter::Any, out)
    }

    /// Traces a `this` occurrence: its pointer resolution plus the `this`
    /// PDG variable flowing into `context`.
    pub fn trace_this_into(
        &mut self,
        this_node: NodeId,
        context: NodeId,
        out: &mut SliceSet,
    ) -> Result<(), GraphError> {
        self.begin_query();
        let context = self.graph.get_node(context)?;
        self.this_occurrence(this_node, &context, "", 0, out)
    }

    fn begin_query(&mut self) {
        self.visited.clear();
        self.truncation = None;
    }

    fn budget_exhausted(&mut self, depth: usize) -> bool {
        if depth >= self.options.max_depth {
            self.truncation = Some(Truncation::Depth);
            return true;
        }
        if self.options.deadline.is_some_and(|d| Instant::now() >= d) {
            self.truncation = Some(Truncation::Deadline);
            return true;
        }
        false
    }

    fn emit(&self, out: &mut SliceSet, mut slice: Slice) {
        if self.options.beautify {
            slice.code = beautify_slice(&slice.code);
        }
        if out.push(slice) {
            trace!(len = out.len(), "collected slice");
        }
    }

    fn trace(
        &mut self,
        varname: &str,
        context: &Node,
        scope: &str,
        depth: usize,
        filter: ProducerFilter,
        out: &mut SliceSet,
    ) -> Result<(), GraphError> {
        if self.budget_exhausted(depth) {
            debug!(varname, context = %context.id, depth, "trace budget exhausted");
            return Ok(());
        }
        if !self.visited.insert((varname.to_string(), context.id)) {
            return Ok(());
        }
        self.deepest = self.deepest.max(depth + 1);

        for producer in self.producers(varname, context.id, filter)? {
            if producer.ty == NodeType::Program {
                continue;
            }
            match self.parameter_owner(&producer)? {
                Some(function) => {
                    self.trace_parameter(varname, &producer, &function, scope, depth, out)?
                }
                None => self.trace_statement(varname, &producer, scope, depth, out)?,
            }
        }
        Ok(())
    }

    /// Producers of `varname` flowing into `context`, in graph order.
    fn producers(
        &self,
        varname: &str,
        context: NodeId,
        filter: ProducerFilter,
    ) -> Result<Vec<Node>, GraphError> {
        let mut producers = Vec::new();
        for edge in self.graph.incoming(context, Some(&Relation::Pdg))? {
            if edge.arguments.trim() != varname {
                continue;
            }
            let producer = self.graph.get_node(edge.from)?;
            if filter == ProducerFilter::Declarations && producer.ty != NodeType::VariableDeclaration {
                continue;
            }
            producers.push(producer);
        }
        Ok(producers)
    }

    /// The function whose parameters `producer` stands for: a function body
    /// block, or the function node itself.
    fn parameter_owner(&self, producer: &Node) -> Result<Option<Node>, GraphError> {
        if producer.ty.is_function() {
            return Ok(Some(producer.clone()));
        }
        if producer.ty != NodeType::BlockStatement {
            return Ok(None);
        }
        Ok(self
            .graph
            .ast_parent(producer.id)?
            .map(|(_, parent)| parent)
            .filter(|parent| parent.ty.is_function()))
    }

    fn trace_parameter(
        &mut self,
        varname: &str,
        producer: &Node,
        function: &Node,
        scope: &str,
        depth: usize,
        out: &mut SliceSet,
    ) -> Result<(), GraphError> {
        if !self.bindings.parameters(function.id)?.iter().any(|p| p == varname) {
            debug!(varname, function = %function.id, "not a formal parameter");
            return Ok(());
        }
        let baseline = scoped(scope, &format!("{varname} = {FUNCTION_ARGUMENT}"));
        self.emit(out, Slice::new(baseline, producer));

        let sites = self.bindings.bindings(function.id)?;
        for site in sites.iter() {
            let Some(argument) = site.get(varname) else {
                continue;
            };
            let site_scope = call_scope(site.call_id);
            let value = match argument.kind {
                ArgumentKind::Literal => quote(&argument.code),
                ArgumentKind::Identifier => scoped(&def_scope(site.call_id), &argument.code),
                _ => argument.code.clone(),
            };
            let slice = Slice {
                code: scoped(&site_scope, &format!("{varname} {INVOCATION_VALUE} {value}")),
                literals: argument.literals.clone(),
                identifiers: argument.identifiers.names(),
                location: site.location.clone(),
                node_id: Some(site.call_id),
            };
            self.emit(out, slice);

            // A recursive call passing the parameter to itself adds nothing new.
            if argument.kind == ArgumentKind::Identifier
                && argument.code == varname
                && self.is_inside(site.call_id, function.id)?
            {
                continue;
            }

            let statement = self.cfg_statement(site.call_id)?;
            self.trace_argument(argument, &statement, &site_scope, depth, out)?;
        }
        Ok(())
    }

    fn trace_argument(
        &mut self,
        argument: &BoundArgument,
        statement: &Node,
        scope: &str,
        depth: usize,
        out: &mut SliceSet,
    ) -> Result<(), GraphError> {
        if argument.kind == ArgumentKind::Literal {
            return Ok(());
        }
        for (name, origin) in argument.identifiers.iter() {
            if name == THIS_IDENTIFIER {
                self.this_occurrence(origin, statement, scope, depth, out)?;
            } else if !self.builtins.contains(name) {
                self.trace(name, statement, scope, depth + 1, ProducerFilter::Any, out)?;
            }
        }
        Ok(())
    }

    fn trace_statement(
        &mut self,
        varname: &str,
        producer: &Node,
        scope: &str,
        depth: usize,
        out: &mut SliceSet,
    ) -> Result<(), GraphError> {
        let rendered = ExpressionRenderer::new(self.graph).render_node(producer)?;
        let code = scoped(scope, &rendered.code);
        self.emit(out, Slice::from_rendered(code, &rendered, producer));

        for (name, origin) in rendered.identifiers.iter() {
            if name == varname {
                continue;
            }
            if name == THIS_IDENTIFIER {
                self.this_occurrence(origin, producer, scope, depth, out)?;
                continue;
            }
            if self.builtins.contains(name) {
                continue;
            }
            if let Some(definition) = self.called_definition(origin)? {
                let rendered = ExpressionRenderer::new(self.graph).render_node(&definition)?;
                let code = scoped(scope, &format!("{FUNCTION_CALL_DEFINITION} {}", rendered.code));
                self.emit(out, Slice::from_rendered(code, &rendered, &definition));
                continue;
            }
            self.trace(name, producer, scope, depth + 1, ProducerFilter::Any, out)?;
        }
        Ok(())
    }

    fn this_occurrence(
        &mut self,
        this_node: NodeId,
        context: &Node,
        scope: &str,
        depth: usize,
        out: &mut SliceSet,
    ) -> Result<(), GraphError> {
        let resolution = self.pointers.resolve(this_node)?;
        let this = self.graph.get_node(this_node)?;

        for method in &resolution.methods {
            match method.owner {
                Owner::Window => {
                    let code = scoped(scope, &format!("this {POINTS_TO} window"));
                    self.emit(out, Slice::new(code, &this));
                }
                Owner::Node(owner_id) => {
                    let owner = self.graph.get_node(owner_id)?;
                    let rendered = ExpressionRenderer::new(self.graph).render_node(&owner)?;
                    let code = scoped(scope, &format!("this {POINTS_TO} {}", rendered.code));
                    self.emit(out, Slice::from_rendered(code, &rendered, &owner));

                    if owner.ty == NodeType::Identifier && !self.builtins.contains(&owner.code) {
                        let statement = self.cfg_statement(owner.id)?;
                        self.trace(
                            &owner.code,
                            &statement,
                            scope,
                            depth + 1,
                            ProducerFilter::Declarations,
                            out,
                        )?;
                    }
                }
            }
        }

        for event in &resolution.events {
            let owner = self.graph.get_node(event.owner)?;
            let rendered = ExpressionRenderer::new(self.graph).render_node(&owner)?;
            let code = scoped(scope, &format!("this {POINTS_TO} {}", rendered.code));
            self.emit(out, Slice::from_rendered(code, &rendered, &owner));
        }

        self.trace(THIS_VARIABLE, context, scope, depth + 1, ProducerFilter::Any, out)
    }

    /// The definition invoked when `origin` is the callee of a call with a
    /// `CG_parentOf` edge. Resolved at most once per call expression.
    fn called_definition(&mut self, origin: NodeId) -> Result<Option<Node>, GraphError> {
        let Some((edge, call)) = self.graph.ast_parent(origin)? else {
            return Ok(None);
        };
        if edge.relation_type != "callee"
            || !matches!(call.ty, NodeType::CallExpression | NodeType::NewExpression)
        {
            return Ok(None);
        }
        let target = match self.call_targets.get(&call.id) {
            Some(target) => *target,
            None => {
                let mut target = None;
                for edge in self.graph.outgoing(call.id, Some(&Relation::Cg))? {
                    if self.graph.get_node(edge.to)?.ty.is_function() {
                        target = Some(edge.to);
                        break;
                    }
                }
                self.call_targets.insert(call.id, target);
                target
            }
        };
        target.map(|id| self.graph.get_node(id)).transpose()
    }

    fn is_inside(&self, node: NodeId, ancestor: NodeId) -> Result<bool, GraphError> {
        let mut current = node;
        while let Some((_, parent)) = self.graph.ast_parent(current)? {
            if parent.id == ancestor {
                return Ok(true);
            }
            current = parent.id;
        }
        Ok(false)
    }

    /// The statement-level node containing `id`: the first ancestor that sits
    /// directly in a program or block body, or that is an arrow function's
    /// expression body.
    pub fn cfg_statement(&self, id: NodeId) -> Result<Node, GraphError> {
        cfg_statement(self.graph, id)
    }
}

pub fn cfg_statement<G: GraphService + ?Sized>(graph: &G, id: NodeId) -> Result<Node, GraphError> {
    let mut current = graph.get_node(id)?;
    while let Some((edge, parent)) = graph.ast_parent(current.id)? {
        let is_statement = match parent.ty {
            NodeType::Program | NodeType::BlockStatement => true,
            NodeType::SwitchCase => edge.relation_type == "consequent",
            NodeType::ArrowFunctionExpression => {
                edge.relation_type == "body" && current.ty != NodeType::BlockStatement
            }
            _ => false,
        };
        if is_statement {
            return Ok(current);
        }
        current = parent;
    }
    Ok(current)
}

/// Renders the callee of a call expression, e.g. `x.open` or `fetch`.
pub fn callee_code<G: GraphService + ?Sized>(graph: &G, call: NodeId) -> Result<String, GraphError> {
    Ok(match child_by_relation(graph, call, "callee", 0)? {
        Some(callee) => ExpressionRenderer::new(graph).render_node(&callee)?.code,
        None => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::HpgBuilder;

    fn tracer<'g>(graph: &'g crate::graph::InMemoryGraph, builtins: &'g Builtins) -> BackTracer<'g, crate::graph::InMemoryGraph> {
        BackTracer::new(
            graph,
            builtins,
            TraceOptions {
                beautify: false,
                ..TraceOptions::default()
            },
        )
    }

    #[test]
    fn follows_def_use_chain() {
        let b = HpgBuilder::new();
        let decl = b.var_decl("var", "u", Some(b.path("location.hash")));
        let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("u")]));
        b.program(&[decl, sink]);
        b.pdg(decl, sink, "u");
        let graph = b.finish();
        let builtins = Builtins::with_defaults();

        let slices = tracer(&graph, &builtins).trace_value("u", sink).unwrap();
        let codes: Vec<&str> = slices.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(codes, vec!["var u = location.hash"]);
        assert_eq!(slices[0].identifiers, vec!["u", "location"]);
    }

    #[test]
    fn no_pdg_edge_means_no_slices() {
        let b = HpgBuilder::new();
        let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("u")]));
        b.program(&[sink]);
        let graph = b.finish();
        let builtins = Builtins::with_defaults();

        assert!(tracer(&graph, &builtins).trace_value("u", sink).unwrap().is_empty());
    }

    #[test]
    fn recursion_through_intermediate_variables() {
        let b = HpgBuilder::new();
        let a = b.var_decl("var", "a", Some(b.path("document.cookie")));
        let c = b.var_decl("var", "c", Some(b.binary("+", b.literal("/x?"), b.ident("a"))));
        let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("c")]));
        b.program(&[a, c, sink]);
        b.pdg(a, c, "a");
        b.pdg(c, sink, "c");
        let graph = b.finish();
        let builtins = Builtins::with_defaults();

        let slices = tracer(&graph, &builtins).trace_value("c", sink).unwrap();
        let codes: Vec<&str> = slices.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(
            codes,
            vec!["var c = \"/x?\" + a", "var a = document.cookie"]
        );
    }

    #[test]
    fn parameters_follow_call_sites_with_scope_tags() {
        let b = HpgBuilder::new();
        let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("url")]));
        let function = b.function_decl("send", &["url"], &[sink]);
        let body = b.body_of(function).unwrap();
        b.line(5);
        let call = b.call(b.ident("send"), &[b.path("document.referrer")]);
        let call_stmt = b.expr_stmt(call);
        b.program(&[function, call_stmt]);
        b.pdg(body, sink, "url");
        b.cg(call, function);
        let graph = b.finish();
        let builtins = Builtins::with_defaults();

        let slices = tracer(&graph, &builtins).trace_value("url", sink).unwrap();
        assert_eq!(slices[0].code, "url = FUNCTION_ARGUMENT");
        assert_eq!(
            slices[1].code,
            format!("[scope-id={call}] url <--(invocation-value)-- document.referrer")
        );
        assert_eq!(slices[1].location, "line:5");
    }

    #[test]
    fn identifier_arguments_carry_def_scope_and_recurse() {
        let b = HpgBuilder::new();
        let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("u")]));
        let function = b.function_decl("go", &["u"], &[sink]);
        let body = b.body_of(function).unwrap();
        let decl = b.var_decl("var", "v", Some(b.path("window.name")));
        let call = b.call(b.ident("go"), &[b.ident("v")]);
        let call_stmt = b.expr_stmt(call);
        b.program(&[function, decl, call_stmt]);
        b.pdg(body, sink, "u");
        b.pdg(decl, call_stmt, "v");
        b.cg(call, function);
        let graph = b.finish();
        let builtins = Builtins::with_defaults();

        let slices = tracer(&graph, &builtins).trace_value("u", sink).unwrap();
        let codes: Vec<&str> = slices.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(
            codes,
            vec![
                "u = FUNCTION_ARGUMENT".to_string(),
                format!("[scope-id={call}] u <--(invocation-value)-- [def-scope-id={call}] v"),
                format!("[scope-id={call}] var v = window.name"),
            ]
        );
    }

    #[test]
    fn called_functions_emit_definitions_instead_of_recursing() {
        let b = HpgBuilder::new();
        let ret = b.return_stmt(Some(b.literal("/api")));
        let function = b.function_decl("endpoint", &[], &[ret]);
        let call = b.call(b.ident("endpoint"), &[]);
        let decl = b.var_decl("var", "u", Some(call));
        let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("u")]));
        b.program(&[function, decl, sink]);
        b.pdg(decl, sink, "u");
        b.cg(call, function);
        let graph = b.finish();
        let builtins = Builtins::with_defaults();

        let slices = tracer(&graph, &builtins).trace_value("u", sink).unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].code, "var u = endpoint()");
        assert_eq!(
            slices[1].code,
            "<< FUNCTION_CALL_DEFINITION >> function endpoint() { return \"/api\"; }"
        );
    }

    #[test]
    fn cycles_terminate() {
        let b = HpgBuilder::new();
        let a = b.expr_stmt(b.assign(b.ident("a"), b.ident("c")));
        let c = b.expr_stmt(b.assign(b.ident("c"), b.ident("a")));
        let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("a")]));
        b.program(&[a, c, sink]);
        b.pdg(a, sink, "a");
        b.pdg(c, a, "c");
        b.pdg(a, c, "a");
        let graph = b.finish();
        let builtins = Builtins::with_defaults();

        let slices = tracer(&graph, &builtins).trace_value("a", sink).unwrap();
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn depth_budget_truncates() {
        let b = HpgBuilder::new();
        let mut statements = Vec::new();
        let mut previous = b.var_decl("var", "v0", Some(b.path("window.name")));
        statements.push(previous);
        for i in 1..10 {
            let stmt = b.var_decl("var", &format!("v{i}"), Some(b.ident(&format!("v{}", i - 1))));
            b.pdg(previous, stmt, &format!("v{}", i - 1));
            statements.push(stmt);
            previous = stmt;
        }
        let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("v9")]));
        b.pdg(previous, sink, "v9");
        statements.push(sink);
        b.program(&statements);
        let graph = b.finish();
        let builtins = Builtins::with_defaults();

        let mut tracer = BackTracer::new(
            &graph,
            &builtins,
            TraceOptions {
                max_depth: 3,
                beautify: false,
                ..TraceOptions::default()
            },
        );
        let slices = tracer.trace_value("v9", sink).unwrap();
        assert_eq!(slices.len(), 3);
        assert!(tracer.max_depth_reached() <= 3);
        assert_eq!(tracer.truncation(), Some(Truncation::Depth));
    }

    #[test]
    fn function_name_edge_is_not_a_parameter() {
        let b = HpgBuilder::new();
        let function = b.function_decl("handler", &["x"], &[]);
        let sink = b.expr_stmt(b.method_call(b.ident("btn"), "on", &[b.ident("handler")]));
        b.program(&[function, sink]);
        b.pdg(function, sink, "handler");
        let graph = b.finish();
        let builtins = Builtins::with_defaults();

        assert!(tracer(&graph, &builtins).trace_value("handler", sink).unwrap().is_empty());
    }

    #[test]
    fn expired_deadline_truncates_before_any_slice() {
        let b = HpgBuilder::new();
        let decl = b.var_decl("var", "u", Some(b.path("location.hash")));
        let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("u")]));
        b.program(&[decl, sink]);
        b.pdg(decl, sink, "u");
        let graph = b.finish();
        let builtins = Builtins::with_defaults();

        let mut tracer = BackTracer::new(
            &graph,
            &builtins,
            TraceOptions {
                deadline: Some(Instant::now()),
                beautify: false,
                ..TraceOptions::default()
            },
        );
        assert!(tracer.trace_value("u", sink).unwrap().is_empty());
        assert_eq!(tracer.truncation(), Some(Truncation::Deadline));
    }

    #[test]
    fn cfg_statement_stops_below_blocks_and_arrow_bodies() {
        let b = HpgBuilder::new();
        let inner = b.ident("e");
        let call = b.call(b.ident("fetch"), &[inner]);
        let arrow = b.arrow(&["e"], call);
        let stmt = b.expr_stmt(b.method_call(b.ident("w"), "on", &[arrow]));
        b.program(&[stmt]);
        let graph = b.finish();

        assert_eq!(cfg_statement(&graph, inner).unwrap().id, call);
        assert_eq!(cfg_statement(&graph, arrow).unwrap().id, stmt);
    }
}
