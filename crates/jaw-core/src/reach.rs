//! Reachability of sinks from page load or event dispatch
//!
//! A sink at the top level of a script runs on page load. A sink inside a
//! function is reachable through whatever invokes that function: a direct
//! call (followed recursively), an event registration (a witness), or nothing
//! at all (unreachable).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::graph::{GraphError, GraphService, Node, NodeId, NodePattern, NodeType, Relation};
use crate::render::{ExpressionRenderer, child_by_relation, member_property};
use crate::trace::cfg_statement;

/// Callee names that register their function argument as an event handler.
const EVENT_REGISTRATIONS: &[&str] = &[
    "addEventListener",
    "attachEvent",
    "on",
    "one",
    "bind",
    "live",
    "delegate",
    "ready",
    "load",
    "click",
    "dblclick",
    "submit",
    "change",
    "focus",
    "blur",
    "keydown",
    "keyup",
    "keypress",
    "mousedown",
    "mouseup",
    "mouseover",
    "mouseout",
    "hover",
    "scroll",
    "resize",
    "observe",
    "onClick",
];

/// AST steps from a function up to the call that receives it as an argument.
const ARGUMENT_SEARCH_DEPTH: usize = 6;
/// AST steps from a function up to the object property that stores it.
const PROPERTY_SEARCH_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    pub call_expr_id: NodeId,
    pub top_expr_id: NodeId,
    pub verdict: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ReachabilityRepr", try_from = "ReachabilityRepr")]
pub enum Reachability {
    OnPageLoad,
    Unreachable,
    /// Never empty.
    Witnesses(Vec<Witness>),
}

impl Reachability {
    pub fn label(&self) -> String {
        match self {
            Reachability::OnPageLoad => "onPageLoad".to_string(),
            Reachability::Unreachable => "unreachable".to_string(),
            Reachability::Witnesses(w) => format!("{} event witness(es)", w.len()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum Verdict {
    OnPageLoad,
    Unreachable,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ReachabilityRepr {
    Verdict(Verdict),
    Witnesses(Vec<Witness>),
}

impl From<Reachability> for ReachabilityRepr {
    fn from(value: Reachability) -> Self {
        match value {
            Reachability::OnPageLoad => ReachabilityRepr::Verdict(Verdict::OnPageLoad),
            Reachability::Unreachable => ReachabilityRepr::Verdict(Verdict::Unreachable),
            Reachability::Witnesses(witnesses) => ReachabilityRepr::Witnesses(witnesses),
        }
    }
}

impl TryFrom<ReachabilityRepr> for Reachability {
    type Error = String;

    fn try_from(value: ReachabilityRepr) -> Result<Self, Self::Error> {
        Ok(match value {
            ReachabilityRepr::Verdict(Verdict::OnPageLoad) => Reachability::OnPageLoad,
            ReachabilityRepr::Verdict(Verdict::Unreachable) => Reachability::Unreachable,
            ReachabilityRepr::Witnesses(witnesses) if witnesses.is_empty() => {
                return Err("witness list must not be empty".to_string());
            }
            ReachabilityRepr::Witnesses(witnesses) => Reachability::Witnesses(witnesses),
        })
    }
}

#[derive(Default)]
struct Search {
    visited: HashSet<NodeId>,
    witnesses: Vec<Witness>,
    on_page_load: bool,
}

pub struct ReachabilityAnalyser<'g, G: GraphService + ?Sized> {
    graph: &'g G,
}

impl<'g, G: GraphService + ?Sized> ReachabilityAnalyser<'g, G> {
    pub fn new(graph: &'g G) -> Self {
        Self { graph }
    }

    pub fn reach(&self, node: NodeId) -> Result<Reachability, GraphError> {
        let mut search = Search::default();
        self.search_from(node, &mut search)?;

        let verdict = if search.on_page_load {
            Reachability::OnPageLoad
        } else if search.witnesses.is_empty() {
            Reachability::Unreachable
        } else {
            Reachability::Witnesses(search.witnesses)
        };
        debug!(node = %node, verdict = %verdict.label(), "reachability");
        Ok(verdict)
    }

    fn search_from(&self, node: NodeId, search: &mut Search) -> Result<(), GraphError> {
        if search.on_page_load {
            return Ok(());
        }
        let Some(function) = self.enclosing_function(node)? else {
            search.on_page_load = true;
            return Ok(());
        };
        if !search.visited.insert(function.id) {
            return Ok(());
        }

        for edge in self.graph.incoming(function.id, None)? {
            if edge.relation.is_event() {
                self.witness(edge.from, search)?;
            }
        }
        self.search_usage(&function, search)?;
        if let Some(name) = self.function_name(&function)? {
            self.search_named(&function, &name, search)?;
        }
        self.search_property(&function, search)
    }

    fn enclosing_function(&self, node: NodeId) -> Result<Option<Node>, GraphError> {
        let mut current = node;
        while let Some((_, parent)) = self.graph.ast_parent(current)? {
            if parent.ty.is_function() {
                return Ok(Some(parent));
            }
            current = parent.id;
        }
        Ok(None)
    }

    /// Where the function expression itself is used: as a call argument, as an
    /// immediately invoked callee, or as an `on<event>` handler.
    fn search_usage(&self, function: &Node, search: &mut Search) -> Result<(), GraphError> {
        let mut current = function.clone();
        for _ in 0..ARGUMENT_SEARCH_DEPTH {
            let Some((edge, parent)) = self.graph.ast_parent(current.id)? else {
                break;
            };
            match parent.ty {
                NodeType::CallExpression | NodeType::NewExpression
                    if edge.relation_type == "arguments" =>
                {
                    return self.passed_to(&parent, search);
                }
                NodeType::CallExpression if edge.relation_type == "callee" => {
                    return self.search_from(parent.id, search);
                }
                NodeType::AssignmentExpression if edge.relation_type == "right" => {
                    if self.is_handler_assignment(&parent)? {
                        self.witness(parent.id, search)?;
                    }
                    return Ok(());
                }
                _ if parent.ty.is_function() || is_statement(&parent.ty) => break,
                _ => current = parent,
            }
        }
        Ok(())
    }

    /// A handler passed to an event registration is a witness; a function
    /// passed to any other call runs when that call does.
    fn passed_to(&self, call: &Node, search: &mut Search) -> Result<(), GraphError> {
        if self.is_event_registration(call)? {
            self.witness(call.id, search)
        } else {
            self.search_from(call.id, search)
        }
    }

    fn search_named(&self, function: &Node, name: &str, search: &mut Search) -> Result<(), GraphError> {
        for edge in self.graph.incoming(function.id, Some(&Relation::Cg))? {
            self.search_from(edge.from, search)?;
        }
        let references = self
            .graph
            .match_pattern(&NodePattern::of_type(NodeType::Identifier).with_code(name))?;
        for reference in references {
            let Some((edge, parent)) = self.graph.ast_parent(reference.id)? else {
                continue;
            };
            match parent.ty {
                NodeType::CallExpression | NodeType::NewExpression
                    if edge.relation_type == "arguments" =>
                {
                    self.passed_to(&parent, search)?
                }
                NodeType::AssignmentExpression
                    if edge.relation_type == "right" && self.is_handler_assignment(&parent)? =>
                {
                    self.witness(parent.id, search)?
                }
                NodeType::MemberExpression if edge.relation_type == "object" => {
                    if let Some(call) = self.explicit_invocation(&parent)? {
                        self.search_from(call.id, search)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// A function stored under a property name (object literal or member
    /// assignment) is searched through every `x.<name>(...)` call.
    fn search_property(&self, function: &Node, search: &mut Search) -> Result<(), GraphError> {
        let Some(property) = self.stored_property(function)? else {
            return Ok(());
        };
        let calls = self
            .graph
            .match_pattern(&NodePattern::of_type(NodeType::CallExpression))?;
        for call in calls {
            let Some(callee) = child_by_relation(self.graph, call.id, "callee", 0)? else {
                continue;
            };
            if member_property(self.graph, &callee)?.as_deref() == Some(property.as_str()) {
                self.search_from(call.id, search)?;
            }
        }
        Ok(())
    }

    fn stored_property(&self, function: &Node) -> Result<Option<String>, GraphError> {
        let mut current = function.id;
        for _ in 0..PROPERTY_SEARCH_DEPTH {
            let Some((edge, parent)) = self.graph.ast_parent(current)? else {
                break;
            };
            match parent.ty {
                NodeType::Property if edge.relation_type == "value" => {
                    return Ok(child_by_relation(self.graph, parent.id, "key", 0)?
                        .map(|key| if key.ty == NodeType::Literal { key.value } else { key.code }));
                }
                NodeType::AssignmentExpression if edge.relation_type == "right" => {
                    let Some(left) = child_by_relation(self.graph, parent.id, "left", 0)? else {
                        return Ok(None);
                    };
                    return member_property(self.graph, &left)
                        .map(|name| name.filter(|n| !is_handler_name(n)));
                }
                _ if is_statement(&parent.ty) => break,
                _ => current = parent.id,
            }
        }
        Ok(None)
    }

    /// The call in `name.call(...)` or `name.apply(...)`.
    fn explicit_invocation(&self, member: &Node) -> Result<Option<Node>, GraphError> {
        let invokes = member_property(self.graph, member)?
            .is_some_and(|name| name == "call" || name == "apply");
        if !invokes {
            return Ok(None);
        }
        Ok(self
            .graph
            .ast_parent(member.id)?
            .filter(|(edge, call)| call.ty == NodeType::CallExpression && edge.relation_type == "callee")
            .map(|(_, call)| call))
    }

    fn function_name(&self, function: &Node) -> Result<Option<String>, GraphError> {
        if function.ty != NodeType::ArrowFunctionExpression
            && let Some(id) = child_by_relation(self.graph, function.id, "id", usize::MAX)?
        {
            return Ok(Some(id.code));
        }
        let Some((edge, parent)) = self.graph.ast_parent(function.id)? else {
            return Ok(None);
        };
        if parent.ty == NodeType::VariableDeclarator && edge.relation_type == "init" {
            return Ok(child_by_relation(self.graph, parent.id, "id", 0)?.map(|id| id.code));
        }
        Ok(None)
    }

    fn is_event_registration(&self, call: &Node) -> Result<bool, GraphError> {
        let Some(callee) = child_by_relation(self.graph, call.id, "callee", 0)? else {
            return Ok(false);
        };
        let name = match callee.ty {
            NodeType::Identifier => Some(callee.code),
            _ => member_property(self.graph, &callee)?,
        };
        Ok(name.is_some_and(|n| EVENT_REGISTRATIONS.contains(&n.as_str())))
    }

    fn is_handler_assignment(&self, assignment: &Node) -> Result<bool, GraphError> {
        let Some(left) = child_by_relation(self.graph, assignment.id, "left", 0)? else {
            return Ok(false);
        };
        Ok(member_property(self.graph, &left)?.is_some_and(|name| is_handler_name(&name)))
    }

    /// Records `call` as a witness when the registration itself runs, either on
    /// page load or from another event.
    fn witness(&self, call: NodeId, search: &mut Search) -> Result<(), GraphError> {
        if search.witnesses.iter().any(|w| w.call_expr_id == call) {
            return Ok(());
        }
        let mut registration = Search {
            visited: search.visited.clone(),
            ..Search::default()
        };
        self.search_from(call, &mut registration)?;
        if !registration.on_page_load && registration.witnesses.is_empty() {
            debug!(call = %call, "event registration is unreachable");
            return Ok(());
        }

        let top = cfg_statement(self.graph, call)?;
        let verdict = ExpressionRenderer::short_form(self.graph).render(call)?.code;
        search.witnesses.push(Witness {
            call_expr_id: call,
            top_expr_id: top.id,
            verdict,
        });
        Ok(())
    }
}

fn is_handler_name(name: &str) -> bool {
    name.len() > 2 && name.starts_with("on")
}

fn is_statement(ty: &NodeType) -> bool {
    matches!(
        ty,
        NodeType::Program
            | NodeType::BlockStatement
            | NodeType::ExpressionStatement
            | NodeType::VariableDeclaration
            | NodeType::ReturnStatement
            | NodeType::IfStatement
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, HpgBuilder};

    #[test]
    fn top_level_code_runs_on_page_load() {
        let b = HpgBuilder::new();
        let call = b.call(b.ident("fetch"), &[b.literal("/a")]);
        b.program(&[b.expr_stmt(call)]);
        let graph = b.finish();

        let verdict = ReachabilityAnalyser::new(&graph).reach(call).unwrap();
        assert_eq!(verdict, Reachability::OnPageLoad);
    }

    #[test]
    fn event_listener_registration_is_a_witness() {
        let b = HpgBuilder::new();
        let sink = b.call(b.ident("fetch"), &[b.path("e.data")]);
        let handler = b.arrow(&["e"], sink);
        let register = b.method_call(b.ident("window"), "addEventListener", &[b.literal("message"), handler]);
        let stmt = b.expr_stmt(register);
        b.program(&[stmt]);
        let graph = b.finish();

        let verdict = ReachabilityAnalyser::new(&graph).reach(sink).unwrap();
        let Reachability::Witnesses(witnesses) = verdict else {
            panic!("expected witnesses, got {verdict:?}");
        };
        assert_eq!(witnesses.len(), 1);
        assert_eq!(witnesses[0].call_expr_id, register);
        assert_eq!(witnesses[0].top_expr_id, stmt);
        assert_eq!(
            witnesses[0].verdict,
            "window.addEventListener(\"message\", (e) => {...})"
        );
    }

    #[test]
    fn uncalled_function_is_unreachable() {
        let b = HpgBuilder::new();
        let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("u")]));
        let function = b.function_decl("never", &["u"], &[sink]);
        b.program(&[function]);
        let graph = b.finish();

        let verdict = ReachabilityAnalyser::new(&graph).reach(sink).unwrap();
        assert_eq!(verdict, Reachability::Unreachable);
    }

    #[test]
    fn called_function_inherits_page_load() {
        let b = HpgBuilder::new();
        let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("u")]));
        let function = b.function_decl("send", &["u"], &[sink]);
        let call = b.call(b.ident("send"), &[b.literal("/x")]);
        b.program(&[function, b.expr_stmt(call)]);
        b.cg(call, function);
        let graph = b.finish();

        let verdict = ReachabilityAnalyser::new(&graph).reach(sink).unwrap();
        assert_eq!(verdict, Reachability::OnPageLoad);
    }

    #[test]
    fn iife_runs_on_page_load() {
        let b = HpgBuilder::new();
        let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("p")]));
        let function = b.function_expr(None, &[], &[sink]);
        b.program(&[b.expr_stmt(b.call(function, &[]))]);
        let graph = b.finish();

        let verdict = ReachabilityAnalyser::new(&graph).reach(sink).unwrap();
        assert_eq!(verdict, Reachability::OnPageLoad);
    }

    #[test]
    fn on_event_assignment_and_erdg_edges_are_witnesses() {
        let b = HpgBuilder::new();
        let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("u")]));
        let handler = b.function_expr(None, &[], &[sink]);
        let assignment = b.assign(b.path("xhr.onload"), handler);
        let selector = b.ident("xhr");
        b.program(&[b.expr_stmt(assignment)]);
        b.erdg(assignment, handler, selector);
        let graph = b.finish();

        let Reachability::Witnesses(witnesses) = ReachabilityAnalyser::new(&graph).reach(sink).unwrap()
        else {
            panic!("expected witnesses");
        };
        assert_eq!(witnesses.len(), 1);
        assert_eq!(witnesses[0].call_expr_id, assignment);
    }

    /// `function never(){ btn.addEventListener("click", function(){ fetch(u) }) }`
    fn listener_inside_function(b: &HpgBuilder) -> (NodeId, NodeId, NodeId) {
        let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("u")]));
        let handler = b.function_expr(None, &[], &[sink]);
        let register = b.method_call(b.ident("btn"), "addEventListener", &[b.literal("click"), handler]);
        let function = b.function_decl("never", &[], &[b.expr_stmt(register)]);
        (sink, register, function)
    }

    #[test]
    fn registration_in_uncalled_function_is_unreachable() {
        let b = HpgBuilder::new();
        let (sink, _, function) = listener_inside_function(&b);
        b.program(&[function]);
        let graph = b.finish();

        let verdict = ReachabilityAnalyser::new(&graph).reach(sink).unwrap();
        assert_eq!(verdict, Reachability::Unreachable);
    }

    #[test]
    fn registration_in_called_function_is_a_witness() {
        let b = HpgBuilder::new();
        let (sink, register, function) = listener_inside_function(&b);
        let call = b.call(b.ident("never"), &[]);
        b.program(&[function, b.expr_stmt(call)]);
        b.cg(call, function);
        let graph = b.finish();

        let Reachability::Witnesses(witnesses) = ReachabilityAnalyser::new(&graph).reach(sink).unwrap()
        else {
            panic!("expected witnesses");
        };
        assert_eq!(witnesses.len(), 1);
        assert_eq!(witnesses[0].call_expr_id, register);
    }

    #[test]
    fn erddg_edges_are_followed_like_erdg() {
        let b = HpgBuilder::new();
        let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("u")]));
        let handler = b.function_expr(None, &[], &[sink]);
        let decl = b.var_decl("var", "h", Some(handler));
        let dispatch = b.method_call(b.ident("el"), "dispatchEvent", &[b.ident("evt")]);
        b.program(&[decl, b.expr_stmt(dispatch)]);
        b.edge(Edge::new(
            dispatch,
            handler,
            Relation::from_name("ERDDG_Dispatch"),
        ));
        let graph = b.finish();

        let Reachability::Witnesses(witnesses) = ReachabilityAnalyser::new(&graph).reach(sink).unwrap()
        else {
            panic!("expected witnesses");
        };
        assert_eq!(witnesses[0].call_expr_id, dispatch);
    }

    #[test]
    fn object_property_method_is_searched_through_member_calls() {
        let b = HpgBuilder::new();
        let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("u")]));
        let method = b.function_expr(None, &[], &[sink]);
        let object = b.var_decl("var", "api", Some(b.object(&[("load", method)])));
        let invoke = b.expr_stmt(b.method_call(b.ident("api"), "load", &[]));
        b.program(&[object, invoke]);
        let graph = b.finish();

        let verdict = ReachabilityAnalyser::new(&graph).reach(sink).unwrap();
        assert_eq!(verdict, Reachability::OnPageLoad);
    }

    #[test]
    fn serialises_as_strings_or_witness_list() {
        assert_eq!(
            serde_json::to_string(&Reachability::OnPageLoad).unwrap(),
            "\"onPageLoad\""
        );
        assert_eq!(
            serde_json::to_string(&Reachability::Unreachable).unwrap(),
            "\"unreachable\""
        );
        let witnesses = Reachability::Witnesses(vec![Witness {
            call_expr_id: NodeId(4),
            top_expr_id: NodeId(5),
            verdict: "x.on(\"click\", function() {...})".to_string(),
        }]);
        let json = serde_json::to_string(&witnesses).unwrap();
        let back: Reachability = serde_json::from_str(&json).unwrap();
        assert_eq!(back, witnesses);
        assert!(serde_json::from_str::<Reachability>("[]").is_err());
    }
}
