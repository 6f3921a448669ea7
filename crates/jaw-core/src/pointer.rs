//! `this` resolution
//!
//! A `ThisExpression` resolves to a set of owners: method owners (the object a
//! function is attached to or invoked on), event owners (the DOM target a
//! handler is registered on), or the global `window` when nothing else binds
//! it. Results are memoised as `pointsTo` edges on the graph, which are
//! authoritative on later runs.

use std::collections::HashMap;

use tracing::debug;

use crate::graph::{
    Edge, GraphError, GraphService, Node, NodeId, NodePattern, NodeType, Relation, Transaction,
};
use crate::render::{child_by_relation, children_by_relation, member_property};

pub const TOP: &str = "top";
pub const OWNER: &str = "owner";
pub const POINTS_TO_WINDOW: &str = "pointsTo=window";
pub const POINTS_TO_EVENT_SELECTOR: &str = "pointsTo=eventSelector";

const BINDING_METHODS: &[&str] = &["call", "apply", "bind"];
const LISTENER_METHODS: &[&str] = &["addEventListener", "attachEvent"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Window,
    Node(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodResolution {
    /// The expression that establishes the binding (assignment, call, property).
    pub top: NodeId,
    pub owner: Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventResolution {
    pub owner: NodeId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointerResolution {
    pub methods: Vec<MethodResolution>,
    pub events: Vec<EventResolution>,
    /// Whether the result came from stored `pointsTo` edges.
    pub cached: bool,
}

impl PointerResolution {
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.events.is_empty()
    }

    fn push_method(&mut self, top: NodeId, owner: Owner) {
        let resolution = MethodResolution { top, owner };
        if !self.methods.contains(&resolution) {
            self.methods.push(resolution);
        }
    }

    fn push_event(&mut self, owner: NodeId) {
        let resolution = EventResolution { owner };
        if !self.events.contains(&resolution) {
            self.events.push(resolution);
        }
    }
}

pub struct PointerResolver<'g, G: GraphService + ?Sized> {
    graph: &'g G,
    materialise: bool,
    memo: HashMap<NodeId, PointerResolution>,
}

impl<'g, G: GraphService + ?Sized> PointerResolver<'g, G> {
    pub fn new(graph: &'g G) -> Self {
        Self {
            graph,
            materialise: true,
            memo: HashMap::new(),
        }
    }

    pub fn with_materialise(mut self, materialise: bool) -> Self {
        self.materialise = materialise;
        self
    }

    pub fn resolve(&mut self, this_node: NodeId) -> Result<PointerResolution, GraphError> {
        if let Some(resolution) = self.memo.get(&this_node) {
            return Ok(resolution.clone());
        }

        let resolution = match self.from_edges(this_node)? {
            Some(cached) => cached,
            None => {
                let computed = self.compute(this_node)?;
                if self.materialise {
                    self.store(this_node, &computed)?;
                }
                computed
            }
        };
        debug!(
            this = %this_node,
            methods = resolution.methods.len(),
            events = resolution.events.len(),
            cached = resolution.cached,
            "resolved this"
        );
        self.memo.insert(this_node, resolution.clone());
        Ok(resolution)
    }

    fn from_edges(&self, this_node: NodeId) -> Result<Option<PointerResolution>, GraphError> {
        let edges = self.graph.outgoing(this_node, Some(&Relation::PointsTo))?;
        if edges.is_empty() {
            return Ok(None);
        }
        let mut resolution = PointerResolution {
            cached: true,
            ..PointerResolution::default()
        };

        if let Some(window) = edges
            .iter()
            .find(|e| e.relation_type == TOP && e.arguments == POINTS_TO_WINDOW)
        {
            resolution.push_method(window.to, Owner::Window);
        }

        let tops = edges
            .iter()
            .filter(|e| e.relation_type == TOP && e.arguments != POINTS_TO_WINDOW);
        let owners = edges
            .iter()
            .filter(|e| e.relation_type == OWNER && e.arguments != POINTS_TO_EVENT_SELECTOR);
        for (top, owner) in tops.zip(owners) {
            resolution.push_method(top.to, Owner::Node(owner.to));
        }
        for event in edges
            .iter()
            .filter(|e| e.relation_type == OWNER && e.arguments == POINTS_TO_EVENT_SELECTOR)
        {
            resolution.push_event(event.to);
        }

        Ok((!resolution.is_empty()).then_some(resolution))
    }

    fn store(&self, this_node: NodeId, resolution: &PointerResolution) -> Result<(), GraphError> {
        let mut tx = Transaction::new(self.graph);
        for method in &resolution.methods {
            match method.owner {
                Owner::Window => tx.create_edge(
                    Edge::new(this_node, method.top, Relation::PointsTo)
                        .with_relation_type(TOP)
                        .with_arguments(POINTS_TO_WINDOW),
                ),
                Owner::Node(owner) => {
                    tx.create_edge(
                        Edge::new(this_node, method.top, Relation::PointsTo).with_relation_type(TOP),
                    );
                    tx.create_edge(
                        Edge::new(this_node, owner, Relation::PointsTo).with_relation_type(OWNER),
                    );
                }
            }
        }
        for event in &resolution.events {
            tx.create_edge(
                Edge::new(this_node, event.owner, Relation::PointsTo)
                    .with_relation_type(OWNER)
                    .with_arguments(POINTS_TO_EVENT_SELECTOR),
            );
        }
        let written = tx.commit()?;
        debug!(this = %this_node, written, "materialised pointsTo edges");
        Ok(())
    }

    fn compute(&self, this_node: NodeId) -> Result<PointerResolution, GraphError> {
        let mut resolution = PointerResolution::default();
        let (function, root) = self.enclosing_function(this_node)?;
        let Some(function) = function else {
            resolution.push_method(root, Owner::Window);
            return Ok(resolution);
        };

        self.event_owners(&function, &mut resolution)?;
        self.method_owners(&function, &mut resolution)?;

        if resolution.methods.is_empty() {
            resolution.push_method(function.id, Owner::Window);
        }
        Ok(resolution)
    }

    /// The nearest non-arrow function around `id`, plus the topmost ancestor
    /// reached when there is none.
    fn enclosing_function(&self, id: NodeId) -> Result<(Option<Node>, NodeId), GraphError> {
        let mut current = id;
        while let Some((_, parent)) = self.graph.ast_parent(current)? {
            if matches!(
                parent.ty,
                NodeType::FunctionDeclaration | NodeType::FunctionExpression
            ) {
                let id = parent.id;
                return Ok((Some(parent), id));
            }
            current = parent.id;
        }
        Ok((None, current))
    }

    fn event_owners(&self, function: &Node, out: &mut PointerResolution) -> Result<(), GraphError> {
        for edge in self.graph.incoming(function.id, Some(&Relation::Erdg))? {
            match decode_selector(&edge.arguments) {
                Some(selector) if self.graph.node(selector)?.is_some() => out.push_event(selector),
                _ => debug!(arguments = %edge.arguments, "undecodable event selector"),
            }
        }

        let Some((edge, parent)) = self.graph.ast_parent(function.id)? else {
            return Ok(());
        };
        match parent.ty {
            // target.on<evt> = function () {...}
            NodeType::AssignmentExpression if edge.relation_type == "right" => {
                if let Some(left) = child_by_relation(self.graph, parent.id, "left", 0)? {
                    let is_handler = member_property(self.graph, &left)?
                        .is_some_and(|name| name.starts_with("on"));
                    if is_handler {
                        if let Some(target) = child_by_relation(self.graph, left.id, "object", 0)? {
                            out.push_event(target.id);
                        }
                    }
                }
            }
            // target.addEventListener(evt, function () {...})
            NodeType::CallExpression if edge.relation_type == "arguments" => {
                if let Some(callee) = child_by_relation(self.graph, parent.id, "callee", 0)? {
                    let is_listener = member_property(self.graph, &callee)?
                        .is_some_and(|name| LISTENER_METHODS.contains(&name.as_str()));
                    if is_listener {
                        if let Some(target) = child_by_relation(self.graph, callee.id, "object", 0)? {
                            out.push_event(target.id);
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn method_owners(&self, function: &Node, out: &mut PointerResolution) -> Result<(), GraphError> {
        let (name, binding) = self.function_binding(function)?;

        // someObj.prop = function () {...}
        if let Some(binding) = &binding {
            if binding.ty == NodeType::AssignmentExpression {
                if let Some(left) = child_by_relation(self.graph, binding.id, "left", 0)? {
                    let is_handler = member_property(self.graph, &left)?
                        .is_some_and(|name| name.starts_with("on"));
                    if left.ty == NodeType::MemberExpression && !is_handler {
                        if let Some(object) = child_by_relation(self.graph, left.id, "object", 0)? {
                            out.push_method(binding.id, Owner::Node(object.id));
                        }
                    }
                }
            }
        }

        if let Some(name) = &name {
            self.named_method_owners(name, out)?;
            self.explicit_receivers(name, out)?;
        }

        self.object_property_owner(function, out)
    }

    /// The function's name, and the assignment or declarator that binds it.
    fn function_binding(&self, function: &Node) -> Result<(Option<String>, Option<Node>), GraphError> {
        if function.ty == NodeType::FunctionDeclaration {
            let name = child_by_relation(self.graph, function.id, "id", 0)?.map(|id| id.code);
            return Ok((name, None));
        }
        let Some((edge, parent)) = self.graph.ast_parent(function.id)? else {
            return Ok((None, None));
        };
        match parent.ty {
            NodeType::VariableDeclarator if edge.relation_type == "init" => {
                let name = child_by_relation(self.graph, parent.id, "id", 0)?.map(|id| id.code);
                Ok((name, Some(parent)))
            }
            NodeType::AssignmentExpression if edge.relation_type == "right" => {
                let name = child_by_relation(self.graph, parent.id, "left", 0)?
                    .filter(|left| left.ty == NodeType::Identifier)
                    .map(|left| left.code);
                Ok((name, Some(parent)))
            }
            _ => Ok((None, None)),
        }
    }

    /// `someObj.prop = name` elsewhere makes `someObj` an owner.
    fn named_method_owners(&self, name: &str, out: &mut PointerResolution) -> Result<(), GraphError> {
        for assignment in self
            .graph
            .match_pattern(&NodePattern::of_type(NodeType::AssignmentExpression))?
        {
            let right = child_by_relation(self.graph, assignment.id, "right", 1)?;
            if !right.is_some_and(|r| r.ty == NodeType::Identifier && r.code == name) {
                continue;
            }
            let Some(left) = child_by_relation(self.graph, assignment.id, "left", 0)? else {
                continue;
            };
            if left.ty != NodeType::MemberExpression {
                continue;
            }
            if let Some(object) = child_by_relation(self.graph, left.id, "object", 0)? {
                out.push_method(assignment.id, Owner::Node(object.id));
            }
        }
        Ok(())
    }

    /// `name.call(x)`, `name.apply(x)` and `name.bind(x)` make `x` an owner.
    fn explicit_receivers(&self, name: &str, out: &mut PointerResolution) -> Result<(), GraphError> {
        for call in self
            .graph
            .match_pattern(&NodePattern::of_type(NodeType::CallExpression))?
        {
            let Some(callee) = child_by_relation(self.graph, call.id, "callee", 0)? else {
                continue;
            };
            let binds = member_property(self.graph, &callee)?
                .is_some_and(|method| BINDING_METHODS.contains(&method.as_str()));
            if !binds {
                continue;
            }
            let target = child_by_relation(self.graph, callee.id, "object", 0)?;
            if !target.is_some_and(|t| t.ty == NodeType::Identifier && t.code == name) {
                continue;
            }
            if let Some(receiver) = children_by_relation(self.graph, call.id, "arguments", 1)?
                .into_iter()
                .next()
            {
                out.push_method(call.id, Owner::Node(receiver.id));
            }
        }
        Ok(())
    }

    /// `var obj = { m: function () {...} }` makes `obj` the owner of `m`.
    fn object_property_owner(&self, function: &Node, out: &mut PointerResolution) -> Result<(), GraphError> {
        let Some((edge, property)) = self.graph.ast_parent(function.id)? else {
            return Ok(());
        };
        if property.ty != NodeType::Property || edge.relation_type != "value" {
            return Ok(());
        }
        let Some((_, object)) = self.graph.ast_parent(property.id)? else {
            return Ok(());
        };
        let Some((edge, holder)) = self.graph.ast_parent(object.id)? else {
            return Ok(());
        };
        let qualifier = match holder.ty {
            NodeType::VariableDeclarator if edge.relation_type == "init" => {
                child_by_relation(self.graph, holder.id, "id", 0)?
            }
            NodeType::AssignmentExpression if edge.relation_type == "right" => {
                child_by_relation(self.graph, holder.id, "left", 0)?
            }
            _ => None,
        };
        if let Some(qualifier) = qualifier {
            out.push_method(property.id, Owner::Node(qualifier.id));
        }
        Ok(())
    }
}

/// Decodes the selector node id from an ERDG `Arguments` value such as `x___42`.
pub fn decode_selector(arguments: &str) -> Option<NodeId> {
    arguments
        .rsplit_once("___")
        .and_then(|(_, id)| id.trim().trim_matches('"').parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::HpgBuilder;

    fn this_in_function(b: &HpgBuilder, name: Option<&str>) -> (NodeId, NodeId) {
        let this = b.this_expr();
        let body = b.expr_stmt(b.call(b.ident("fetch"), &[this]));
        let function = match name {
            Some(name) => b.function_decl(name, &[], &[body]),
            None => b.function_expr(None, &[], &[body]),
        };
        (this, function)
    }

    #[test]
    fn top_level_this_is_window() {
        let b = HpgBuilder::new();
        let this = b.this_expr();
        let program = b.program(&[b.expr_stmt(b.member(this, "url"))]);
        let graph = b.finish();

        let resolution = PointerResolver::new(&graph).resolve(this).unwrap();
        assert_eq!(
            resolution.methods,
            vec![MethodResolution {
                top: program,
                owner: Owner::Window
            }]
        );
    }

    #[test]
    fn call_receiver_becomes_owner_and_is_cached() {
        let b = HpgBuilder::new();
        let (this, function) = this_in_function(&b, Some("A"));
        let receiver = b.ident("obj");
        let call = b.method_call(b.ident("A"), "call", &[receiver]);
        b.program(&[function, b.expr_stmt(call)]);
        let graph = b.finish();

        let first = PointerResolver::new(&graph).resolve(this).unwrap();
        assert!(!first.cached);
        assert_eq!(
            first.methods,
            vec![MethodResolution {
                top: call,
                owner: Owner::Node(receiver)
            }]
        );
        assert_eq!(graph.created_edges().len(), 2);

        let second = PointerResolver::new(&graph).resolve(this).unwrap();
        assert!(second.cached);
        assert_eq!(second.methods, first.methods);
        assert_eq!(graph.created_edges().len(), 2);
    }

    #[test]
    fn member_assignment_of_named_function() {
        let b = HpgBuilder::new();
        let (this, function) = this_in_function(&b, Some("handler"));
        let target = b.ident("api");
        let assignment = b.assign(b.member(target, "send"), b.ident("handler"));
        b.program(&[function, b.expr_stmt(assignment)]);
        let graph = b.finish();

        let resolution = PointerResolver::new(&graph).resolve(this).unwrap();
        assert_eq!(
            resolution.methods,
            vec![MethodResolution {
                top: assignment,
                owner: Owner::Node(target)
            }]
        );
    }

    #[test]
    fn onevent_assignment_is_an_event_owner() {
        let b = HpgBuilder::new();
        let (this, function) = this_in_function(&b, None);
        let target = b.ident("xhr");
        let assignment = b.assign(b.member(target, "onload"), function);
        b.program(&[b.expr_stmt(assignment)]);
        let graph = b.finish();

        let resolution = PointerResolver::new(&graph).resolve(this).unwrap();
        assert_eq!(resolution.events, vec![EventResolution { owner: target }]);
        assert_eq!(
            resolution.methods,
            vec![MethodResolution {
                top: function,
                owner: Owner::Window
            }]
        );
    }

    #[test]
    fn erdg_and_listener_registration_are_event_owners() {
        let b = HpgBuilder::new();
        let (this, function) = this_in_function(&b, None);
        let target = b.ident("button");
        let registration =
            b.method_call(target, "addEventListener", &[b.literal("click"), function]);
        b.program(&[b.expr_stmt(registration)]);
        b.erdg(registration, function, target);
        let graph = b.finish();

        let resolution = PointerResolver::new(&graph).resolve(this).unwrap();
        assert_eq!(resolution.events, vec![EventResolution { owner: target }]);

        let stored = graph.outgoing(this, Some(&Relation::PointsTo)).unwrap();
        let mut arguments: Vec<_> = stored.iter().map(|e| e.arguments.as_str()).collect();
        arguments.sort_unstable();
        assert_eq!(arguments, vec![POINTS_TO_EVENT_SELECTOR, POINTS_TO_WINDOW]);
    }

    #[test]
    fn event_owner_keeps_window_method_context() {
        let b = HpgBuilder::new();
        let (this, function) = this_in_function(&b, None);
        let decl = b.var_decl("var", "h", Some(function));
        let target = b.ident("btn");
        let registration =
            b.method_call(target, "addEventListener", &[b.literal("click"), b.ident("h")]);
        b.program(&[decl, b.expr_stmt(registration)]);
        b.erdg(registration, function, target);
        let graph = b.finish();

        let resolution = PointerResolver::new(&graph).resolve(this).unwrap();
        assert_eq!(resolution.events, vec![EventResolution { owner: target }]);
        assert_eq!(
            resolution.methods,
            vec![MethodResolution {
                top: function,
                owner: Owner::Window
            }]
        );

        let reloaded = PointerResolver::new(&graph).resolve(this).unwrap();
        assert!(reloaded.cached);
        assert_eq!(reloaded.methods, resolution.methods);
        assert_eq!(reloaded.events, resolution.events);
    }

    #[test]
    fn object_literal_method_owner() {
        let b = HpgBuilder::new();
        let (this, function) = this_in_function(&b, None);
        let object = b.object(&[("load", function)]);
        let decl = b.var_decl("var", "client", Some(object));
        b.program(&[decl]);
        let graph = b.finish();

        let resolution = PointerResolver::new(&graph).resolve(this).unwrap();
        assert_eq!(resolution.methods.len(), 1);
        let Owner::Node(owner) = resolution.methods[0].owner else {
            panic!("expected a node owner");
        };
        assert_eq!(graph.get_node(owner).unwrap().code, "client");
    }

    #[test]
    fn unbound_function_falls_back_to_window() {
        let b = HpgBuilder::new();
        let (this, function) = this_in_function(&b, Some("lonely"));
        b.program(&[function]);
        let graph = b.finish();

        let resolution = PointerResolver::new(&graph)
            .with_materialise(false)
            .resolve(this)
            .unwrap();
        assert_eq!(resolution.methods[0].owner, Owner::Window);
        assert_eq!(resolution.methods[0].top, function);
        assert!(graph.created_edges().is_empty());
    }

    #[test]
    fn selector_decoding() {
        assert_eq!(decode_selector("x___42"), Some(NodeId(42)));
        assert_eq!(decode_selector("click___7"), Some(NodeId(7)));
        assert_eq!(decode_selector("42"), None);
    }
}
