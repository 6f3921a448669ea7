//! Programmatic HPG construction
//!
//! Builds the same node and edge shapes the HPG exporter writes (ESTree node
//! kinds, `AST_parentOf` relation types, `{arg:k}` argument indices), so
//! fixtures can be assembled without a JavaScript front end. Every method takes
//! `&self`, which lets nested expressions be written inline.

use std::cell::{Cell, RefCell};

use super::{Edge, GraphService, InMemoryGraph, Node, NodeId, NodeType, Relation};

pub struct HpgBuilder {
    graph: RefCell<InMemoryGraph>,
    next_id: Cell<u64>,
    line: Cell<u32>,
}

impl Default for HpgBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpgBuilder {
    pub fn new() -> Self {
        Self {
            graph: RefCell::new(InMemoryGraph::new()),
            next_id: Cell::new(1),
            line: Cell::new(1),
        }
    }

    /// Sets the source line stamped into the `Location` of subsequent nodes.
    pub fn line(&self, line: u32) -> &Self {
        self.line.set(line);
        self
    }

    pub fn finish(self) -> InMemoryGraph {
        self.graph.into_inner()
    }

    pub fn node_with(&self, ty: NodeType, configure: impl FnOnce(&mut Node)) -> NodeId {
        let id = NodeId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let mut node = Node::new(id, ty);
        node.location = format!("line:{}", self.line.get());
        configure(&mut node);
        self.graph.borrow_mut().insert_node(node);
        id
    }

    pub fn node(&self, ty: NodeType) -> NodeId {
        self.node_with(ty, |_| {})
    }

    pub fn edge(&self, edge: Edge) {
        self.graph.borrow_mut().insert_edge(edge);
    }

    fn child(&self, parent: NodeId, child: NodeId, relation_type: &str) {
        self.edge(Edge::new(parent, child, Relation::Ast).with_relation_type(relation_type));
    }

    fn indexed_child(&self, parent: NodeId, child: NodeId, relation_type: &str, index: usize) {
        self.edge(
            Edge::new(parent, child, Relation::Ast)
                .with_relation_type(relation_type)
                .with_arguments(format!("{{\"arg\":{index}}}")),
        );
    }

    // Expressions

    pub fn ident(&self, name: &str) -> NodeId {
        self.node_with(NodeType::Identifier, |n| n.code = name.to_string())
    }

    pub fn this_expr(&self) -> NodeId {
        self.node_with(NodeType::ThisExpression, |n| n.code = "this".to_string())
    }

    /// String literal; `Raw` keeps the quotes as the exporter does.
    pub fn literal(&self, value: &str) -> NodeId {
        self.node_with(NodeType::Literal, |n| {
            n.value = value.to_string();
            n.raw = format!("'{value}'");
        })
    }

    pub fn number(&self, value: i64) -> NodeId {
        self.node_with(NodeType::Literal, |n| {
            n.value = value.to_string();
            n.raw = value.to_string();
        })
    }

    pub fn member(&self, object: NodeId, property: &str) -> NodeId {
        let prop = self.ident(property);
        let member = self.node(NodeType::MemberExpression);
        self.child(member, object, "object");
        self.child(member, prop, "property");
        member
    }

    pub fn computed_member(&self, object: NodeId, property: NodeId) -> NodeId {
        let member = self.node_with(NodeType::MemberExpression, |n| n.computed = true);
        self.child(member, object, "object");
        self.child(member, property, "property");
        member
    }

    /// Member chain from a dotted path such as `window.location.hash`.
    pub fn path(&self, dotted: &str) -> NodeId {
        let mut parts = dotted.split('.');
        let first = parts.next().unwrap_or_default();
        let mut current = if first == "this" {
            self.this_expr()
        } else {
            self.ident(first)
        };
        for part in parts {
            current = self.member(current, part);
        }
        current
    }

    fn invocation(&self, ty: NodeType, callee: NodeId, args: &[NodeId]) -> NodeId {
        let call = self.node(ty);
        self.child(call, callee, "callee");
        for (index, &arg) in args.iter().enumerate() {
            self.indexed_child(call, arg, "arguments", index);
        }
        call
    }

    pub fn call(&self, callee: NodeId, args: &[NodeId]) -> NodeId {
        self.invocation(NodeType::CallExpression, callee, args)
    }

    pub fn new_expr(&self, callee: NodeId, args: &[NodeId]) -> NodeId {
        self.invocation(NodeType::NewExpression, callee, args)
    }

    pub fn method_call(&self, object: NodeId, method: &str, args: &[NodeId]) -> NodeId {
        let callee = self.member(object, method);
        self.call(callee, args)
    }

    fn binary_like(&self, ty: NodeType, op: &str, left: NodeId, right: NodeId) -> NodeId {
        let node = self.node_with(ty, |n| n.code = op.to_string());
        self.child(node, left, "left");
        self.child(node, right, "right");
        node
    }

    pub fn assign(&self, left: NodeId, right: NodeId) -> NodeId {
        self.binary_like(NodeType::AssignmentExpression, "=", left, right)
    }

    pub fn binary(&self, op: &str, left: NodeId, right: NodeId) -> NodeId {
        self.binary_like(NodeType::BinaryExpression, op, left, right)
    }

    pub fn logical(&self, op: &str, left: NodeId, right: NodeId) -> NodeId {
        self.binary_like(NodeType::LogicalExpression, op, left, right)
    }

    pub fn update(&self, op: &str, argument: NodeId) -> NodeId {
        let node = self.node_with(NodeType::UpdateExpression, |n| n.code = op.to_string());
        self.child(node, argument, "argument");
        node
    }

    pub fn unary(&self, op: &str, argument: NodeId) -> NodeId {
        let node = self.node_with(NodeType::UnaryExpression, |n| n.code = op.to_string());
        self.child(node, argument, "argument");
        node
    }

    pub fn conditional(&self, test: NodeId, consequent: NodeId, alternate: NodeId) -> NodeId {
        let node = self.node(NodeType::ConditionalExpression);
        self.child(node, test, "test");
        self.child(node, consequent, "consequent");
        self.child(node, alternate, "alternate");
        node
    }

    pub fn object(&self, properties: &[(&str, NodeId)]) -> NodeId {
        let object = self.node(NodeType::ObjectExpression);
        for &(key, value) in properties {
            let property = self.node(NodeType::Property);
            let key = self.ident(key);
            self.child(property, key, "key");
            self.child(property, value, "value");
            self.child(object, property, "properties");
        }
        object
    }

    pub fn array(&self, elements: &[NodeId]) -> NodeId {
        let array = self.node(NodeType::ArrayExpression);
        for (index, &element) in elements.iter().enumerate() {
            self.indexed_child(array, element, "elements", index);
        }
        array
    }

    fn function_like(
        &self,
        ty: NodeType,
        name: Option<&str>,
        params: &[&str],
        body: NodeId,
    ) -> NodeId {
        let function = self.node(ty);
        if let Some(name) = name {
            let id = self.ident(name);
            self.child(function, id, "id");
        }
        for (index, param) in params.iter().enumerate() {
            let param = self.ident(param);
            self.indexed_child(function, param, "params", index);
        }
        self.child(function, body, "body");
        function
    }

    pub fn function_decl(&self, name: &str, params: &[&str], body: &[NodeId]) -> NodeId {
        let block = self.block(body);
        self.function_like(NodeType::FunctionDeclaration, Some(name), params, block)
    }

    pub fn function_expr(&self, name: Option<&str>, params: &[&str], body: &[NodeId]) -> NodeId {
        let block = self.block(body);
        self.function_like(NodeType::FunctionExpression, name, params, block)
    }

    /// Arrow function with an expression body.
    pub fn arrow(&self, params: &[&str], body: NodeId) -> NodeId {
        self.function_like(NodeType::ArrowFunctionExpression, None, params, body)
    }

    // Statements

    pub fn expr_stmt(&self, expression: NodeId) -> NodeId {
        let stmt = self.node(NodeType::ExpressionStatement);
        self.child(stmt, expression, "expression");
        stmt
    }

    pub fn var_decl(&self, kind: &str, name: &str, init: Option<NodeId>) -> NodeId {
        let decl = self.node_with(NodeType::VariableDeclaration, |n| n.kind = kind.to_string());
        let declarator = self.node(NodeType::VariableDeclarator);
        let id = self.ident(name);
        self.child(declarator, id, "id");
        if let Some(init) = init {
            self.child(declarator, init, "init");
        }
        self.child(decl, declarator, "declarations");
        decl
    }

    pub fn block(&self, body: &[NodeId]) -> NodeId {
        let block = self.node(NodeType::BlockStatement);
        for &stmt in body {
            self.child(block, stmt, "body");
        }
        block
    }

    pub fn if_stmt(&self, test: NodeId, consequent: NodeId, alternate: Option<NodeId>) -> NodeId {
        let node = self.node(NodeType::IfStatement);
        self.child(node, test, "test");
        self.child(node, consequent, "consequent");
        if let Some(alternate) = alternate {
            self.child(node, alternate, "alternate");
        }
        node
    }

    pub fn return_stmt(&self, argument: Option<NodeId>) -> NodeId {
        let node = self.node(NodeType::ReturnStatement);
        if let Some(argument) = argument {
            self.child(node, argument, "argument");
        }
        node
    }

    pub fn for_stmt(
        &self,
        init: Option<NodeId>,
        test: Option<NodeId>,
        update: Option<NodeId>,
        body: NodeId,
    ) -> NodeId {
        let node = self.node(NodeType::ForStatement);
        for (child, relation) in [(init, "init"), (test, "test"), (update, "update")] {
            if let Some(child) = child {
                self.child(node, child, relation);
            }
        }
        self.child(node, body, "body");
        node
    }

    pub fn try_stmt(
        &self,
        block: NodeId,
        handler: Option<(&str, NodeId)>,
        finalizer: Option<NodeId>,
    ) -> NodeId {
        let node = self.node(NodeType::TryStatement);
        self.child(node, block, "block");
        if let Some((param, body)) = handler {
            let clause = self.node(NodeType::CatchClause);
            let param = self.ident(param);
            self.child(clause, param, "param");
            self.child(clause, body, "body");
            self.child(node, clause, "handler");
        }
        if let Some(finalizer) = finalizer {
            self.child(node, finalizer, "finalizer");
        }
        node
    }

    pub fn program(&self, body: &[NodeId]) -> NodeId {
        let program = self.node(NodeType::Program);
        for &stmt in body {
            self.child(program, stmt, "body");
        }
        program
    }

    // Non-AST relations

    pub fn cfg(&self, from: NodeId, to: NodeId) {
        self.edge(Edge::new(from, to, Relation::Cfg));
    }

    /// Data dependency `producer -> consumer` for `var`.
    pub fn pdg(&self, producer: NodeId, consumer: NodeId, var: &str) {
        self.edge(Edge::new(producer, consumer, Relation::Pdg).with_arguments(var));
    }

    pub fn cg(&self, call: NodeId, definition: NodeId) {
        self.edge(Edge::new(call, definition, Relation::Cg));
    }

    /// Event registration of `handler` on the DOM target `selector`.
    pub fn erdg(&self, registration: NodeId, handler: NodeId, selector: NodeId) {
        self.edge(
            Edge::new(registration, handler, Relation::Erdg)
                .with_arguments(format!("x___{selector}")),
        );
    }

    // Lookups

    /// The `BlockStatement` body of a function node.
    pub fn body_of(&self, function: NodeId) -> Option<NodeId> {
        self.graph
            .borrow()
            .outgoing(function, Some(&Relation::Ast))
            .ok()?
            .into_iter()
            .find(|edge| edge.relation_type == "body")
            .map(|edge| edge.to)
    }

    /// The first child of `parent` linked with `relation_type`.
    pub fn child_of(&self, parent: NodeId, relation_type: &str) -> Option<NodeId> {
        self.graph
            .borrow()
            .outgoing(parent, Some(&Relation::Ast))
            .ok()?
            .into_iter()
            .find(|edge| edge.relation_type == relation_type)
            .map(|edge| edge.to)
    }
}
