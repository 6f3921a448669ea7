//! Expression renderer
//!
//! Turns an AST subtree back into JavaScript-like text together with the
//! literals and identifiers it contains. The output is a program slice, not a
//! pretty-printer: it is deliberately lossy but deterministic.
//!
//! Children are ordered by their `RelationType` (and `{arg:k}` index) when the
//! exporter provides them. Graphs without relation types store children in
//! reverse declaration order, so the positional fallback reverses them.

use tracing::debug;

use crate::graph::{Edge, GraphError, GraphService, Node, NodeId, NodeType};

/// Pseudo-identifier registered for `this`; it triggers pointer resolution.
pub const THIS_IDENTIFIER: &str = "ThisExpression";

/// Insertion-ordered `name -> originating node` map.
///
/// Re-inserting a name keeps its original position and updates the node, so
/// the last occurrence wins as the origin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierMap {
    entries: Vec<(String, NodeId)>,
}

impl IdentifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, origin: NodeId) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = origin,
            None => self.entries.push((name, origin)),
        }
    }

    pub fn get(&self, name: &str) -> Option<NodeId> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.entries.iter().map(|(n, id)| (n.as_str(), *id))
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn extend(&mut self, other: &IdentifierMap) {
        for (name, id) in other.iter() {
            self.insert(name, id);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    pub code: String,
    pub literals: Vec<String>,
    pub identifiers: IdentifierMap,
}

struct Children {
    items: Vec<(Edge, Node)>,
}

impl Children {
    fn is_typed(&self) -> bool {
        self.items.iter().any(|(edge, _)| !edge.relation_type.is_empty())
    }

    /// Children in declaration order when no relation types are available.
    fn positional(&self) -> Vec<&Node> {
        self.items.iter().rev().map(|(_, node)| node).collect()
    }

    fn one(&self, relation_type: &str, position: usize) -> Option<&Node> {
        if self.is_typed() {
            self.items
                .iter()
                .find(|(edge, _)| edge.relation_type == relation_type)
                .map(|(_, node)| node)
        } else {
            self.positional().get(position).copied()
        }
    }

    fn many(&self, relation_type: &str, skip: usize) -> Vec<&Node> {
        if self.is_typed() {
            let mut matching: Vec<(usize, &Edge, &Node)> = self
                .items
                .iter()
                .enumerate()
                .filter(|(_, (edge, _))| edge.relation_type == relation_type)
                .map(|(i, (edge, node))| (i, edge, node))
                .collect();
            matching.sort_by_key(|(i, edge, _)| (edge.arg_index().unwrap_or(*i), *i));
            matching.into_iter().map(|(_, _, node)| node).collect()
        } else {
            self.positional().into_iter().skip(skip).collect()
        }
    }

    fn all(&self) -> Vec<&Node> {
        if self.is_typed() {
            self.items.iter().map(|(_, node)| node).collect()
        } else {
            self.positional()
        }
    }
}

/// The child linked to `id` by `relation_type`, or the child at `position`
/// when the graph carries no relation types.
pub fn child_by_relation<G: GraphService + ?Sized>(
    graph: &G,
    id: NodeId,
    relation_type: &str,
    position: usize,
) -> Result<Option<Node>, GraphError> {
    let children = Children {
        items: graph.ast_children(id)?,
    };
    Ok(children.one(relation_type, position).cloned())
}

/// All children linked by `relation_type`, ordered by their `{arg:k}` index.
/// Without relation types, the declaration-ordered children after `skip`.
pub fn children_by_relation<G: GraphService + ?Sized>(
    graph: &G,
    id: NodeId,
    relation_type: &str,
    skip: usize,
) -> Result<Vec<Node>, GraphError> {
    let children = Children {
        items: graph.ast_children(id)?,
    };
    Ok(children
        .many(relation_type, skip)
        .into_iter()
        .cloned()
        .collect())
}

/// Property name of a non-computed member expression, e.g. `open` in `x.open`.
pub fn member_property<G: GraphService + ?Sized>(
    graph: &G,
    member: &Node,
) -> Result<Option<String>, GraphError> {
    if member.ty != NodeType::MemberExpression {
        return Ok(None);
    }
    Ok(
        child_by_relation(graph, member.id, "property", 1)?.and_then(|property| {
            match property.ty {
                NodeType::Identifier if !member.computed => Some(property.code),
                NodeType::Literal => Some(property.value),
                _ => None,
            }
        }),
    )
}

pub struct ExpressionRenderer<'g, G: GraphService + ?Sized> {
    graph: &'g G,
    short_form: bool,
}

impl<'g, G: GraphService + ?Sized> ExpressionRenderer<'g, G> {
    pub fn new(graph: &'g G) -> Self {
        Self {
            graph,
            short_form: false,
        }
    }

    /// Renderer that elides function bodies, used for reachability witnesses.
    pub fn short_form(graph: &'g G) -> Self {
        Self {
            graph,
            short_form: true,
        }
    }

    pub fn render(&self, id: NodeId) -> Result<Rendered, GraphError> {
        let node = self.graph.get_node(id)?;
        self.render_node(&node)
    }

    pub fn render_node(&self, node: &Node) -> Result<Rendered, GraphError> {
        let mut acc = Rendered::default();
        let code = self.walk(node, &mut acc)?;
        acc.code = code;
        Ok(acc)
    }

    fn children(&self, node: &Node) -> Result<Children, GraphError> {
        Ok(Children {
            items: self.graph.ast_children(node.id)?,
        })
    }

    fn walk_opt(&self, node: Option<&Node>, acc: &mut Rendered, parent: &Node) -> Result<String, GraphError> {
        match node {
            Some(node) => self.walk(node, acc),
            None => {
                debug!(node = %parent.id, ty = %parent.ty, "missing expected child while rendering");
                Ok(String::new())
            }
        }
    }

    fn join(&self, nodes: &[&Node], sep: &str, acc: &mut Rendered) -> Result<String, GraphError> {
        let mut parts = Vec::with_capacity(nodes.len());
        for node in nodes {
            parts.push(self.walk(node, acc)?);
        }
        Ok(parts.join(sep))
    }

    fn walk(&self, node: &Node, acc: &mut Rendered) -> Result<String, GraphError> {
        let code = match &node.ty {
            NodeType::Literal => self.literal(node, acc),
            NodeType::Identifier => {
                acc.identifiers.insert(node.code.clone(), node.id);
                node.code.clone()
            }
            NodeType::ThisExpression => {
                acc.identifiers.insert(THIS_IDENTIFIER, node.id);
                "this".to_string()
            }
            NodeType::MemberExpression => self.member(node, acc)?,
            NodeType::AssignmentExpression
            | NodeType::BinaryExpression
            | NodeType::LogicalExpression => {
                let children = self.children(node)?;
                let left = self.walk_opt(children.one("left", 0), acc, node)?;
                let right = self.walk_opt(children.one("right", 1), acc, node)?;
                let op = if node.code.is_empty() { "=" } else { &node.code };
                format!("{left} {op} {right}")
            }
            NodeType::VariableDeclaration => {
                let children = self.children(node)?;
                let declarators = self.join(&children.many("declarations", 0), ", ", acc)?;
                let kind = if node.kind.is_empty() { "var" } else { &node.kind };
                format!("{kind} {declarators}")
            }
            NodeType::VariableDeclarator => {
                let children = self.children(node)?;
                let id = self.walk_opt(children.one("id", 0), acc, node)?;
                match children.one("init", 1) {
                    Some(init) => format!("{id} = {}", self.walk(init, acc)?),
                    None => id,
                }
            }
            NodeType::ExpressionStatement => {
                let children = self.children(node)?;
                self.walk_opt(children.one("expression", 0), acc, node)?
            }
            NodeType::CallExpression | NodeType::NewExpression => {
                let children = self.children(node)?;
                let callee = self.walk_opt(children.one("callee", 0), acc, node)?;
                let args = self.join(&children.many("arguments", 1), ", ", acc)?;
                if node.ty == NodeType::NewExpression {
                    format!("new {callee}({args})")
                } else {
                    format!("{callee}({args})")
                }
            }
            NodeType::FunctionDeclaration
            | NodeType::FunctionExpression
            | NodeType::ArrowFunctionExpression => self.function(node, acc)?,
            NodeType::BlockStatement | NodeType::Program => {
                let children = self.children(node)?;
                let statements = children.many("body", 0);
                if statements.is_empty() {
                    "{}".to_string()
                } else {
                    let body = self.join(&statements, "; ", acc)?;
                    if node.ty == NodeType::Program {
                        body
                    } else {
                        format!("{{ {body}; }}")
                    }
                }
            }
            NodeType::IfStatement => {
                let children = self.children(node)?;
                let test = self.walk_opt(children.one("test", 0), acc, node)?;
                let consequent = self.walk_opt(children.one("consequent", 1), acc, node)?;
                let consequent = braced(consequent);
                match children.one("alternate", 2) {
                    Some(alternate) => {
                        let alternate = braced(self.walk(alternate, acc)?);
                        format!("if ({test}) {consequent} else {alternate}")
                    }
                    None => format!("if ({test}) {consequent}"),
                }
            }
            NodeType::ConditionalExpression => {
                let children = self.children(node)?;
                let test = self.walk_opt(children.one("test", 0), acc, node)?;
                let consequent = self.walk_opt(children.one("consequent", 1), acc, node)?;
                let alternate = self.walk_opt(children.one("alternate", 2), acc, node)?;
                format!("({test}) ? {consequent} : {alternate}")
            }
            NodeType::TryStatement => {
                let children = self.children(node)?;
                let block = self.walk_opt(children.one("block", 0), acc, node)?;
                let mut out = format!("try {}", braced(block));
                if let Some(handler) = children.one("handler", 1) {
                    out.push(' ');
                    out.push_str(&self.walk(handler, acc)?);
                }
                if let Some(finalizer) = children.one("finalizer", 2) {
                    out.push_str(" finally ");
                    out.push_str(&braced(self.walk(finalizer, acc)?));
                }
                out
            }
            NodeType::CatchClause => {
                let children = self.children(node)?;
                let param = match children.one("param", 0) {
                    Some(param) => self.walk(param, acc)?,
                    None => String::new(),
                };
                let body = self.walk_opt(children.one("body", 1), acc, node)?;
                format!("catch({param}) {}", braced(body))
            }
            NodeType::ObjectExpression => {
                let children = self.children(node)?;
                let properties = self.join(&children.many("properties", 0), ", ", acc)?;
                format!("{{{properties}}}")
            }
            NodeType::Property => {
                let children = self.children(node)?;
                let key = match children.one("key", 0) {
                    Some(key) if node.computed => format!("[{}]", self.walk(key, acc)?),
                    Some(key) => property_name(key),
                    None => String::new(),
                };
                let value = self.walk_opt(children.one("value", 1), acc, node)?;
                format!("{key}: {value}")
            }
            NodeType::ArrayExpression => {
                let children = self.children(node)?;
                let elements = self.join(&children.many("elements", 0), ", ", acc)?;
                format!("[{elements}]")
            }
            NodeType::UpdateExpression => {
                let children = self.children(node)?;
                let argument = self.walk_opt(children.one("argument", 0), acc, node)?;
                if node.kind == "prefix" {
                    format!("{}{argument}", node.code)
                } else {
                    format!("{argument}{}", node.code)
                }
            }
            NodeType::UnaryExpression => {
                let children = self.children(node)?;
                let argument = self.walk_opt(children.one("argument", 0), acc, node)?;
                if node.code.chars().all(|c| c.is_ascii_alphabetic()) {
                    format!("{} {argument}", node.code)
                } else {
                    format!("{}{argument}", node.code)
                }
            }
            NodeType::SequenceExpression => {
                let children = self.children(node)?;
                self.join(&children.many("expressions", 0), ", ", acc)?
            }
            NodeType::ReturnStatement | NodeType::ThrowStatement => {
                let keyword = if node.ty == NodeType::ReturnStatement {
                    "return"
                } else {
                    "throw"
                };
                let children = self.children(node)?;
                match children.one("argument", 0) {
                    Some(argument) => format!("{keyword} {}", self.walk(argument, acc)?),
                    None => keyword.to_string(),
                }
            }
            NodeType::ForStatement => {
                let children = self.children(node)?;
                let mut parts = Vec::new();
                for (relation, position) in [("init", 0), ("test", 1), ("update", 2)] {
                    parts.push(match children.one(relation, position) {
                        Some(part) => self.walk(part, acc)?,
                        None => String::new(),
                    });
                }
                let body = self.walk_opt(children.one("body", 3), acc, node)?;
                format!("for ({}) {}", parts.join("; "), braced(body))
            }
            NodeType::ForInStatement => {
                let children = self.children(node)?;
                let left = self.walk_opt(children.one("left", 0), acc, node)?;
                let right = self.walk_opt(children.one("right", 1), acc, node)?;
                let body = self.walk_opt(children.one("body", 2), acc, node)?;
                format!("for ({left} in {right}) {}", braced(body))
            }
            NodeType::WhileStatement => {
                let children = self.children(node)?;
                let test = self.walk_opt(children.one("test", 0), acc, node)?;
                let body = self.walk_opt(children.one("body", 1), acc, node)?;
                format!("while ({test}) {}", braced(body))
            }
            NodeType::DoWhileStatement => {
                let children = self.children(node)?;
                let body = self.walk_opt(children.one("body", 0), acc, node)?;
                let test = self.walk_opt(children.one("test", 1), acc, node)?;
                format!("do {} while ({test})", braced(body))
            }
            NodeType::SwitchStatement => {
                let children = self.children(node)?;
                let discriminant = self.walk_opt(children.one("discriminant", 0), acc, node)?;
                let cases = self.join(&children.many("cases", 1), " ", acc)?;
                format!("switch ({discriminant}) {{ {cases} }}")
            }
            NodeType::SwitchCase => {
                let children = self.children(node)?;
                let body = self.join(&children.many("consequent", 1), "; ", acc)?;
                match children.one("test", 0) {
                    Some(test) if children.is_typed() => {
                        format!("case {}: {body}", self.walk(test, acc)?)
                    }
                    _ => format!("default: {body}"),
                }
            }
            NodeType::BreakStatement => "break".to_string(),
            NodeType::ContinueStatement => "continue".to_string(),
            NodeType::EmptyStatement => String::new(),
            NodeType::Other(_) => {
                let children = self.children(node)?;
                if children.items.is_empty() {
                    node.code.clone()
                } else {
                    self.join(&children.all(), "; ", acc)?
                }
            }
        };
        Ok(code)
    }

    fn literal(&self, node: &Node, acc: &mut Rendered) -> String {
        // Regular-expression literals are exported with an empty-object value.
        if node.value == "{}" && !node.raw.is_empty() && node.raw != "{}" {
            acc.literals.push(node.raw.clone());
            return node.raw.clone();
        }
        acc.literals.push(node.value.clone());
        quote(&node.value)
    }

    fn member(&self, node: &Node, acc: &mut Rendered) -> Result<String, GraphError> {
        let children = self.children(node)?;
        let object = self.walk_opt(children.one("object", 0), acc, node)?;
        let Some(property) = children.one("property", 1) else {
            debug!(node = %node.id, "member expression without property");
            return Ok(object);
        };
        if node.computed || property.ty == NodeType::Literal {
            let property = self.walk(property, acc)?;
            Ok(format!("{object}[{property}]"))
        } else if property.ty == NodeType::Identifier {
            Ok(format!("{object}.{}", property.code))
        } else {
            let property = self.walk(property, acc)?;
            Ok(format!("{object}.{property}"))
        }
    }

    fn function(&self, node: &Node, acc: &mut Rendered) -> Result<String, GraphError> {
        let children = self.children(node)?;
        let name = match children.one("id", usize::MAX) {
            Some(id) if children.is_typed() => id.code.clone(),
            _ => String::new(),
        };
        let params = self.join(&children.many("params", 0), ", ", acc)?;
        let body = children.one("body", usize::MAX).or_else(|| {
            if children.is_typed() {
                None
            } else {
                children.positional().last().copied()
            }
        });

        let is_arrow = node.ty == NodeType::ArrowFunctionExpression;
        if self.short_form {
            return Ok(if is_arrow {
                format!("({params}) => {{...}}")
            } else if name.is_empty() {
                format!("function({params}) {{...}}")
            } else {
                format!("function {name}({params}) {{...}}")
            });
        }

        let body = match body {
            Some(body) => self.walk(body, acc)?,
            None => "{}".to_string(),
        };
        Ok(if is_arrow {
            format!("({params}) => {body}")
        } else if name.is_empty() {
            format!("function({params}) {}", braced(body))
        } else {
            format!("function {name}({params}) {}", braced(body))
        })
    }
}

fn braced(code: String) -> String {
    if code.starts_with('{') {
        code
    } else if code.is_empty() {
        "{}".to_string()
    } else {
        format!("{{ {code}; }}")
    }
}

fn property_name(key: &Node) -> String {
    match key.ty {
        NodeType::Literal => quote(&key.value),
        _ => key.code.clone(),
    }
}

/// Wraps a literal value in double quotes, escaping `"` and `\`.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
