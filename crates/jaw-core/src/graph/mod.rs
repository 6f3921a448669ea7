//! Hybrid Property Graph model and the Graph Service contract
//!
//! The analysis never builds the HPG itself. It reads nodes and labelled edges
//! through [`GraphService`] and only writes memoised `pointsTo` edges back.

pub mod builder;
pub mod csv;
pub mod memory;

use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use builder::HpgBuilder;
pub use memory::InMemoryGraph;

static ARG_INDEX_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"arg"?\s*:\s*(\d+)"#).expect("Invalid regex pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(NodeId)
    }
}

/// Syntactic node kind, named after the ESTree variant stored in the `Type` column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeType {
    Program,
    ExpressionStatement,
    VariableDeclaration,
    VariableDeclarator,
    AssignmentExpression,
    BinaryExpression,
    LogicalExpression,
    UnaryExpression,
    UpdateExpression,
    SequenceExpression,
    MemberExpression,
    CallExpression,
    NewExpression,
    FunctionDeclaration,
    FunctionExpression,
    ArrowFunctionExpression,
    BlockStatement,
    IfStatement,
    ConditionalExpression,
    TryStatement,
    CatchClause,
    ObjectExpression,
    Property,
    ArrayExpression,
    Literal,
    Identifier,
    ThisExpression,
    ReturnStatement,
    ForStatement,
    ForInStatement,
    WhileStatement,
    DoWhileStatement,
    SwitchStatement,
    SwitchCase,
    BreakStatement,
    ContinueStatement,
    ThrowStatement,
    EmptyStatement,
    Other(String),
}

impl NodeType {
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "Program" => NodeType::Program,
            "ExpressionStatement" => NodeType::ExpressionStatement,
            "VariableDeclaration" => NodeType::VariableDeclaration,
            "VariableDeclarator" => NodeType::VariableDeclarator,
            "AssignmentExpression" => NodeType::AssignmentExpression,
            "BinaryExpression" => NodeType::BinaryExpression,
            "LogicalExpression" => NodeType::LogicalExpression,
            "UnaryExpression" => NodeType::UnaryExpression,
            "UpdateExpression" => NodeType::UpdateExpression,
            "SequenceExpression" => NodeType::SequenceExpression,
            "MemberExpression" => NodeType::MemberExpression,
            "CallExpression" => NodeType::CallExpression,
            "NewExpression" => NodeType::NewExpression,
            "FunctionDeclaration" => NodeType::FunctionDeclaration,
            "FunctionExpression" => NodeType::FunctionExpression,
            "ArrowFunctionExpression" => NodeType::ArrowFunctionExpression,
            "BlockStatement" => NodeType::BlockStatement,
            "IfStatement" => NodeType::IfStatement,
            "ConditionalExpression" => NodeType::ConditionalExpression,
            "TryStatement" => NodeType::TryStatement,
            "CatchClause" => NodeType::CatchClause,
            "ObjectExpression" => NodeType::ObjectExpression,
            "Property" => NodeType::Property,
            "ArrayExpression" => NodeType::ArrayExpression,
            "Literal" => NodeType::Literal,
            "Identifier" => NodeType::Identifier,
            "ThisExpression" => NodeType::ThisExpression,
            "ReturnStatement" => NodeType::ReturnStatement,
            "ForStatement" => NodeType::ForStatement,
            "ForInStatement" => NodeType::ForInStatement,
            "WhileStatement" => NodeType::WhileStatement,
            "DoWhileStatement" => NodeType::DoWhileStatement,
            "SwitchStatement" => NodeType::SwitchStatement,
            "SwitchCase" => NodeType::SwitchCase,
            "BreakStatement" => NodeType::BreakStatement,
            "ContinueStatement" => NodeType::ContinueStatement,
            "ThrowStatement" => NodeType::ThrowStatement,
            "EmptyStatement" => NodeType::EmptyStatement,
            other => NodeType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Program => "Program",
            NodeType::ExpressionStatement => "ExpressionStatement",
            NodeType::VariableDeclaration => "VariableDeclaration",
            NodeType::VariableDeclarator => "VariableDeclarator",
            NodeType::AssignmentExpression => "AssignmentExpression",
            NodeType::BinaryExpression => "BinaryExpression",
            NodeType::LogicalExpression => "LogicalExpression",
            NodeType::UnaryExpression => "UnaryExpression",
            NodeType::UpdateExpression => "UpdateExpression",
            NodeType::SequenceExpression => "SequenceExpression",
            NodeType::MemberExpression => "MemberExpression",
            NodeType::CallExpression => "CallExpression",
            NodeType::NewExpression => "NewExpression",
            NodeType::FunctionDeclaration => "FunctionDeclaration",
            NodeType::FunctionExpression => "FunctionExpression",
            NodeType::ArrowFunctionExpression => "ArrowFunctionExpression",
            NodeType::BlockStatement => "BlockStatement",
            NodeType::IfStatement => "IfStatement",
            NodeType::ConditionalExpression => "ConditionalExpression",
            NodeType::TryStatement => "TryStatement",
            NodeType::CatchClause => "CatchClause",
            NodeType::ObjectExpression => "ObjectExpression",
            NodeType::Property => "Property",
            NodeType::ArrayExpression => "ArrayExpression",
            NodeType::Literal => "Literal",
            NodeType::Identifier => "Identifier",
            NodeType::ThisExpression => "ThisExpression",
            NodeType::ReturnStatement => "ReturnStatement",
            NodeType::ForStatement => "ForStatement",
            NodeType::ForInStatement => "ForInStatement",
            NodeType::WhileStatement => "WhileStatement",
            NodeType::DoWhileStatement => "DoWhileStatement",
            NodeType::SwitchStatement => "SwitchStatement",
            NodeType::SwitchCase => "SwitchCase",
            NodeType::BreakStatement => "BreakStatement",
            NodeType::ContinueStatement => "ContinueStatement",
            NodeType::ThrowStatement => "ThrowStatement",
            NodeType::EmptyStatement => "EmptyStatement",
            NodeType::Other(name) => name,
        }
    }

    /// Function-like nodes: the definitions a `CG_parentOf` edge may point at.
    pub fn is_function(&self) -> bool {
        matches!(
            self,
            NodeType::FunctionDeclaration
                | NodeType::FunctionExpression
                | NodeType::ArrowFunctionExpression
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub ty: NodeType,
    pub kind: String,
    pub code: String,
    pub range: String,
    pub location: String,
    pub value: String,
    pub raw: String,
    pub is_async: bool,
    pub computed: bool,
    pub label: String,
    pub semantic_type: String,
}

impl Node {
    pub fn new(id: NodeId, ty: NodeType) -> Self {
        Self {
            id,
            ty,
            kind: String::new(),
            code: String::new(),
            range: String::new(),
            location: String::new(),
            value: String::new(),
            raw: String::new(),
            is_async: false,
            computed: false,
            label: "AST".to_string(),
            semantic_type: String::new(),
        }
    }
}

/// Edge family, stored in the `:TYPE` column of `rels.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Relation {
    Ast,
    Cfg,
    Pdg,
    Cg,
    Erdg,
    Erddg(String),
    PointsTo,
    Other(String),
}

impl Relation {
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "AST_parentOf" => Relation::Ast,
            "CFG_parentOf" => Relation::Cfg,
            "PDG_parentOf" => Relation::Pdg,
            "CG_parentOf" => Relation::Cg,
            "ERDG" => Relation::Erdg,
            "pointsTo" => Relation::PointsTo,
            other if other.starts_with("ERDDG") => Relation::Erddg(other.to_string()),
            other => Relation::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Relation::Ast => "AST_parentOf",
            Relation::Cfg => "CFG_parentOf",
            Relation::Pdg => "PDG_parentOf",
            Relation::Cg => "CG_parentOf",
            Relation::Erdg => "ERDG",
            Relation::PointsTo => "pointsTo",
            Relation::Erddg(name) | Relation::Other(name) => name,
        }
    }

    /// Event registration / dispatch / dependency edges.
    pub fn is_event(&self) -> bool {
        matches!(self, Relation::Erdg | Relation::Erddg(_))
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub relation: Relation,
    pub relation_type: String,
    pub arguments: String,
}

impl Edge {
    pub fn new(from: NodeId, to: NodeId, relation: Relation) -> Self {
        Self {
            from,
            to,
            relation,
            relation_type: String::new(),
            arguments: String::new(),
        }
    }

    pub fn with_relation_type(mut self, relation_type: impl Into<String>) -> Self {
        self.relation_type = relation_type.into();
        self
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = arguments.into();
        self
    }

    /// Positional index carried by `arguments` / `params` AST edges as `{arg:<k>}`.
    pub fn arg_index(&self) -> Option<usize> {
        ARG_INDEX_PATTERN
            .captures(&self.arguments)
            .and_then(|caps| caps[1].parse().ok())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("node {0} does not exist in the graph")]
    MissingNode(NodeId),
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed row {line} in '{path}': {message}")]
    MalformedRow {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("graph backend unavailable: {0}")]
    Unavailable(String),
}

/// Node filter evaluated by [`GraphService::match_pattern`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePattern {
    pub ty: Option<NodeType>,
    pub code: Option<String>,
}

impl NodePattern {
    pub fn of_type(ty: NodeType) -> Self {
        Self {
            ty: Some(ty),
            ..Self::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn matches(&self, node: &Node) -> bool {
        self.ty.as_ref().is_none_or(|ty| *ty == node.ty)
            && self.code.as_ref().is_none_or(|code| *code == node.code)
    }
}

/// Query surface the analysis needs from an HPG store.
///
/// Every call is blocking from the caller's point of view. Implementations
/// must return edges in a stable order so slices come out deterministically.
pub trait GraphService: Send + Sync {
    fn node(&self, id: NodeId) -> Result<Option<Node>, GraphError>;

    fn outgoing(&self, id: NodeId, relation: Option<&Relation>) -> Result<Vec<Edge>, GraphError>;

    fn incoming(&self, id: NodeId, relation: Option<&Relation>) -> Result<Vec<Edge>, GraphError>;

    fn match_pattern(&self, pattern: &NodePattern) -> Result<Vec<Node>, GraphError>;

    fn create_edge(&self, edge: Edge) -> Result<(), GraphError>;

    fn get_node(&self, id: NodeId) -> Result<Node, GraphError> {
        self.node(id)?.ok_or(GraphError::MissingNode(id))
    }

    fn parents(&self, id: NodeId, relation: Option<&Relation>) -> Result<Vec<Node>, GraphError> {
        self.incoming(id, relation)?
            .iter()
            .map(|edge| self.get_node(edge.from))
            .collect()
    }

    fn children(&self, id: NodeId, relation: Option<&Relation>) -> Result<Vec<Node>, GraphError> {
        self.outgoing(id, relation)?
            .iter()
            .map(|edge| self.get_node(edge.to))
            .collect()
    }

    /// The AST parent together with the edge that links it to `id`.
    fn ast_parent(&self, id: NodeId) -> Result<Option<(Edge, Node)>, GraphError> {
        match self.incoming(id, Some(&Relation::Ast))?.into_iter().next() {
            Some(edge) => {
                let parent = self.get_node(edge.from)?;
                Ok(Some((edge, parent)))
            }
            None => Ok(None),
        }
    }

    /// AST children with their edges, in the order the store returns them.
    fn ast_children(&self, id: NodeId) -> Result<Vec<(Edge, Node)>, GraphError> {
        self.outgoing(id, Some(&Relation::Ast))?
            .into_iter()
            .map(|edge| {
                let child = self.get_node(edge.to)?;
                Ok((edge, child))
            })
            .collect()
    }

    fn begin_transaction(&self) -> Transaction<'_, Self>
    where
        Self: Sized,
    {
        Transaction::new(self)
    }
}

/// Buffered edge writes, applied together on [`Transaction::commit`].
pub struct Transaction<'g, G: GraphService + ?Sized> {
    graph: &'g G,
    pending: Vec<Edge>,
}

impl<'g, G: GraphService + ?Sized> Transaction<'g, G> {
    pub fn new(graph: &'g G) -> Self {
        Self {
            graph,
            pending: Vec::new(),
        }
    }

    pub fn create_edge(&mut self, edge: Edge) {
        if !self.pending.contains(&edge) {
            self.pending.push(edge);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn commit(self) -> Result<usize, GraphError> {
        let count = self.pending.len();
        for edge in self.pending {
            self.graph.create_edge(edge)?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_round_trips_known_names() {
        for name in ["Program", "CallExpression", "ThisExpression", "CatchClause"] {
            assert_eq!(NodeType::from_name(name).as_str(), name);
        }
    }

    #[test]
    fn unknown_node_type_is_preserved() {
        let ty = NodeType::from_name("TemplateLiteral");
        assert_eq!(ty, NodeType::Other("TemplateLiteral".to_string()));
        assert_eq!(ty.as_str(), "TemplateLiteral");
    }

    #[test]
    fn relation_recognises_erddg_family() {
        assert!(Relation::from_name("ERDDG_Registration").is_event());
        assert!(Relation::from_name("ERDG").is_event());
        assert!(!Relation::from_name("PDG_parentOf").is_event());
    }

    #[test]
    fn arg_index_accepts_quoted_and_bare_keys() {
        let edge = Edge::new(NodeId(1), NodeId(2), Relation::Ast).with_arguments("{\"arg\":3}");
        assert_eq!(edge.arg_index(), Some(3));
        let edge = Edge::new(NodeId(1), NodeId(2), Relation::Ast).with_arguments("{arg:0}");
        assert_eq!(edge.arg_index(), Some(0));
    }

    #[test]
    fn pattern_matches_on_all_given_fields() {
        let mut node = Node::new(NodeId(7), NodeType::Identifier);
        node.code = "fetch".to_string();
        assert!(NodePattern::of_type(NodeType::Identifier).matches(&node));
        assert!(
            NodePattern::of_type(NodeType::Identifier)
                .with_code("fetch")
                .matches(&node)
        );
        assert!(
            !NodePattern::of_type(NodeType::Identifier)
                .with_code("open")
                .matches(&node)
        );
        assert!(!NodePattern::of_type(NodeType::Literal).matches(&node));
    }
}
