//! Call-binding extraction: which argument each formal parameter receives at
//! every call site of a function definition.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::graph::{GraphService, GraphError, Node, NodeId, NodeType, Relation};
use crate::render::{
    ExpressionRenderer, IdentifierMap, child_by_relation, children_by_relation, member_property,
};

/// Callee property names whose function argument receives the resolved value
/// of the receiver, as in `promise.then(value => ...)`.
const CONTINUATIONS: &[&str] = &["then"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    Literal,
    Identifier,
    MemberExpression,
    ObjectExpression,
    Other,
}

impl ArgumentKind {
    fn of(node: &Node) -> Self {
        match node.ty {
            NodeType::Literal => ArgumentKind::Literal,
            NodeType::Identifier => ArgumentKind::Identifier,
            NodeType::MemberExpression => ArgumentKind::MemberExpression,
            NodeType::ObjectExpression => ArgumentKind::ObjectExpression,
            _ => ArgumentKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundArgument {
    pub node_id: NodeId,
    pub kind: ArgumentKind,
    /// Literal value, identifier name, or the rendered expression.
    pub code: String,
    pub literals: Vec<String>,
    pub identifiers: IdentifierMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSiteBinding {
    pub call_id: NodeId,
    pub location: String,
    pub bindings: Vec<(String, BoundArgument)>,
}

impl CallSiteBinding {
    /// `<callExprId>__Loc=<location>`
    pub fn key(&self) -> String {
        format!("{}__Loc={}", self.call_id, self.location)
    }

    pub fn get(&self, param: &str) -> Option<&BoundArgument> {
        self.bindings
            .iter()
            .find(|(name, _)| name == param)
            .map(|(_, arg)| arg)
    }
}

pub struct CallBindingExtractor<'g, G: GraphService + ?Sized> {
    graph: &'g G,
    cache: HashMap<NodeId, Rc<[CallSiteBinding]>>,
}

impl<'g, G: GraphService + ?Sized> CallBindingExtractor<'g, G> {
    pub fn new(graph: &'g G) -> Self {
        Self {
            graph,
            cache: HashMap::new(),
        }
    }

    /// Formal parameter names of a function definition, in order.
    pub fn parameters(&self, function: NodeId) -> Result<Vec<String>, GraphError> {
        Ok(children_by_relation(self.graph, function, "params", 0)?
            .into_iter()
            .filter(|param| param.ty == NodeType::Identifier)
            .map(|param| param.code)
            .collect())
    }

    /// Bindings for every call site of `function`, extracted once per run.
    pub fn bindings(&mut self, function: NodeId) -> Result<Rc<[CallSiteBinding]>, GraphError> {
        if let Some(cached) = self.cache.get(&function) {
            return Ok(Rc::clone(cached));
        }
        let extracted: Rc<[CallSiteBinding]> = self.extract(function)?.into();
        self.cache.insert(function, Rc::clone(&extracted));
        Ok(extracted)
    }

    fn extract(&self, function: NodeId) -> Result<Vec<CallSiteBinding>, GraphError> {
        let params = self.parameters(function)?;
        let mut sites = Vec::new();

        for edge in self.graph.incoming(function, Some(&Relation::Cg))? {
            let call = self.graph.get_node(edge.from)?;
            let args = children_by_relation(self.graph, call.id, "arguments", 1)?;
            sites.push(self.bind(&call, &params, &args)?);
        }

        if let Some((call, receiver)) = self.continuation_of(function)? {
            sites.push(self.bind(&call, &params, std::slice::from_ref(&receiver))?);
        }

        debug!(function = %function, sites = sites.len(), "extracted call bindings");
        Ok(sites)
    }

    /// `receiver.then(function)` yields the `.then` call and its receiver.
    fn continuation_of(&self, function: NodeId) -> Result<Option<(Node, Node)>, GraphError> {
        let Some((edge, call)) = self.graph.ast_parent(function)? else {
            return Ok(None);
        };
        if call.ty != NodeType::CallExpression || edge.relation_type != "arguments" {
            return Ok(None);
        }
        let Some(callee) = child_by_relation(self.graph, call.id, "callee", 0)? else {
            return Ok(None);
        };
        let is_continuation = member_property(self.graph, &callee)?
            .is_some_and(|name| CONTINUATIONS.contains(&name.as_str()));
        if !is_continuation {
            return Ok(None);
        }
        Ok(child_by_relation(self.graph, callee.id, "object", 0)?.map(|receiver| (call, receiver)))
    }

    fn bind(
        &self,
        call: &Node,
        params: &[String],
        args: &[Node],
    ) -> Result<CallSiteBinding, GraphError> {
        // Excess arguments are ignored; with fewer arguments than formals the
        // trailing formals stay unbound and bindings are listed last-first.
        let mut bindings = Vec::with_capacity(params.len().min(args.len()));
        for (param, arg) in params.iter().zip(args) {
            bindings.push((param.clone(), self.describe(arg)?));
        }
        if args.len() < params.len() {
            bindings.reverse();
        }
        Ok(CallSiteBinding {
            call_id: call.id,
            location: call.location.clone(),
            bindings,
        })
    }

    fn describe(&self, arg: &Node) -> Result<BoundArgument, GraphError> {
        let kind = ArgumentKind::of(arg);
        let bound = match kind {
            ArgumentKind::Literal => BoundArgument {
                node_id: arg.id,
                kind,
                code: arg.value.clone(),
                literals: vec![arg.value.clone()],
                identifiers: IdentifierMap::new(),
            },
            ArgumentKind::Identifier => {
                let mut identifiers = IdentifierMap::new();
                identifiers.insert(arg.code.clone(), arg.id);
                BoundArgument {
                    node_id: arg.id,
                    kind,
                    code: arg.code.clone(),
                    literals: Vec::new(),
                    identifiers,
                }
            }
            _ => {
                let rendered = ExpressionRenderer::new(self.graph).render_node(arg)?;
                BoundArgument {
                    node_id: arg.id,
                    kind,
                    code: rendered.code,
                    literals: rendered.literals,
                    identifiers: rendered.identifiers,
                }
            }
        };
        Ok(bound)
    }
}
