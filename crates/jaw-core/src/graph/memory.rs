//! Arena-backed in-memory HPG store

use std::collections::HashMap;

use id_arena::{Arena, Id};
use parking_lot::RwLock;

use super::{Edge, GraphError, GraphService, Node, NodeId, NodePattern, Relation};

#[derive(Debug, Default)]
struct EdgeStore {
    edges: Vec<Edge>,
    outgoing: HashMap<NodeId, Vec<usize>>,
    incoming: HashMap<NodeId, Vec<usize>>,
    /// Indices of edges created after loading, i.e. materialised during a run.
    created: Vec<usize>,
}

impl EdgeStore {
    fn push(&mut self, edge: Edge) -> usize {
        let index = self.edges.len();
        self.outgoing.entry(edge.from).or_default().push(index);
        self.incoming.entry(edge.to).or_default().push(index);
        self.edges.push(edge);
        index
    }

    fn contains(&self, edge: &Edge) -> bool {
        self.outgoing
            .get(&edge.from)
            .is_some_and(|indices| indices.iter().any(|&i| self.edges[i] == *edge))
    }

    fn select(&self, indices: Option<&Vec<usize>>, relation: Option<&Relation>) -> Vec<Edge> {
        indices
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
            .filter(|edge| relation.is_none_or(|r| edge.relation == *r))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryGraph {
    arena: Arena<Node>,
    by_id: HashMap<NodeId, Id<Node>>,
    edges: RwLock<EdgeStore>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a node; the last write for an id wins.
    pub fn insert_node(&mut self, node: Node) {
        match self.by_id.get(&node.id) {
            Some(&slot) => self.arena[slot] = node,
            None => {
                let id = node.id;
                let slot = self.arena.alloc(node);
                self.by_id.insert(id, slot);
            }
        }
    }

    /// Adds an edge as part of the loaded graph (not counted as materialised).
    pub fn insert_edge(&mut self, edge: Edge) {
        self.edges.get_mut().push(edge);
    }

    pub fn node_count(&self) -> usize {
        self.by_id.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.read().edges.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.arena.iter().map(|(_, node)| node)
    }

    /// Edges written through [`GraphService::create_edge`] since loading.
    pub fn created_edges(&self) -> Vec<Edge> {
        let store = self.edges.read();
        store
            .created
            .iter()
            .map(|&i| store.edges[i].clone())
            .collect()
    }
}

impl GraphService for InMemoryGraph {
    fn node(&self, id: NodeId) -> Result<Option<Node>, GraphError> {
        Ok(self.by_id.get(&id).map(|&slot| self.arena[slot].clone()))
    }

    fn outgoing(&self, id: NodeId, relation: Option<&Relation>) -> Result<Vec<Edge>, GraphError> {
        let store = self.edges.read();
        Ok(store.select(store.outgoing.get(&id), relation))
    }

    fn incoming(&self, id: NodeId, relation: Option<&Relation>) -> Result<Vec<Edge>, GraphError> {
        let store = self.edges.read();
        Ok(store.select(store.incoming.get(&id), relation))
    }

    fn match_pattern(&self, pattern: &NodePattern) -> Result<Vec<Node>, GraphError> {
        let mut found: Vec<Node> = self
            .nodes()
            .filter(|node| pattern.matches(node))
            .cloned()
            .collect();
        found.sort_by_key(|node| node.id);
        Ok(found)
    }

    fn create_edge(&self, edge: Edge) -> Result<(), GraphError> {
        if !self.by_id.contains_key(&edge.from) {
            return Err(GraphError::MissingNode(edge.from));
        }
        if !self.by_id.contains_key(&edge.to) {
            return Err(GraphError::MissingNode(edge.to));
        }
        let mut store = self.edges.write();
        if store.contains(&edge) {
            return Ok(());
        }
        let index = store.push(edge);
        store.created.push(index);
        Ok(())
    }
}
