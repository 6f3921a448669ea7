use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::graph::{Node, NodeId};
use crate::render::Rendered;

/// Marker placed before a callee's definition when a slice calls a resolved function.
pub const FUNCTION_CALL_DEFINITION: &str = "<< FUNCTION_CALL_DEFINITION >>";
pub const FUNCTION_ARGUMENT: &str = "FUNCTION_ARGUMENT";
pub const INVOCATION_VALUE: &str = "<--(invocation-value)--";
pub const POINTS_TO: &str = "--(points-to)-->";

/// One program slice: rendered code plus what it mentions and where it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    pub code: String,
    pub literals: Vec<String>,
    pub identifiers: Vec<String>,
    pub location: String,
    pub node_id: Option<NodeId>,
}

impl Slice {
    pub fn new(code: impl Into<String>, origin: &Node) -> Self {
        Self {
            code: code.into(),
            location: origin.location.clone(),
            node_id: Some(origin.id),
            ..Self::default()
        }
    }

    pub fn from_rendered(code: impl Into<String>, rendered: &Rendered, origin: &Node) -> Self {
        Self {
            code: code.into(),
            literals: rendered.literals.clone(),
            identifiers: rendered.identifiers.names(),
            location: origin.location.clone(),
            node_id: Some(origin.id),
        }
    }
}

/// Prefixes `text` with a scope tag such as `[scope-id=42]` when one is set.
pub fn scoped(scope: &str, text: &str) -> String {
    if scope.is_empty() {
        text.to_string()
    } else {
        format!("{scope} {text}")
    }
}

pub fn call_scope(call: NodeId) -> String {
    format!("[scope-id={call}]")
}

pub fn def_scope(call: NodeId) -> String {
    format!("[def-scope-id={call}]")
}

/// Discovery-ordered slices, deduplicated on `(code, location)`.
#[derive(Debug, Clone, Default)]
pub struct SliceSet {
    slices: Vec<Slice>,
    seen: HashSet<(String, String)>,
}

impl SliceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when an equal slice was already collected.
    pub fn push(&mut self, slice: Slice) -> bool {
        if !self
            .seen
            .insert((slice.code.clone(), slice.location.clone()))
        {
            return false;
        }
        self.slices.push(slice);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slice> {
        self.slices.iter()
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn into_vec(self) -> Vec<Slice> {
        self.slices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeType;

    #[test]
    fn duplicates_are_dropped_by_code_and_location() {
        let mut origin = Node::new(NodeId(1), NodeType::ExpressionStatement);
        origin.location = "line:3".to_string();
        let mut set = SliceSet::new();

        assert!(set.push(Slice::new("a = b", &origin)));
        assert!(!set.push(Slice::new("a = b", &origin)));
        origin.location = "line:4".to_string();
        assert!(set.push(Slice::new("a = b", &origin)));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn scope_tags_prefix_text() {
        assert_eq!(scoped("", "x = y"), "x = y");
        assert_eq!(scoped(&call_scope(NodeId(7)), "x = y"), "[scope-id=7] x = y");
        assert_eq!(def_scope(NodeId(7)), "[def-scope-id=7]");
    }
}
