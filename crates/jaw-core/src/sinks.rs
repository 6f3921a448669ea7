//! Sink scanner for request-issuing program points
//!
//! Recognises the call, construction, assignment and settings-object shapes
//! that send an HTTP-like request, and extracts the argument whose value an
//! attacker would want to control.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::graph::{GraphError, GraphService, Node, NodeId, NodePattern, NodeType};
use crate::render::{ExpressionRenderer, child_by_relation, children_by_relation, member_property};
use crate::semantic::SemanticType;

const LOCATION_TARGETS: &[&str] = &[
    "location",
    "location.href",
    "window.location",
    "window.location.href",
    "document.location",
    "document.location.href",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SinkFamily {
    #[serde(rename = "XMLHttpRequest.open")]
    XhrOpen,
    #[serde(rename = "window.open")]
    WindowOpen,
    #[serde(rename = "fetch")]
    Fetch,
    #[serde(rename = "$.ajax")]
    Ajax,
    #[serde(rename = "asyncRequest")]
    AsyncRequest,
    #[serde(rename = "Connect.setForm")]
    SetForm,
    #[serde(rename = "pagespeed.CriticalImages.Run")]
    CriticalImagesRun,
    #[serde(rename = "ajaxSettings")]
    AjaxSettings,
    #[serde(rename = "xhrPost")]
    XhrPost,
    #[serde(rename = "WebSocket")]
    WebSocket,
    #[serde(rename = "EventSource")]
    EventSource,
    #[serde(rename = "window.location")]
    LocationAssign,
    #[serde(rename = "element.src")]
    SrcAssign,
    #[serde(rename = "XMLHttpRequest.send")]
    XhrSend,
    #[serde(rename = "XMLHttpRequest.setRequestHeader")]
    SetRequestHeader,
    #[serde(rename = "$.ajax.data")]
    AjaxData,
    #[serde(rename = "$.ajax.headers")]
    AjaxHeaders,
}

impl SinkFamily {
    pub const ALL: [SinkFamily; 17] = [
        SinkFamily::XhrOpen,
        SinkFamily::WindowOpen,
        SinkFamily::Fetch,
        SinkFamily::Ajax,
        SinkFamily::AsyncRequest,
        SinkFamily::SetForm,
        SinkFamily::CriticalImagesRun,
        SinkFamily::AjaxSettings,
        SinkFamily::XhrPost,
        SinkFamily::WebSocket,
        SinkFamily::EventSource,
        SinkFamily::LocationAssign,
        SinkFamily::SrcAssign,
        SinkFamily::XhrSend,
        SinkFamily::SetRequestHeader,
        SinkFamily::AjaxData,
        SinkFamily::AjaxHeaders,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SinkFamily::XhrOpen => "XMLHttpRequest.open",
            SinkFamily::WindowOpen => "window.open",
            SinkFamily::Fetch => "fetch",
            SinkFamily::Ajax => "$.ajax",
            SinkFamily::AsyncRequest => "asyncRequest",
            SinkFamily::SetForm => "Connect.setForm",
            SinkFamily::CriticalImagesRun => "pagespeed.CriticalImages.Run",
            SinkFamily::AjaxSettings => "ajaxSettings",
            SinkFamily::XhrPost => "xhrPost",
            SinkFamily::WebSocket => "WebSocket",
            SinkFamily::EventSource => "EventSource",
            SinkFamily::LocationAssign => "window.location",
            SinkFamily::SrcAssign => "element.src",
            SinkFamily::XhrSend => "XMLHttpRequest.send",
            SinkFamily::SetRequestHeader => "XMLHttpRequest.setRequestHeader",
            SinkFamily::AjaxData => "$.ajax.data",
            SinkFamily::AjaxHeaders => "$.ajax.headers",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }

    /// The write-side semantic type of the value flowing into this sink.
    pub fn semantic_type(&self) -> SemanticType {
        match self {
            SinkFamily::WindowOpen => SemanticType::WrWinOpenUrl,
            SinkFamily::WebSocket => SemanticType::WrWebsocketUrl,
            SinkFamily::EventSource => SemanticType::WrEventsourceUrl,
            SinkFamily::LocationAssign => SemanticType::WrWinLocUrl,
            SinkFamily::XhrSend => SemanticType::WrReqBody,
            SinkFamily::SetRequestHeader | SinkFamily::AjaxHeaders => SemanticType::WrReqHeader,
            SinkFamily::AjaxData => SemanticType::WrReqParams,
            SinkFamily::XhrOpen
            | SinkFamily::Fetch
            | SinkFamily::Ajax
            | SinkFamily::AsyncRequest
            | SinkFamily::SetForm
            | SinkFamily::CriticalImagesRun
            | SinkFamily::AjaxSettings
            | SinkFamily::XhrPost
            | SinkFamily::SrcAssign => SemanticType::WrReqUrl,
        }
    }
}

impl std::fmt::Display for SinkFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkCandidate {
    pub family: SinkFamily,
    /// The call, `new`, assignment or settings object that issues the request.
    pub node: Node,
    pub argument: Node,
}

impl SinkCandidate {
    /// `<sink>__nid=<id>__Loc=<location>`
    pub fn nid(&self) -> String {
        format!(
            "{}__nid={}__Loc={}",
            self.family.as_str(),
            self.node.id,
            self.node.location
        )
    }
}

pub struct SinkScanner<'g, G: GraphService + ?Sized> {
    graph: &'g G,
    disabled: HashSet<SinkFamily>,
    only: Option<HashSet<NodeId>>,
}

impl<'g, G: GraphService + ?Sized> SinkScanner<'g, G> {
    pub fn new(graph: &'g G) -> Self {
        Self {
            graph,
            disabled: HashSet::new(),
            only: None,
        }
    }

    pub fn with_disabled(mut self, families: impl IntoIterator<Item = SinkFamily>) -> Self {
        self.disabled.extend(families);
        self
    }

    /// Restricts the scan to pre-extracted sink nodes.
    pub fn restrict_to(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.only = Some(ids.into_iter().collect());
        self
    }

    pub fn scan(&self) -> Result<Vec<SinkCandidate>, GraphError> {
        let mut candidates = Vec::new();
        for ty in [NodeType::CallExpression, NodeType::NewExpression] {
            for call in self.graph.match_pattern(&NodePattern::of_type(ty))? {
                if self.wanted(&call) {
                    self.invocation(&call, &mut candidates)?;
                }
            }
        }
        for assignment in self
            .graph
            .match_pattern(&NodePattern::of_type(NodeType::AssignmentExpression))?
        {
            if self.wanted(&assignment) {
                self.assignment(&assignment, &mut candidates)?;
            }
        }
        self.ajax_settings(&mut candidates)?;

        candidates.retain(|c| !self.disabled.contains(&c.family));
        candidates.sort_by_key(|c| (c.node.id, c.family));
        candidates.dedup_by(|a, b| a.node.id == b.node.id && a.family == b.family);
        debug!(sinks = candidates.len(), "scanned sinks");
        Ok(candidates)
    }

    fn wanted(&self, node: &Node) -> bool {
        self.only.as_ref().is_none_or(|ids| ids.contains(&node.id))
    }

    fn push(&self, family: SinkFamily, node: &Node, argument: Option<&Node>, out: &mut Vec<SinkCandidate>) {
        if let Some(argument) = argument {
            out.push(SinkCandidate {
                family,
                node: node.clone(),
                argument: argument.clone(),
            });
        }
    }

    fn invocation(&self, call: &Node, out: &mut Vec<SinkCandidate>) -> Result<(), GraphError> {
        let Some(callee) = child_by_relation(self.graph, call.id, "callee", 0)? else {
            return Ok(());
        };
        let args = children_by_relation(self.graph, call.id, "arguments", 1)?;

        if call.ty == NodeType::NewExpression {
            let name = match callee.ty {
                NodeType::Identifier => Some(callee.code.clone()),
                _ => member_property(self.graph, &callee)?,
            };
            match name.as_deref() {
                Some("WebSocket") => self.push(SinkFamily::WebSocket, call, args.first(), out),
                Some("EventSource") => self.push(SinkFamily::EventSource, call, args.first(), out),
                _ => {}
            }
            return Ok(());
        }

        if callee.ty == NodeType::Identifier {
            match callee.code.as_str() {
                "fetch" => self.push(SinkFamily::Fetch, call, args.first(), out),
                "xhrPost" => self.push(SinkFamily::XhrPost, call, args.get(1), out),
                _ => {}
            }
            return Ok(());
        }

        let Some(method) = member_property(self.graph, &callee)? else {
            return Ok(());
        };
        let receiver = match child_by_relation(self.graph, callee.id, "object", 0)? {
            Some(object) => ExpressionRenderer::new(self.graph).render_node(&object)?.code,
            None => String::new(),
        };
        match method.as_str() {
            "open" if receiver == "window" => self.push(SinkFamily::WindowOpen, call, args.first(), out),
            "open" => self.push(SinkFamily::XhrOpen, call, args.get(1), out),
            "fetch" if receiver == "window" => self.push(SinkFamily::Fetch, call, args.first(), out),
            "ajax" => self.ajax(call, args.first(), out)?,
            "asyncRequest" => self.push(SinkFamily::AsyncRequest, call, args.get(1), out),
            "setForm" => self.push(SinkFamily::SetForm, call, args.first(), out),
            "Run" if receiver.ends_with("CriticalImages") => {
                self.push(SinkFamily::CriticalImagesRun, call, args.get(1), out)
            }
            "send" if receiver != "window" => self.push(SinkFamily::XhrSend, call, args.first(), out),
            "setRequestHeader" => self.push(SinkFamily::SetRequestHeader, call, args.get(1), out),
            _ => {}
        }
        Ok(())
    }

    /// `$.ajax({url, data, headers})` or `$.ajax(url)`.
    fn ajax(&self, call: &Node, settings: Option<&Node>, out: &mut Vec<SinkCandidate>) -> Result<(), GraphError> {
        let Some(settings) = settings else {
            return Ok(());
        };
        if settings.ty != NodeType::ObjectExpression {
            self.push(SinkFamily::Ajax, call, Some(settings), out);
            return Ok(());
        }
        match self.property_value(settings, "url")? {
            Some(url) => self.push(SinkFamily::Ajax, call, Some(&url), out),
            None => self.push(SinkFamily::Ajax, call, Some(settings), out),
        }
        let data = self.property_value(settings, "data")?;
        self.push(SinkFamily::AjaxData, call, data.as_ref(), out);
        let headers = self.property_value(settings, "headers")?;
        self.push(SinkFamily::AjaxHeaders, call, headers.as_ref(), out);
        Ok(())
    }

    fn assignment(&self, assignment: &Node, out: &mut Vec<SinkCandidate>) -> Result<(), GraphError> {
        let Some(left) = child_by_relation(self.graph, assignment.id, "left", 0)? else {
            return Ok(());
        };
        let right = child_by_relation(self.graph, assignment.id, "right", 1)?;
        let target = ExpressionRenderer::new(self.graph).render_node(&left)?.code;
        if LOCATION_TARGETS.contains(&target.as_str()) {
            self.push(SinkFamily::LocationAssign, assignment, right.as_ref(), out);
        } else if member_property(self.graph, &left)?.as_deref() == Some("src") {
            self.push(SinkFamily::SrcAssign, assignment, right.as_ref(), out);
        }
        Ok(())
    }

    /// Settings objects stored under `ajaxSettings` with a `url` property.
    /// When such objects nest, only the innermost one is reported.
    fn ajax_settings(&self, out: &mut Vec<SinkCandidate>) -> Result<(), GraphError> {
        let mut found: Vec<(Node, Node)> = Vec::new();
        for object in self
            .graph
            .match_pattern(&NodePattern::of_type(NodeType::ObjectExpression))?
        {
            if !self.wanted(&object) || !self.is_ajax_settings(&object)? {
                continue;
            }
            if let Some(url) = self.property_value(&object, "url")? {
                found.push((object, url));
            }
        }

        let ids: Vec<NodeId> = found.iter().map(|(object, _)| object.id).collect();
        for (object, url) in &found {
            let mut has_inner = false;
            for &other in &ids {
                if other != object.id && self.is_ancestor(object.id, other)? {
                    has_inner = true;
                    break;
                }
            }
            if !has_inner {
                self.push(SinkFamily::AjaxSettings, object, Some(url), out);
            }
        }
        Ok(())
    }

    fn is_ajax_settings(&self, object: &Node) -> Result<bool, GraphError> {
        let Some((edge, parent)) = self.graph.ast_parent(object.id)? else {
            return Ok(false);
        };
        match parent.ty {
            NodeType::Property if edge.relation_type == "value" => {
                Ok(child_by_relation(self.graph, parent.id, "key", 0)?
                    .is_some_and(|key| key.code == "ajaxSettings" || key.value == "ajaxSettings"))
            }
            NodeType::AssignmentExpression if edge.relation_type == "right" => {
                let Some(left) = child_by_relation(self.graph, parent.id, "left", 0)? else {
                    return Ok(false);
                };
                Ok(member_property(self.graph, &left)?.as_deref() == Some("ajaxSettings"))
            }
            _ => Ok(false),
        }
    }

    fn property_value(&self, object: &Node, name: &str) -> Result<Option<Node>, GraphError> {
        for property in children_by_relation(self.graph, object.id, "properties", 0)? {
            let Some(key) = child_by_relation(self.graph, property.id, "key", 0)? else {
                continue;
            };
            let key_name = if key.ty == NodeType::Literal { &key.value } else { &key.code };
            if key_name == name {
                return child_by_relation(self.graph, property.id, "value", 1);
            }
        }
        Ok(None)
    }

    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> Result<bool, GraphError> {
        let mut current = node;
        while let Some((_, parent)) = self.graph.ast_parent(current)? {
            if parent.id == ancestor {
                return Ok(true);
            }
            current = parent.id;
        }
        Ok(false)
    }
}
