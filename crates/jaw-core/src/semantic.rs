//! Semantic-type vocabulary and the lexical fingerprint tagger
//!
//! Slices are classified by matching source-API fingerprints against their
//! rendered code and against each identifier they mention. The vocabulary is
//! closed: sources (`RD_*`, `REQ_PUSH_SUB`, `DOMCLOB_*`), the write-side sink
//! types (`WR_*`), and `NON_REACH` for "nothing attacker-controlled found".

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::trace::Slice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SemanticType {
    NonReach,
    RdWinLoc,
    RdWinName,
    RdDocRef,
    RdPm,
    RdWebStorage,
    RdDom,
    RdCookie,
    ReqPushSub,
    DomclobWin,
    DomclobDoc,
    WrWebsocketUrl,
    WrEventsourceUrl,
    WrReqUrl,
    WrReqBody,
    WrReqHeader,
    WrReqParams,
    WrWinOpenUrl,
    WrWinLocUrl,
}

impl SemanticType {
    pub const ALL: [SemanticType; 19] = [
        SemanticType::NonReach,
        SemanticType::RdWinLoc,
        SemanticType::RdWinName,
        SemanticType::RdDocRef,
        SemanticType::RdPm,
        SemanticType::RdWebStorage,
        SemanticType::RdDom,
        SemanticType::RdCookie,
        SemanticType::ReqPushSub,
        SemanticType::DomclobWin,
        SemanticType::DomclobDoc,
        SemanticType::WrWebsocketUrl,
        SemanticType::WrEventsourceUrl,
        SemanticType::WrReqUrl,
        SemanticType::WrReqBody,
        SemanticType::WrReqHeader,
        SemanticType::WrReqParams,
        SemanticType::WrWinOpenUrl,
        SemanticType::WrWinLocUrl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::NonReach => "NON_REACH",
            SemanticType::RdWinLoc => "RD_WIN_LOC",
            SemanticType::RdWinName => "RD_WIN_NAME",
            SemanticType::RdDocRef => "RD_DOC_REF",
            SemanticType::RdPm => "RD_PM",
            SemanticType::RdWebStorage => "RD_WEB_STORAGE",
            SemanticType::RdDom => "RD_DOM",
            SemanticType::RdCookie => "RD_COOKIE",
            SemanticType::ReqPushSub => "REQ_PUSH_SUB",
            SemanticType::DomclobWin => "DOMCLOB_WIN",
            SemanticType::DomclobDoc => "DOMCLOB_DOC",
            SemanticType::WrWebsocketUrl => "WR_WEBSOCKET_URL",
            SemanticType::WrEventsourceUrl => "WR_EVENTSOURCE_URL",
            SemanticType::WrReqUrl => "WR_REQ_URL",
            SemanticType::WrReqBody => "WR_REQ_BODY",
            SemanticType::WrReqHeader => "WR_REQ_HEADER",
            SemanticType::WrReqParams => "WR_REQ_PARAMS",
            SemanticType::WrWinOpenUrl => "WR_WIN_OPEN_URL",
            SemanticType::WrWinLocUrl => "WR_WIN_LOC_URL",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|ty| ty.as_str() == name)
    }

    /// Attacker-controllable read (or `NON_REACH`), as opposed to a sink write.
    pub fn is_source(&self) -> bool {
        !self.as_str().starts_with("WR_")
    }

    pub fn description(&self) -> &'static str {
        match self {
            SemanticType::NonReach => "No attacker-controllable source reaches the value",
            SemanticType::RdWinLoc => "Reads the page URL (window.location and its parts)",
            SemanticType::RdWinName => "Reads window.name, which survives cross-origin navigation",
            SemanticType::RdDocRef => "Reads document.referrer",
            SemanticType::RdPm => "Reads the payload of a postMessage event",
            SemanticType::RdWebStorage => "Reads localStorage or sessionStorage",
            SemanticType::RdDom => "Reads attributes or content of DOM elements",
            SemanticType::RdCookie => "Reads document.cookie",
            SemanticType::ReqPushSub => "Uses a push-notification subscription",
            SemanticType::DomclobWin => "Reads a window property that injected markup can clobber",
            SemanticType::DomclobDoc => "Reads a document property that injected markup can clobber",
            SemanticType::WrWebsocketUrl => "URL of a WebSocket connection",
            SemanticType::WrEventsourceUrl => "URL of an EventSource stream",
            SemanticType::WrReqUrl => "URL of an outgoing HTTP request",
            SemanticType::WrReqBody => "Body of an outgoing HTTP request",
            SemanticType::WrReqHeader => "Header of an outgoing HTTP request",
            SemanticType::WrReqParams => "Parameters of an outgoing HTTP request",
            SemanticType::WrWinOpenUrl => "URL passed to window.open",
            SemanticType::WrWinLocUrl => "URL assigned to the page location",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered set of semantic types in which `NON_REACH` is absorbed by any
/// other member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<SemanticType>", into = "Vec<SemanticType>")]
pub struct SemanticTypeSet(BTreeSet<SemanticType>);

impl SemanticTypeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn non_reach() -> Self {
        Self::from_iter([SemanticType::NonReach])
    }

    pub fn insert(&mut self, ty: SemanticType) {
        self.0.insert(ty);
        if self.0.len() > 1 {
            self.0.remove(&SemanticType::NonReach);
        }
    }

    pub fn union_with(&mut self, other: &SemanticTypeSet) {
        for ty in other.iter() {
            self.insert(ty);
        }
    }

    pub fn contains(&self, ty: SemanticType) -> bool {
        self.0.contains(&ty)
    }

    pub fn iter(&self) -> impl Iterator<Item = SemanticType> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `{NON_REACH}` for an empty set.
    pub fn or_non_reach(mut self) -> Self {
        if self.0.is_empty() {
            self.0.insert(SemanticType::NonReach);
        }
        self
    }
}

impl FromIterator<SemanticType> for SemanticTypeSet {
    fn from_iter<I: IntoIterator<Item = SemanticType>>(iter: I) -> Self {
        let mut set = SemanticTypeSet::new();
        for ty in iter {
            set.insert(ty);
        }
        set
    }
}

impl From<Vec<SemanticType>> for SemanticTypeSet {
    fn from(types: Vec<SemanticType>) -> Self {
        types.into_iter().collect()
    }
}

impl From<SemanticTypeSet> for Vec<SemanticType> {
    fn from(set: SemanticTypeSet) -> Self {
        set.0.into_iter().collect()
    }
}

impl fmt::Display for SemanticTypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|ty| ty.as_str()).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintTarget {
    /// Searched in rendered code and in identifiers.
    Anywhere,
    /// Only an identifier equal to the whole pattern.
    Identifier,
}

#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub ty: SemanticType,
    pub pattern: Regex,
    pub target: FingerprintTarget,
}

/// Immutable fingerprint table, built once per engine and shared by reference.
#[derive(Debug, Clone, Default)]
pub struct FingerprintRegistry {
    fingerprints: Vec<Fingerprint>,
    document_variables: Vec<String>,
}

impl FingerprintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_location_sources();
        registry.register_document_sources();
        registry.register_dom_sources();
        registry.register_misc_sources();
        registry
    }

    fn add(&mut self, ty: SemanticType, pattern: &str) {
        if let Err(err) = self.register_pattern(ty, pattern) {
            tracing::warn!(%err, pattern, "skipping invalid fingerprint");
        }
    }

    fn add_identifier(&mut self, ty: SemanticType, name: &str) {
        let pattern = format!("^{}$", regex::escape(name));
        if let Ok(pattern) = Regex::new(&pattern) {
            self.fingerprints.push(Fingerprint {
                ty,
                pattern,
                target: FingerprintTarget::Identifier,
            });
        }
    }

    fn register_location_sources(&mut self) {
        self.add(SemanticType::RdWinLoc, r"\bwindow\.location\b");
        self.add(
            SemanticType::RdWinLoc,
            r"\blocation\.(href|hash|search|pathname|host|hostname|origin|toString)\b",
        );
        self.add(SemanticType::RdWinLoc, r"\bdocument\.(location|URL|documentURI|baseURI)\b");
        self.add(SemanticType::RdWinLoc, r"\bHistory\.getBookmarkedState\b");
        self.add_identifier(SemanticType::RdWinLoc, "location");
        self.add(SemanticType::RdWinName, r"\bwindow\.name\b");
    }

    fn register_document_sources(&mut self) {
        self.add(SemanticType::RdDocRef, r"\bdocument\.referrer\b");
        self.add(SemanticType::RdCookie, r"\bdocument\.cookie\b");
        self.add(SemanticType::RdWebStorage, r"\b(localStorage|sessionStorage)\b");
    }

    fn register_dom_sources(&mut self) {
        self.add(SemanticType::RdDom, r"\bgetElements?By\w*\s*\(");
        self.add(SemanticType::RdDom, r"\.querySelector(All)?\s*\(");
        self.add(SemanticType::RdDom, r"(^|[^\w$.])\$\s*\(");
        self.add(SemanticType::RdDom, r"\bjQuery\s*\(");
        self.add(SemanticType::RdDom, r"\.attr\s*\(");
        self.add(SemanticType::RdDom, r"\.getAttribute\s*\(");
        self.add(SemanticType::RdDom, r"\.readAttribute\s*\(");
    }

    fn register_misc_sources(&mut self) {
        self.add(SemanticType::RdPm, r"\b(e|ev|evt|event|msg|message)\.data\b");
        self.add(SemanticType::ReqPushSub, r"\bpushManager\b");
    }

    pub fn register_pattern(&mut self, ty: SemanticType, pattern: &str) -> Result<(), regex::Error> {
        self.fingerprints.push(Fingerprint {
            ty,
            pattern: Regex::new(pattern)?,
            target: FingerprintTarget::Anywhere,
        });
        Ok(())
    }

    /// Registers DOM-clobbering source names such as `window.config` or
    /// `document.forms`. A `window.` name also matches the bare global.
    pub fn register_domclob_source(&mut self, name: &str) {
        let name = name.trim();
        if let Some(rest) = name.strip_prefix("document.") {
            self.add(
                SemanticType::DomclobDoc,
                &format!(r"\bdocument\.{}\b", regex::escape(rest)),
            );
        } else {
            let rest = name.strip_prefix("window.").unwrap_or(name);
            self.add(
                SemanticType::DomclobWin,
                &format!(r"\bwindow\.{}\b", regex::escape(rest)),
            );
            self.add_identifier(SemanticType::DomclobWin, rest);
        }
    }

    /// HTML-derived names reachable as `document.<name>`; reads of them are DOM reads.
    pub fn register_document_variable(&mut self, name: &str) {
        let name = name.trim();
        if name.is_empty() || self.document_variables.iter().any(|v| v == name) {
            return;
        }
        self.document_variables.push(name.to_string());
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    fn match_into(&self, text: &str, is_identifier: bool, out: &mut SemanticTypeSet) {
        for fingerprint in &self.fingerprints {
            let applies = match fingerprint.target {
                FingerprintTarget::Anywhere => true,
                FingerprintTarget::Identifier => is_identifier,
            };
            if applies && fingerprint.pattern.is_match(text) {
                out.insert(fingerprint.ty);
            }
        }
    }

    fn match_document_variables(&self, text: &str, is_identifier: bool, extra: &[String], out: &mut SemanticTypeSet) {
        for name in self.document_variables.iter().chain(extra) {
            let hit = if is_identifier {
                text == name
            } else {
                text.contains(&format!("document.{name}"))
            };
            if hit {
                out.insert(SemanticType::RdDom);
            }
        }
    }

    /// Lexical tag of a code string; `{NON_REACH}` when nothing matches.
    pub fn tag_code(&self, code: &str) -> SemanticTypeSet {
        let mut out = SemanticTypeSet::new();
        self.match_into(code, false, &mut out);
        self.match_document_variables(code, false, &[], &mut out);
        out.or_non_reach()
    }

    /// Tags one slice from its code and identifiers.
    pub fn tag_slice(&self, slice: &Slice, document_variables: &[String]) -> SemanticTypeSet {
        let mut out = SemanticTypeSet::new();
        self.match_into(&slice.code, false, &mut out);
        self.match_document_variables(&slice.code, false, document_variables, &mut out);
        for identifier in &slice.identifiers {
            self.match_into(identifier, true, &mut out);
            self.match_document_variables(identifier, true, document_variables, &mut out);
        }
        out.or_non_reach()
    }

    pub fn tag_slices<'a>(
        &self,
        slices: impl IntoIterator<Item = &'a Slice>,
        document_variables: &[String],
    ) -> SemanticTypeSet {
        let mut out = SemanticTypeSet::new();
        for slice in slices {
            out.union_with(&self.tag_slice(slice, document_variables));
        }
        out.or_non_reach()
    }
}
