//! JavaScript built-in identifiers that back-tracing never recurses through

use std::collections::HashSet;

const GLOBALS: &[&str] = &[
    "window", "document", "navigator", "location", "history", "screen", "self", "top",
    "parent", "frames", "globalThis", "console", "undefined", "NaN", "Infinity", "arguments",
    "eval", "isFinite", "isNaN", "parseFloat", "parseInt", "decodeURI", "decodeURIComponent",
    "encodeURI", "encodeURIComponent", "escape", "unescape", "alert", "confirm", "prompt",
    "setTimeout", "setInterval", "clearTimeout", "clearInterval", "requestAnimationFrame",
    "cancelAnimationFrame", "requestIdleCallback", "queueMicrotask", "structuredClone",
    "atob", "btoa", "fetch", "postMessage", "addEventListener", "removeEventListener",
    "dispatchEvent", "getComputedStyle", "matchMedia", "scroll",
    "scrollTo", "scrollBy", "focus", "blur", "performance", "crypto", "indexedDB", "caches",
    "opener", "require", "module", "exports", "define",
];

const CONSTRUCTORS: &[&str] = &[
    "Object", "Function", "Array", "String", "Number", "Boolean", "Symbol", "BigInt", "Date",
    "RegExp", "Error", "TypeError", "RangeError", "SyntaxError", "ReferenceError", "EvalError",
    "URIError", "AggregateError", "Promise", "Proxy", "Reflect", "Map", "Set", "WeakMap",
    "WeakSet", "WeakRef", "ArrayBuffer", "SharedArrayBuffer", "DataView", "Int8Array",
    "Uint8Array", "Uint8ClampedArray", "Int16Array", "Uint16Array", "Int32Array",
    "Uint32Array", "Float32Array", "Float64Array", "BigInt64Array", "BigUint64Array", "JSON",
    "Math", "Intl", "Atomics", "XMLHttpRequest", "WebSocket", "EventSource", "FormData",
    "URL", "URLSearchParams", "Blob", "File", "FileReader", "Headers", "Request", "Response",
    "AbortController", "Image", "Audio", "Option", "Event", "CustomEvent", "MessageEvent",
    "MessageChannel", "BroadcastChannel", "Worker", "SharedWorker", "MutationObserver",
    "IntersectionObserver", "ResizeObserver", "TextEncoder", "TextDecoder", "DOMParser",
    "XMLSerializer", "Node", "Element", "HTMLElement", "Document", "Window", "Notification",
    "ActiveXObject",
];

const METHODS: &[&str] = &[
    // Object / Function
    "prototype", "constructor", "call", "apply", "bind", "toString", "valueOf",
    "hasOwnProperty", "isPrototypeOf", "propertyIsEnumerable", "assign", "defineProperty",
    "defineProperties", "freeze", "seal", "getPrototypeOf", "setPrototypeOf",
    "getOwnPropertyNames", "fromEntries",
    // Array
    "push", "pop", "shift", "unshift", "slice", "splice", "concat", "indexOf", "lastIndexOf",
    "includes", "findIndex", "forEach", "reduce", "reduceRight", "some", "every", "flat",
    "flatMap", "fill", "isArray",
    // String
    "charAt", "charCodeAt", "codePointAt", "fromCharCode", "substring", "substr",
    "replaceAll", "matchAll", "trim", "trimStart", "trimEnd", "toLowerCase", "toUpperCase",
    "startsWith", "endsWith", "padStart", "padEnd", "repeat", "normalize", "localeCompare",
    // Number / Math
    "toFixed", "toPrecision", "abs", "ceil", "floor", "round", "pow", "random", "sqrt", "sign",
    "trunc", "exp", "sin", "cos", "tan", "PI",
    // Date
    "now", "getTime", "getDate", "getDay", "getFullYear", "getHours", "getMinutes",
    "getMonth", "getSeconds", "getMilliseconds", "toISOString", "toUTCString",
    // JSON / Promise
    "stringify", "then", "catch", "finally", "resolve", "reject", "race", "allSettled",
    // DOM
    "getElementById", "getElementsByClassName", "getElementsByTagName", "getElementsByName",
    "querySelector", "querySelectorAll", "createElement", "createTextNode", "appendChild",
    "removeChild", "insertBefore", "replaceChild", "cloneNode", "setAttribute",
    "getAttribute", "removeAttribute", "hasAttribute", "innerHTML", "outerHTML",
    "textContent", "innerText", "classList", "dataset", "style", "preventDefault",
    "stopPropagation", "stopImmediatePropagation", "currentTarget", "readyState",
    // console
    "warn",
];

const LIBRARIES: &[&str] = &[
    "$", "jQuery", "_", "angular", "React", "ReactDOM", "Vue", "Backbone", "Ember", "Ext",
    "YAHOO", "YUI", "Prototype", "MooTools", "dojo", "ko", "moment", "axios", "Zepto",
];

/// Immutable set of names the back-tracer treats as opaque.
#[derive(Debug, Clone)]
pub struct Builtins {
    names: HashSet<String>,
}

impl Default for Builtins {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Builtins {
    pub fn empty() -> Self {
        Self {
            names: HashSet::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut builtins = Self::empty();
        for group in [GLOBALS, CONSTRUCTORS, METHODS, LIBRARIES] {
            builtins.extend(group.iter().copied());
        }
        builtins
    }

    pub fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref().trim();
            if !name.is_empty() {
                self.names.insert(name.to_string());
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
