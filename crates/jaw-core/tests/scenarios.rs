//! End-to-end analysis scenarios on hand-built HPG fixtures
//!
//! Each fixture mirrors the graph the HPG exporter produces for a short
//! JavaScript program, including the PDG and call-graph edges it would add.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use jaw_core::analysis::{AnalysisEngine, PageContext};
use jaw_core::artifacts::{FLOWS_JSON_FILENAME, FLOWS_TEXT_FILENAME, URL_FILENAME};
use jaw_core::config::Config;
use jaw_core::graph::csv::{NODES_FILENAME, NODES_HEADER, POINTS_TO_FILENAME, RELS_FILENAME, RELS_HEADER};
use jaw_core::graph::{GraphService, HpgBuilder, InMemoryGraph, NodeId, Relation};
use jaw_core::reach::Reachability;
use jaw_core::report::{Flow, WebpageReport};
use jaw_core::semantic::SemanticType;
use jaw_core::trace::{BackTracer, Builtins, TraceOptions};
use tempfile::TempDir;

fn analyze(graph: &InMemoryGraph) -> WebpageReport {
    AnalysisEngine::new(Config::default()).analyze_graph(graph, &PageContext::default())
}

fn only_flow(report: &WebpageReport) -> &Flow {
    assert_eq!(report.flows.len(), 1, "expected one flow, got {:#?}", report.flows);
    &report.flows[0]
}

fn types(flow: &Flow) -> Vec<SemanticType> {
    flow.semantic_types.iter().collect()
}

fn all_codes(flow: &Flow) -> Vec<String> {
    flow.program_slices
        .values()
        .flat_map(|v| v.slices.iter().map(|s| s.code.clone()))
        .collect()
}

/// `var u = location.hash; var x = new XMLHttpRequest(); x.open('GET', u);`
fn xhr_open_fixture() -> (InMemoryGraph, NodeId) {
    let b = HpgBuilder::new();
    let decl_u = b.var_decl("var", "u", Some(b.path("location.hash")));
    b.line(2);
    let decl_x = b.var_decl("var", "x", Some(b.new_expr(b.ident("XMLHttpRequest"), &[])));
    b.line(3);
    let open = b.method_call(b.ident("x"), "open", &[b.literal("GET"), b.ident("u")]);
    let stmt = b.expr_stmt(open);
    b.program(&[decl_u, decl_x, stmt]);
    b.pdg(decl_u, stmt, "u");
    b.pdg(decl_x, stmt, "x");
    (b.finish(), open)
}

/// `this.url = location.href; function A(){ fetch(this.url); } var obj = {}; A.call(obj);`
fn this_call_fixture() -> (InMemoryGraph, NodeId) {
    let b = HpgBuilder::new();
    let assign = b.expr_stmt(b.assign(b.path("this.url"), b.path("location.href")));
    b.line(2);
    let this_in_a = b.this_expr();
    let fetch = b.expr_stmt(b.call(b.ident("fetch"), &[b.member(this_in_a, "url")]));
    let a = b.function_decl("A", &[], &[fetch]);
    b.line(3);
    let obj = b.var_decl("var", "obj", Some(b.object(&[])));
    b.line(4);
    let call_stmt = b.expr_stmt(b.method_call(b.ident("A"), "call", &[b.ident("obj")]));
    b.program(&[assign, a, obj, call_stmt]);
    b.pdg(assign, fetch, "this");
    b.pdg(obj, call_stmt, "obj");
    (b.finish(), this_in_a)
}

#[test]
fn xhr_open_with_location_hash() {
    let (graph, open) = xhr_open_fixture();
    let report = analyze(&graph);
    let flow = only_flow(&report);

    assert_eq!(flow.sink_type, "XMLHttpRequest.open");
    assert_eq!(flow.node_id, open);
    assert_eq!(flow.loc, "line:3");
    assert_eq!(types(flow), vec![SemanticType::RdWinLoc, SemanticType::WrReqUrl]);
    assert_eq!(all_codes(flow), vec!["var u = location.hash"]);
    assert_eq!(flow.reachability, Reachability::OnPageLoad);
}

#[test]
fn message_listener_fetches_event_data() {
    let b = HpgBuilder::new();
    let fetch = b.call(b.ident("fetch"), &[b.path("e.data")]);
    let handler = b.arrow(&["e"], fetch);
    let register = b.method_call(
        b.ident("window"),
        "addEventListener",
        &[b.literal("message"), handler],
    );
    let stmt = b.expr_stmt(register);
    b.program(&[stmt]);
    b.pdg(handler, fetch, "e");
    let graph = b.finish();

    let report = analyze(&graph);
    let flow = only_flow(&report);
    assert_eq!(flow.sink_type, "fetch");
    assert_eq!(types(flow), vec![SemanticType::RdPm, SemanticType::WrReqUrl]);

    let Reachability::Witnesses(witnesses) = &flow.reachability else {
        panic!("expected event witnesses, got {:?}", flow.reachability);
    };
    assert_eq!(witnesses.len(), 1);
    assert_eq!(witnesses[0].call_expr_id, register);
    assert_eq!(witnesses[0].top_expr_id, stmt);
}

#[test]
fn ajax_url_bound_through_call_site() {
    let b = HpgBuilder::new();
    let settings = b.object(&[("url", b.ident("url"))]);
    let ajax = b.expr_stmt(b.method_call(b.ident("$"), "ajax", &[settings]));
    let send = b.function_decl("send", &["url"], &[ajax]);
    let body = b.body_of(send).unwrap();
    b.line(2);
    let call = b.call(b.ident("send"), &[b.path("document.referrer")]);
    b.program(&[send, b.expr_stmt(call)]);
    b.pdg(body, ajax, "url");
    b.cg(call, send);
    let graph = b.finish();

    let report = analyze(&graph);
    let flow = only_flow(&report);
    assert_eq!(flow.sink_type, "$.ajax");
    assert_eq!(types(flow), vec![SemanticType::RdDocRef, SemanticType::WrReqUrl]);
    assert_eq!(
        all_codes(flow),
        vec![
            "url = FUNCTION_ARGUMENT".to_string(),
            format!("[scope-id={call}] url <--(invocation-value)-- document.referrer"),
        ]
    );
    assert_eq!(flow.reachability, Reachability::OnPageLoad);
}

#[test]
fn push_subscription_flows_through_promise_chain() {
    let b = HpgBuilder::new();
    let ready = b.path("navigator.serviceWorker.ready");
    let subscription = b.method_call(b.path("r.pushManager"), "getSubscription", &[]);
    let first = b.arrow(&["r"], subscription);
    let then_first = b.method_call(ready, "then", &[first]);
    let fetch = b.call(b.ident("fetch"), &[b.path("s.endpoint")]);
    let second = b.arrow(&["s"], fetch);
    let then_second = b.method_call(then_first, "then", &[second]);
    b.program(&[b.expr_stmt(then_second)]);
    b.pdg(second, fetch, "s");
    let graph = b.finish();

    let report = analyze(&graph);
    let flow = only_flow(&report);
    assert_eq!(flow.sink_type, "fetch");
    assert_eq!(types(flow), vec![SemanticType::ReqPushSub, SemanticType::WrReqUrl]);
    assert!(
        all_codes(flow)
            .iter()
            .any(|code| code.contains("<--(invocation-value)--") && code.contains("pushManager"))
    );
}

#[test]
fn this_resolves_to_explicit_receiver() {
    let (graph, this_in_a) = this_call_fixture();
    let report = analyze(&graph);
    let flow = only_flow(&report);

    assert_eq!(flow.sink_type, "fetch");
    assert_eq!(types(flow), vec![SemanticType::RdWinLoc, SemanticType::WrReqUrl]);
    let codes = all_codes(flow);
    assert!(codes.contains(&"this --(points-to)--> obj".to_string()));
    assert!(codes.contains(&"var obj = {}".to_string()));
    assert!(codes.contains(&"this.url = location.href".to_string()));
    assert_eq!(flow.reachability, Reachability::OnPageLoad);

    let owners: Vec<_> = graph
        .outgoing(this_in_a, Some(&Relation::PointsTo))
        .unwrap()
        .into_iter()
        .map(|e| e.relation_type)
        .collect();
    assert_eq!(owners, vec!["top", "owner"]);
}

#[test]
fn points_to_edges_are_reused_on_second_run() {
    let (graph, _) = this_call_fixture();
    let first = analyze(&graph);
    let created = graph.created_edges().len();
    assert!(created > 0);

    let second = analyze(&graph);
    assert_eq!(graph.created_edges().len(), created);
    assert_eq!(first, second);
}

#[test]
fn loop_over_window_name_terminates() {
    let b = HpgBuilder::new();
    let p = b.var_decl("var", "p", Some(b.path("window.name")));
    let init = b.var_decl("var", "i", Some(b.number(0)));
    let test = b.binary("<", b.ident("i"), b.path("p.length"));
    let update = b.update("++", b.ident("i"));
    let for_loop = b.for_stmt(Some(init), Some(test), Some(update), b.block(&[]));
    let fetch = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("p")]));
    let function = b.function_expr(None, &[], &[p, for_loop, fetch]);
    b.program(&[b.expr_stmt(b.call(function, &[]))]);
    b.pdg(p, for_loop, "p");
    b.pdg(p, fetch, "p");
    b.pdg(init, for_loop, "i");
    b.pdg(for_loop, for_loop, "i");
    let graph = b.finish();

    let report = analyze(&graph);
    let flow = only_flow(&report);
    assert_eq!(types(flow), vec![SemanticType::RdWinName, SemanticType::WrReqUrl]);
    assert_eq!(flow.reachability, Reachability::OnPageLoad);
    assert!(!flow.partial);
}

#[test]
fn tracing_is_idempotent_and_duplicate_free() {
    let (graph, open) = xhr_open_fixture();
    let builtins = Builtins::with_defaults();
    let statement = jaw_core::trace::cfg_statement(&graph, open).unwrap();

    let mut tracer = BackTracer::new(&graph, &builtins, TraceOptions::default());
    let first = tracer.trace_value("u", statement.id).unwrap();
    let second = tracer.trace_value("u", statement.id).unwrap();
    assert_eq!(first, second);

    let mut seen = HashSet::new();
    for slice in &first {
        assert!(seen.insert((slice.code.clone(), slice.location.clone())));
    }
}

#[test]
fn unknown_variable_has_no_slices() {
    let (graph, open) = xhr_open_fixture();
    let builtins = Builtins::with_defaults();
    let statement = jaw_core::trace::cfg_statement(&graph, open).unwrap();

    let mut tracer = BackTracer::new(&graph, &builtins, TraceOptions::default());
    assert!(tracer.trace_value("missing", statement.id).unwrap().is_empty());
}

#[test]
fn semantic_type_sets_absorb_non_reach() {
    let b = HpgBuilder::new();
    let decl = b.var_decl("var", "a", Some(b.literal("/static")));
    let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("a")]));
    b.program(&[decl, sink]);
    b.pdg(decl, sink, "a");
    let graph = b.finish();

    let report = analyze(&graph);
    let flow = only_flow(&report);
    assert_eq!(
        flow.program_slices["a"].semantic_types.iter().collect::<Vec<_>>(),
        vec![SemanticType::NonReach]
    );
    assert_eq!(types(flow), vec![SemanticType::WrReqUrl]);
}

#[test]
fn recursion_never_exceeds_depth_budget() {
    let b = HpgBuilder::new();
    let mut statements = Vec::new();
    let mut previous = b.var_decl("var", "v0", Some(b.path("document.cookie")));
    statements.push(previous);
    for i in 1..40 {
        let stmt = b.var_decl("var", &format!("v{i}"), Some(b.ident(&format!("v{}", i - 1))));
        b.pdg(previous, stmt, &format!("v{}", i - 1));
        statements.push(stmt);
        previous = stmt;
    }
    let sink = b.expr_stmt(b.call(b.ident("fetch"), &[b.ident("v39")]));
    b.pdg(previous, sink, "v39");
    statements.push(sink);
    b.program(&statements);
    let graph = b.finish();

    let mut config = Config::default();
    config.trace.max_depth = 8;
    let report = AnalysisEngine::new(config).analyze_graph(&graph, &PageContext::default());
    let flow = only_flow(&report);
    assert!(flow.partial);
    assert_eq!(flow.program_slices["v39"].slices.len(), 8);
    assert!(!flow.semantic_types.contains(SemanticType::RdCookie));
}

#[test]
fn report_json_round_trips() {
    let (graph, _) = this_call_fixture();
    let report = analyze(&graph);

    let json = report.to_json().unwrap();
    let back: WebpageReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back, report);
    assert_eq!(back.to_json().unwrap(), json);
}

fn export_csv(graph: &InMemoryGraph, dir: &Path) {
    let mut nodes = vec![format!("{NODES_HEADER}¿Computed")];
    let mut rels = vec![RELS_HEADER.to_string()];
    let mut ids: Vec<NodeId> = graph.nodes().map(|n| n.id).collect();
    ids.sort();
    for id in ids {
        let n = graph.get_node(id).unwrap();
        nodes.push(
            [
                n.id.to_string(),
                n.ty.to_string(),
                n.kind,
                n.code,
                n.range,
                n.location,
                n.value,
                n.raw,
                n.is_async.to_string(),
                n.label,
                n.semantic_type,
                n.computed.to_string(),
            ]
            .join("¿"),
        );
        for edge in graph.outgoing(id, None).unwrap() {
            rels.push(format!(
                "{}¿{}¿{}¿{}¿{}",
                edge.from, edge.to, edge.relation, edge.relation_type, edge.arguments
            ));
        }
    }
    fs::write(dir.join(NODES_FILENAME), nodes.join("\n")).unwrap();
    fs::write(dir.join(RELS_FILENAME), rels.join("\n")).unwrap();
}

#[test]
fn webpage_run_writes_reports_and_points_to_edges() {
    let site = TempDir::new().unwrap();
    let page = site.path().join("page-1");
    fs::create_dir(&page).unwrap();
    let (graph, _) = this_call_fixture();
    export_csv(&graph, &page);
    fs::write(page.join(URL_FILENAME), "https://example.com/\n").unwrap();

    let engine = AnalysisEngine::new(Config::default());
    let outcome = engine.run_webpage(&page, None);
    assert_eq!(outcome.webpage, "page-1");
    assert_eq!(outcome.flows, 1);
    assert!(outcome.error.is_none());
    assert!(outcome.points_to_edges > 0);
    assert!(page.join(POINTS_TO_FILENAME).exists());
    assert!(page.join(FLOWS_TEXT_FILENAME).exists());

    let written: WebpageReport =
        serde_json::from_str(&fs::read_to_string(page.join(FLOWS_JSON_FILENAME)).unwrap()).unwrap();
    assert_eq!(written.url, "https://example.com/");
    assert_eq!(written.flows[0].webpage, "page-1");

    let rerun = engine.run_webpage(&page, None);
    assert_eq!(rerun.points_to_edges, 0);
    assert_eq!(rerun.flows, 1);
}

#[test]
fn unreadable_webpage_writes_error_stub() {
    let site = TempDir::new().unwrap();
    let page = site.path().join("broken");
    fs::create_dir(&page).unwrap();

    let outcome = AnalysisEngine::new(Config::default()).run_webpage(&page, None);
    assert!(outcome.error.is_some());
    let stub = fs::read_to_string(page.join(FLOWS_TEXT_FILENAME)).unwrap();
    assert!(stub.starts_with("{\"error\":"));
}
