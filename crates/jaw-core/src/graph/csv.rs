//! HPG on-disk format: `nodes.csv` / `rels.csv` with a `¿` field delimiter
//!
//! Columns are resolved by header name so exports that omit optional columns
//! (such as `Computed`) still load. Materialised `pointsTo` edges live in a
//! side file that is appended to after each run.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{Edge, GraphError, GraphService, InMemoryGraph, Node, NodeId, NodeType, Relation};

pub const DELIMITER: char = '¿';
pub const NODES_FILENAME: &str = "nodes.csv";
pub const RELS_FILENAME: &str = "rels.csv";
pub const POINTS_TO_FILENAME: &str = "rels.points_to.csv";

pub const NODES_HEADER: &str =
    "Id:ID¿Type¿Kind¿Code¿Range¿Location¿Value¿Raw¿Async¿Label:LABEL¿SemanticType";
pub const RELS_HEADER: &str = ":START_ID¿:END_ID¿:TYPE¿RelationType¿Arguments";

struct Header {
    columns: HashMap<String, usize>,
}

impl Header {
    fn parse(line: &str) -> Self {
        let columns = split_row(line)
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                // `Id:ID` and `Label:LABEL` carry bulk-loader type suffixes.
                let name = match name.split_once(':') {
                    Some((head, _)) if !head.is_empty() => head.to_string(),
                    _ => name,
                };
                (name, i)
            })
            .collect();
        Self { columns }
    }

    fn get<'a>(&self, row: &'a [String], name: &str) -> &'a str {
        self.columns
            .get(name)
            .and_then(|&i| row.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }
}

fn split_row(line: &str) -> Vec<String> {
    line.split(DELIMITER).map(unquote).collect()
}

fn unquote(field: &str) -> String {
    let field = field.trim_end_matches(['\r', '\n']);
    if field.len() >= 2 && field.starts_with('"') && field.ends_with('"') {
        field[1..field.len() - 1].replace("\"\"", "\"")
    } else {
        field.to_string()
    }
}

fn read(path: &Path) -> Result<String, GraphError> {
    fs::read_to_string(path).map_err(|source| GraphError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn malformed(path: &Path, line: usize, message: impl Into<String>) -> GraphError {
    GraphError::MalformedRow {
        path: path.to_path_buf(),
        line,
        message: message.into(),
    }
}

fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

pub fn parse_nodes(path: &Path, content: &str) -> Result<Vec<Node>, GraphError> {
    let mut lines = content.lines().enumerate();
    let header = match lines.next() {
        Some((_, line)) => Header::parse(line),
        None => return Ok(Vec::new()),
    };

    let mut nodes = Vec::new();
    for (index, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let row = split_row(line);
        let id: NodeId = header
            .get(&row, "Id")
            .parse()
            .map_err(|e| malformed(path, index + 1, format!("invalid node id: {e}")))?;

        let mut node = Node::new(id, NodeType::from_name(header.get(&row, "Type")));
        node.kind = header.get(&row, "Kind").to_string();
        node.code = header.get(&row, "Code").to_string();
        node.range = header.get(&row, "Range").to_string();
        node.location = header.get(&row, "Location").to_string();
        node.value = header.get(&row, "Value").to_string();
        node.raw = header.get(&row, "Raw").to_string();
        node.is_async = parse_bool(header.get(&row, "Async"));
        node.computed = parse_bool(header.get(&row, "Computed"));
        node.semantic_type = header.get(&row, "SemanticType").to_string();
        let label = header.get(&row, "Label");
        if !label.is_empty() {
            node.label = label.to_string();
        }
        nodes.push(node);
    }
    Ok(nodes)
}

pub fn parse_rels(path: &Path, content: &str) -> Result<Vec<Edge>, GraphError> {
    let mut lines = content.lines().enumerate();
    let header = match lines.next() {
        Some((_, line)) => Header::parse(line),
        None => return Ok(Vec::new()),
    };
    // `:START_ID` has an empty head before the colon, so it keeps its full name.
    let start = if header.columns.contains_key(":START_ID") {
        ":START_ID"
    } else {
        "START_ID"
    };
    let end = if header.columns.contains_key(":END_ID") {
        ":END_ID"
    } else {
        "END_ID"
    };
    let ty = if header.columns.contains_key(":TYPE") {
        ":TYPE"
    } else {
        "TYPE"
    };

    let mut edges = Vec::new();
    for (index, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let row = split_row(line);
        let from: NodeId = header
            .get(&row, start)
            .parse()
            .map_err(|e| malformed(path, index + 1, format!("invalid start id: {e}")))?;
        let to: NodeId = header
            .get(&row, end)
            .parse()
            .map_err(|e| malformed(path, index + 1, format!("invalid end id: {e}")))?;
        let relation = Relation::from_name(header.get(&row, ty));
        edges.push(
            Edge::new(from, to, relation)
                .with_relation_type(header.get(&row, "RelationType"))
                .with_arguments(header.get(&row, "Arguments")),
        );
    }
    Ok(edges)
}

/// Loads a webpage's HPG, including previously materialised `pointsTo` edges.
pub fn load_dir(dir: &Path) -> Result<InMemoryGraph, GraphError> {
    let nodes_path = dir.join(NODES_FILENAME);
    let rels_path = dir.join(RELS_FILENAME);

    let mut graph = InMemoryGraph::new();
    for node in parse_nodes(&nodes_path, &read(&nodes_path)?)? {
        graph.insert_node(node);
    }

    let mut edges = parse_rels(&rels_path, &read(&rels_path)?)?;
    let points_to_path = dir.join(POINTS_TO_FILENAME);
    if points_to_path.exists() {
        let cached = parse_rels(&points_to_path, &read(&points_to_path)?)?;
        debug!(count = cached.len(), "loaded materialised pointsTo edges");
        edges.extend(cached);
    }

    for edge in edges {
        if graph.node(edge.from)?.is_none() || graph.node(edge.to)?.is_none() {
            warn!(from = %edge.from, to = %edge.to, relation = %edge.relation, "dropping dangling edge");
            continue;
        }
        graph.insert_edge(edge);
    }
    Ok(graph)
}

fn format_edge(edge: &Edge) -> String {
    format!(
        "{}{d}{}{d}{}{d}{}{d}{}",
        edge.from,
        edge.to,
        edge.relation,
        edge.relation_type,
        edge.arguments,
        d = DELIMITER
    )
}

/// Appends `edges` to the `pointsTo` side file, writing the header on first use.
pub fn append_points_to(dir: &Path, edges: &[Edge]) -> Result<PathBuf, GraphError> {
    let path = dir.join(POINTS_TO_FILENAME);
    let io_err = |source| GraphError::Io {
        path: path.clone(),
        source,
    };
    let fresh = !path.exists();
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(io_err)?;
    if fresh {
        writeln!(file, "{RELS_HEADER}").map_err(io_err)?;
    }
    for edge in edges {
        writeln!(file, "{}", format_edge(edge)).map_err(io_err)?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_fixture(dir: &Path) {
        fs::write(
            dir.join(NODES_FILENAME),
            format!(
                "{NODES_HEADER}\n\
                 1¿Program¿¿¿¿line:1¿¿¿false¿AST¿\n\
                 2¿Identifier¿¿fetch¿¿line:2¿¿¿false¿AST¿\n\
                 3¿Literal¿¿¿¿line:2¿/api¿\"'/api'\"¿false¿AST¿\n"
            ),
        )
        .unwrap();
        fs::write(
            dir.join(RELS_FILENAME),
            format!(
                "{RELS_HEADER}\n\
                 1¿2¿AST_parentOf¿callee¿\n\
                 1¿3¿AST_parentOf¿arguments¿{{\"arg\":0}}\n\
                 1¿42¿AST_parentOf¿body¿\n"
            ),
        )
        .unwrap();
    }

    #[test]
    fn loads_nodes_and_edges_by_header_name() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());

        let graph = load_dir(dir.path()).unwrap();
        assert_eq!(graph.node_count(), 3);
        let fetch = graph.get_node(NodeId(2)).unwrap();
        assert_eq!(fetch.ty, NodeType::Identifier);
        assert_eq!(fetch.code, "fetch");
        assert_eq!(fetch.location, "line:2");
        let literal = graph.get_node(NodeId(3)).unwrap();
        assert_eq!(literal.raw, "'/api'");
    }

    #[test]
    fn dangling_edges_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());

        let graph = load_dir(dir.path()).unwrap();
        assert_eq!(graph.edge_count(), 2);
        let args = graph.outgoing(NodeId(1), Some(&Relation::Ast)).unwrap();
        assert_eq!(args[1].arg_index(), Some(0));
    }

    #[test]
    fn missing_optional_columns_default() {
        let content = "Id:ID¿Type\n9¿MemberExpression\n";
        let nodes = parse_nodes(Path::new("nodes.csv"), content).unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(!nodes[0].computed);
        assert_eq!(nodes[0].label, "AST");
    }

    #[test]
    fn malformed_id_is_reported_with_line() {
        let content = format!("{NODES_HEADER}\nabc¿Identifier¿¿x¿¿¿¿¿¿¿\n");
        let err = parse_nodes(Path::new("nodes.csv"), &content).unwrap_err();
        assert!(matches!(err, GraphError::MalformedRow { line: 2, .. }));
    }

    #[test]
    fn points_to_side_file_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let edge = Edge::new(NodeId(2), NodeId(1), Relation::PointsTo)
            .with_relation_type("top")
            .with_arguments("pointsTo=window");

        append_points_to(dir.path(), std::slice::from_ref(&edge)).unwrap();
        let graph = load_dir(dir.path()).unwrap();

        let cached = graph.outgoing(NodeId(2), Some(&Relation::PointsTo)).unwrap();
        assert_eq!(cached, vec![edge]);
    }
}
