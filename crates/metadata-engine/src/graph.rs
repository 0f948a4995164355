//! Workflow graph normalization
//!
//! The host editor hands over a raw JSON document mapping node-id strings to
//! loosely shaped node objects. [`WorkflowGraph::parse`] normalizes that
//! document into a lookup table of node id → (type tag, input map) that the
//! rest of the pipeline works against.
//!
//! Parsing is tolerant by contract: a malformed node is kept under the
//! `Unknown` type tag with whatever inputs could be salvaged, and never fails
//! the whole parse. Graphs may contain cycles.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{MetadataEngineError, Result};

/// Unique identifier for a node
pub type NodeId = String;

/// Type tag assigned to nodes that could not be parsed
pub const UNKNOWN_TYPE_TAG: &str = "Unknown";

/// Type tags treated as save points when no sink is named explicitly
const SINK_TYPE_TAGS: &[&str] = &["SaveImage", "SaveImageExtended", "ImageSave"];

/// A backward edge: this input is wired to `output_slot` of node `node_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRef {
    pub node_id: NodeId,
    pub output_slot: u32,
}

/// One input value on a node: either a literal widget value or a connection
/// to another node's output.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeInput {
    Literal(Value),
    Connection(ConnectionRef),
}

impl NodeInput {
    /// The connection, if this input is wired.
    pub fn as_connection(&self) -> Option<&ConnectionRef> {
        match self {
            Self::Connection(conn) => Some(conn),
            Self::Literal(_) => None,
        }
    }

    /// The literal value, if this input is a widget value.
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Self::Literal(value) => Some(value),
            Self::Connection(_) => None,
        }
    }
}

/// A normalized node: type tag plus input map.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowNode {
    pub type_tag: String,
    pub inputs: HashMap<String, NodeInput>,
}

impl WorkflowNode {
    /// Literal value of the named input, if present and not wired.
    pub fn input_literal(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name).and_then(NodeInput::as_literal)
    }

    /// Connection of the named input, if present and wired.
    pub fn input_connection(&self, name: &str) -> Option<&ConnectionRef> {
        self.inputs.get(name).and_then(NodeInput::as_connection)
    }

    /// Whether the node exposes the named input at all.
    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.contains_key(name)
    }

    /// All wired inputs, in unspecified order.
    pub fn connections(&self) -> impl Iterator<Item = &ConnectionRef> {
        self.inputs.values().filter_map(NodeInput::as_connection)
    }
}

/// Lookup table of node id → normalized node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowGraph {
    nodes: HashMap<NodeId, WorkflowNode>,
}

impl WorkflowGraph {
    /// Normalize a raw workflow document.
    ///
    /// The document must be a JSON object keyed by node id; anything else is
    /// the only hard failure. Individual nodes that are not objects, or that
    /// lack a usable type tag, are kept as [`UNKNOWN_TYPE_TAG`] so one bad
    /// node never loses the rest of the graph.
    pub fn parse(raw: &Value) -> Result<Self> {
        let doc = raw
            .as_object()
            .ok_or(MetadataEngineError::GraphNotAnObject)?;

        let mut nodes = HashMap::with_capacity(doc.len());
        for (id, raw_node) in doc {
            let node = match parse_node(raw_node) {
                Some(node) => node,
                None => {
                    log::warn!("node '{}' is malformed, keeping as {}", id, UNKNOWN_TYPE_TAG);
                    WorkflowNode {
                        type_tag: UNKNOWN_TYPE_TAG.to_string(),
                        inputs: HashMap::new(),
                    }
                }
            };
            nodes.insert(id.clone(), node);
        }

        Ok(Self { nodes })
    }

    /// Look up a node by id.
    pub fn get(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(id)
    }

    /// Whether the graph contains the given node id.
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over all (id, node) pairs, in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &WorkflowNode)> {
        self.nodes.iter()
    }

    /// Node ids whose type tag marks them as save points, sorted for
    /// deterministic trace order.
    pub fn sink_candidates(&self) -> Vec<&NodeId> {
        let mut sinks: Vec<&NodeId> = self
            .nodes
            .iter()
            .filter(|(_, node)| SINK_TYPE_TAGS.contains(&node.type_tag.as_str()))
            .map(|(id, _)| id)
            .collect();
        sinks.sort();
        sinks
    }

    /// Serialize the normalized graph back to the wire shape.
    ///
    /// This snapshot lands in `ai_info.workflow` at the Full stage so the
    /// host editor can reload the exact graph from a saved image.
    pub fn snapshot(&self) -> Value {
        let mut doc = serde_json::Map::with_capacity(self.nodes.len());
        for (id, node) in &self.nodes {
            let mut inputs = serde_json::Map::with_capacity(node.inputs.len());
            for (name, input) in &node.inputs {
                let value = match input {
                    NodeInput::Literal(value) => value.clone(),
                    NodeInput::Connection(conn) => {
                        Value::Array(vec![conn.node_id.clone().into(), conn.output_slot.into()])
                    }
                };
                inputs.insert(name.clone(), value);
            }
            doc.insert(
                id.clone(),
                serde_json::json!({
                    "type_tag": node.type_tag,
                    "inputs": Value::Object(inputs),
                }),
            );
        }
        Value::Object(doc)
    }
}

/// Parse one raw node object, or `None` when unsalvageable.
fn parse_node(raw: &Value) -> Option<WorkflowNode> {
    let obj = raw.as_object()?;

    // The host wire format uses "type_tag"; older workflow exports carry
    // "class_type". Accept both.
    let type_tag = obj
        .get("type_tag")
        .or_else(|| obj.get("class_type"))
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_TYPE_TAG)
        .to_string();

    let mut inputs = HashMap::new();
    if let Some(raw_inputs) = obj.get("inputs").and_then(Value::as_object) {
        for (name, value) in raw_inputs {
            inputs.insert(name.clone(), parse_input(value));
        }
    }

    Some(WorkflowNode { type_tag, inputs })
}

/// A two-element `[node_id, output_slot]` array is a connection; anything
/// else is a literal widget value.
fn parse_input(value: &Value) -> NodeInput {
    if let Some(pair) = value.as_array() {
        if pair.len() == 2 {
            if let (Some(node_id), Some(slot)) = (pair[0].as_str(), pair[1].as_u64()) {
                return NodeInput::Connection(ConnectionRef {
                    node_id: node_id.to_string(),
                    output_slot: slot as u32,
                });
            }
        }
    }
    NodeInput::Literal(value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_literals_and_connections() {
        let raw = json!({
            "3": {
                "type_tag": "KSampler",
                "inputs": {
                    "steps": 20,
                    "model": ["4", 0]
                }
            }
        });
        let graph = WorkflowGraph::parse(&raw).unwrap();
        let node = graph.get("3").unwrap();
        assert_eq!(node.type_tag, "KSampler");
        assert_eq!(node.input_literal("steps"), Some(&json!(20)));
        let conn = node.input_connection("model").unwrap();
        assert_eq!(conn.node_id, "4");
        assert_eq!(conn.output_slot, 0);
    }

    #[test]
    fn test_malformed_node_kept_as_unknown() {
        let raw = json!({
            "1": {"type_tag": "SaveImage", "inputs": {}},
            "2": "not an object",
            "3": {"inputs": {"x": 1}}
        });
        let graph = WorkflowGraph::parse(&raw).unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.get("2").unwrap().type_tag, UNKNOWN_TYPE_TAG);
        // Salvageable node without a type tag keeps its inputs
        let node3 = graph.get("3").unwrap();
        assert_eq!(node3.type_tag, UNKNOWN_TYPE_TAG);
        assert_eq!(node3.input_literal("x"), Some(&json!(1)));
    }

    #[test]
    fn test_non_object_document_fails() {
        assert!(WorkflowGraph::parse(&json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_short_or_odd_arrays_are_literals() {
        let raw = json!({
            "1": {"type_tag": "T", "inputs": {
                "one": ["only"],
                "three": ["a", 1, 2],
                "swapped": [0, "a"]
            }}
        });
        let graph = WorkflowGraph::parse(&raw).unwrap();
        let node = graph.get("1").unwrap();
        assert!(node.input_literal("one").is_some());
        assert!(node.input_literal("three").is_some());
        assert!(node.input_literal("swapped").is_some());
    }

    #[test]
    fn test_sink_candidates_sorted() {
        let raw = json!({
            "9": {"type_tag": "SaveImage", "inputs": {}},
            "2": {"type_tag": "SaveImage", "inputs": {}},
            "5": {"type_tag": "KSampler", "inputs": {}}
        });
        let graph = WorkflowGraph::parse(&raw).unwrap();
        let sinks = graph.sink_candidates();
        assert_eq!(sinks, vec!["2", "9"]);
    }

    #[test]
    fn test_snapshot_round_trips() {
        let raw = json!({
            "3": {
                "type_tag": "KSampler",
                "inputs": {"steps": 20, "model": ["4", 0]}
            },
            "4": {"type_tag": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "sd15.safetensors"}}
        });
        let graph = WorkflowGraph::parse(&raw).unwrap();
        let reparsed = WorkflowGraph::parse(&graph.snapshot()).unwrap();
        assert_eq!(graph, reparsed);
    }
}
