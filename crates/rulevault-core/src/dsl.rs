//! Rule-chain DSL document shape and structural validation.
//!
//! Only the fields the storage layer and the validator need are typed;
//! everything else is carried through `extra` so a parse/serialize cycle
//! does not drop engine-specific keys.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Node types accepted without a `namespace/` prefix.
const BUILTIN_NODE_TYPES: &[&str] = &[
    "filter",
    "transform",
    "action",
    "flow",
    "external",
    "start",
    "jsFilter",
    "jsTransform",
    "restApiCall",
    "mqttClient",
    "dbClient",
    "log",
    "delay",
    "groupAction",
    "groupFilter",
    "switch",
    "msgTypeSwitch",
];

const START_NODE_TYPE: &str = "start";

#[derive(Debug, Error)]
pub enum DslError {
    #[error("invalid chain document: {0}")]
    Chain(String),

    #[error("invalid {kind} fragment: {reason}")]
    Fragment { kind: &'static str, reason: String },
}

/// A complete rule-chain document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleChain {
    pub rule_chain: RuleChainInfo,
    #[serde(default)]
    pub metadata: RuleMetadata,
}

/// The `ruleChain` header: identity plus the flags denormalized into the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RuleChainInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub root: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RuleMetadata {
    #[serde(default)]
    pub nodes: Vec<RuleNode>,
    #[serde(default)]
    pub connections: Vec<NodeConnection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<EndpointDsl>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A processing node. Also the shape of a shared `node` fragment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RuleNode {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub configuration: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An input endpoint. Also the shape of a shared `endpoint` fragment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDsl {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub endpoint_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub configuration: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routers: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeConnection {
    pub from_id: String,
    pub to_id: String,
    #[serde(rename = "type", default)]
    pub relation: String,
}

impl RuleChain {
    /// Parse a raw chain document.
    pub fn parse(content: &[u8]) -> Result<Self, DslError> {
        serde_json::from_slice(content).map_err(|e| DslError::Chain(e.to_string()))
    }

    pub fn id(&self) -> &str {
        &self.rule_chain.id
    }

    pub fn name(&self) -> &str {
        &self.rule_chain.name
    }

    pub fn root(&self) -> bool {
        self.rule_chain.root
    }

    pub fn disabled(&self) -> bool {
        self.rule_chain.disabled
    }
}

impl RuleNode {
    pub fn parse(content: &[u8]) -> Result<Self, DslError> {
        serde_json::from_slice(content).map_err(|e| DslError::Fragment {
            kind: "node",
            reason: e.to_string(),
        })
    }
}

impl EndpointDsl {
    pub fn parse(content: &[u8]) -> Result<Self, DslError> {
        serde_json::from_slice(content).map_err(|e| DslError::Fragment {
            kind: "endpoint",
            reason: e.to_string(),
        })
    }
}

// ── Validation ────────────────────────────────────────────────────

/// Outcome of a structural check over a chain document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DslValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub node_count: usize,
}

impl DslValidation {
    fn error(&mut self, message: String) {
        self.is_valid = false;
        self.errors.push(message);
    }
}

/// Parse and validate raw content. A parse failure is reported as an
/// invalid result rather than an `Err`.
pub fn validate_content(content: &[u8]) -> DslValidation {
    match RuleChain::parse(content) {
        Ok(chain) => validate(&chain),
        Err(e) => DslValidation {
            is_valid: false,
            errors: vec![e.to_string()],
            ..DslValidation::default()
        },
    }
}

/// Check chain identity, node identity and typing, and connection references.
pub fn validate(chain: &RuleChain) -> DslValidation {
    let mut result = DslValidation {
        is_valid: true,
        node_count: chain.metadata.nodes.len(),
        ..DslValidation::default()
    };

    if chain.rule_chain.id.is_empty() {
        result.error("rule chain id must not be empty".to_string());
    }
    if chain.rule_chain.name.is_empty() {
        result.warnings.push("rule chain name is empty".to_string());
    }

    let mut node_ids: HashSet<&str> = HashSet::new();
    for (index, node) in chain.metadata.nodes.iter().enumerate() {
        if node.id.is_empty() {
            result.error(format!("node[{index}] id must not be empty"));
            continue;
        }
        if !node_ids.insert(node.id.as_str()) {
            result.error(format!("duplicate node id: {}", node.id));
        }
        if node.node_type.is_empty() {
            result.error(format!("node[{}] type must not be empty", node.id));
        } else if !node.node_type.contains('/')
            && !BUILTIN_NODE_TYPES.contains(&node.node_type.as_str())
        {
            result.warnings.push(format!(
                "unknown node type: {} (node: {})",
                node.node_type, node.id
            ));
        }
        if node.name.is_empty() {
            result.warnings.push(format!("node[{}] name is empty", node.id));
        }
    }

    let start_nodes = chain
        .metadata
        .nodes
        .iter()
        .filter(|n| n.node_type == START_NODE_TYPE)
        .count();
    match start_nodes {
        0 => result.warnings.push("no start node found".to_string()),
        1 => {}
        _ => result.warnings.push("multiple start nodes found".to_string()),
    }

    for conn in &chain.metadata.connections {
        if !node_ids.contains(conn.from_id.as_str()) {
            result.error(format!("connection references unknown source node: {}", conn.from_id));
        }
        if !node_ids.contains(conn.to_id.as_str()) {
            result.error(format!("connection references unknown target node: {}", conn.to_id));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN: &str = r#"{
        "ruleChain": {"id": "c1", "name": "orders", "root": true, "additionalInfo": {"x": 1}},
        "metadata": {
            "firstNodeIndex": 0,
            "nodes": [
                {"id": "s1", "type": "start", "name": "begin"},
                {"id": "n1", "type": "jsFilter", "name": "filter", "configuration": {"jsScript": "return true"}}
            ],
            "connections": [{"fromId": "s1", "toId": "n1", "type": "Success"}]
        }
    }"#;

    #[test]
    fn test_parse_denormalized_fields() {
        let chain = RuleChain::parse(CHAIN.as_bytes()).unwrap();
        assert_eq!(chain.id(), "c1");
        assert_eq!(chain.name(), "orders");
        assert!(chain.root());
        assert!(!chain.disabled());
        assert_eq!(chain.metadata.nodes.len(), 2);
    }

    #[test]
    fn test_unknown_fields_survive_reserialize() {
        let chain = RuleChain::parse(CHAIN.as_bytes()).unwrap();
        let value = serde_json::to_value(&chain).unwrap();
        assert_eq!(value["ruleChain"]["additionalInfo"]["x"], 1);
        assert_eq!(value["metadata"]["firstNodeIndex"], 0);
    }

    #[test]
    fn test_parse_rejects_missing_header() {
        assert!(RuleChain::parse(br#"{"metadata": {}}"#).is_err());
        assert!(RuleChain::parse(b"not json").is_err());
        assert!(RuleChain::parse(br#"{"ruleChain": "nope"}"#).is_err());
    }

    #[test]
    fn test_validate_clean_chain() {
        let result = validate_content(CHAIN.as_bytes());
        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
        assert_eq!(result.node_count, 2);
    }

    #[test]
    fn test_validate_reports_structural_errors() {
        let doc = r#"{
            "ruleChain": {"id": ""},
            "metadata": {
                "nodes": [
                    {"id": "a", "type": "log", "name": "a"},
                    {"id": "a", "type": "", "name": "dup"},
                    {"id": "", "type": "log"}
                ],
                "connections": [{"fromId": "a", "toId": "ghost"}]
            }
        }"#;
        let result = validate_content(doc.as_bytes());
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("rule chain id")));
        assert!(result.errors.iter().any(|e| e.contains("duplicate node id: a")));
        assert!(result.errors.iter().any(|e| e.contains("type must not be empty")));
        assert!(result.errors.iter().any(|e| e.contains("node[2] id")));
        assert!(result.errors.iter().any(|e| e.contains("ghost")));
        assert!(result.warnings.iter().any(|w| w.contains("no start node")));
    }

    #[test]
    fn test_validate_namespaced_types_are_accepted() {
        let doc = r#"{
            "ruleChain": {"id": "c", "name": "n"},
            "metadata": {"nodes": [
                {"id": "s", "type": "start", "name": "s"},
                {"id": "x", "type": "x/custom", "name": "x"},
                {"id": "y", "type": "mystery", "name": "y"}
            ]}
        }"#;
        let result = validate_content(doc.as_bytes());
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("mystery"));
    }

    #[test]
    fn test_validate_content_parse_failure_is_invalid() {
        let result = validate_content(b"{");
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_fragment_parse() {
        let node = RuleNode::parse(br#"{"id": "db", "type": "dbClient", "name": "pg"}"#).unwrap();
        assert_eq!(node.node_type, "dbClient");
        let ep = EndpointDsl::parse(br#"{"id": "http", "type": "endpoint/http", "routers": [{}]}"#)
            .unwrap();
        assert_eq!(ep.routers.len(), 1);
        assert!(matches!(
            EndpointDsl::parse(b"[]"),
            Err(DslError::Fragment { kind: "endpoint", .. })
        ));
    }
}
