//! Shared types used across rulevault crates.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dsl::RuleChain;

/// Milliseconds since the Unix epoch.
pub type TimestampMs = i64;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as TimestampMs)
        .unwrap_or_default()
}

// ── Run snapshots ─────────────────────────────────────────────────

/// Immutable record of one execution of a chain, as handed over by the
/// execution engine when the run completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub id: String,
    #[serde(default)]
    pub start_ts: TimestampMs,
    #[serde(default)]
    pub end_ts: TimestampMs,
    /// Per-node execution logs, opaque to storage.
    #[serde(default)]
    pub logs: Value,
    #[serde(default)]
    pub additional_info: Map<String, Value>,
    /// The chain definition as it was when the run started.
    #[serde(default)]
    pub rule_chain: Option<RuleChain>,
    #[serde(default)]
    pub metadata: Value,
}

impl RunSnapshot {
    /// Chain name recorded in the embedded definition, if any.
    pub fn chain_name(&self) -> &str {
        self.rule_chain.as_ref().map(RuleChain::name).unwrap_or_default()
    }
}

/// What the execution engine exposes about the run being archived.
pub trait RunContext {
    fn chain_id(&self) -> &str;
}

/// Plain run context for callers that only know the chain id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainRun {
    pub chain_id: String,
}

impl ChainRun {
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
        }
    }
}

impl RunContext for ChainRun {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }
}

// ── Share nodes ───────────────────────────────────────────────────

/// Sub-namespace of a reusable configuration fragment. Ids are not shared
/// between kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareNodeKind {
    Node,
    Endpoint,
}

impl ShareNodeKind {
    pub const ALL: [ShareNodeKind; 2] = [ShareNodeKind::Node, ShareNodeKind::Endpoint];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShareNodeKind::Node => "node",
            ShareNodeKind::Endpoint => "endpoint",
        }
    }
}

impl fmt::Display for ShareNodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShareNodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node" => Ok(ShareNodeKind::Node),
            "endpoint" => Ok(ShareNodeKind::Endpoint),
            other => Err(format!("unknown share node kind: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_camel_case_and_defaults() {
        let snap: RunSnapshot = serde_json::from_str(
            r#"{"id": "r1", "startTs": 5, "ruleChain": {"ruleChain": {"id": "c", "name": "demo"}}}"#,
        )
        .unwrap();
        assert_eq!(snap.start_ts, 5);
        assert_eq!(snap.end_ts, 0);
        assert_eq!(snap.chain_name(), "demo");
        assert!(snap.logs.is_null());
    }

    #[test]
    fn test_share_node_kind_round_trip_str() {
        for kind in ShareNodeKind::ALL {
            assert_eq!(kind.as_str().parse::<ShareNodeKind>().unwrap(), kind);
        }
        assert!("pool".parse::<ShareNodeKind>().is_err());
    }

    #[test]
    fn test_now_ms_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }
}
