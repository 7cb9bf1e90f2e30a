//! Record types returned by the storage backends.
//!
//! Content is kept as the caller's raw JSON text; the flags next to it are
//! denormalized from that text at save time so listings can filter without
//! reparsing every document.

use rulevault_core::{Pagination, RuleChain, ShareNodeKind, TimestampMs};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::schema;

/// Chain identifier, unique within one owner's namespace.
pub type ChainId = String;

// ── Chains ────────────────────────────────────────────────────────

/// A persisted rule chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleChainRecord {
    pub id: ChainId,
    pub owner: String,
    pub name: String,
    pub root: bool,
    pub disabled: bool,
    /// The authoritative DSL document, exactly as saved.
    pub content: String,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

impl RuleChainRecord {
    /// Parse the stored content into the DSL document.
    pub fn document(&self) -> StoreResult<RuleChain> {
        Ok(RuleChain::parse(self.content.as_bytes())?)
    }
}

/// Which chain namespace a store serves. Components are a parallel
/// namespace with the same shape as rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainNamespace {
    Rules,
    Components,
}

impl ChainNamespace {
    /// Per-user directory name for the file backend.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ChainNamespace::Rules => "rules",
            ChainNamespace::Components => "components",
        }
    }

    /// Table name for the relational backend.
    pub fn table(&self) -> &'static str {
        match self {
            ChainNamespace::Rules => schema::REGULATIONS,
            ChainNamespace::Components => schema::COMPONENT_REGULATIONS,
        }
    }
}

/// In-memory index entry for one chain file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChainMeta {
    pub name: String,
    pub id: ChainId,
    pub root: bool,
    pub disabled: bool,
    pub update_time: TimestampMs,
}

/// Outcome of rebuilding one owner's index from disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    /// Entries in the index after the rebuild.
    pub entries: usize,
    /// Files that had no index entry before.
    pub added: usize,
    /// Index entries whose file no longer exists.
    pub removed: usize,
}

// ── Run logs ──────────────────────────────────────────────────────

/// Run-log listing request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunLogQuery {
    /// Restrict to one chain; `None` lists across all chains.
    pub chain_id: Option<ChainId>,
    /// Inclusive lower bound on `created_at` (relational backend only).
    pub start_ms: Option<TimestampMs>,
    /// Inclusive upper bound on `created_at` (relational backend only).
    pub end_ms: Option<TimestampMs>,
    pub pagination: Pagination,
}

impl RunLogQuery {
    pub fn for_chain(chain_id: impl Into<ChainId>) -> Self {
        Self {
            chain_id: Some(chain_id.into()),
            ..Self::default()
        }
    }

    pub fn page(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn between(mut self, start_ms: Option<TimestampMs>, end_ms: Option<TimestampMs>) -> Self {
        self.start_ms = start_ms;
        self.end_ms = end_ms;
        self
    }
}

// ── Component-use rules ───────────────────────────────────────────

/// Usage guidance attached to a component type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentUseRule {
    pub id: i64,
    pub component_name: String,
    pub component_type: String,
    pub disabled: bool,
    pub use_desc: String,
    pub use_rule_desc: String,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

/// Fields for a new component-use rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewComponentUseRule {
    pub component_name: String,
    #[serde(default)]
    pub component_type: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub use_desc: String,
    #[serde(default)]
    pub use_rule_desc: String,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComponentUseRulePatch {
    pub component_name: Option<String>,
    pub component_type: Option<String>,
    pub disabled: Option<bool>,
    pub use_desc: Option<String>,
    pub use_rule_desc: Option<String>,
}

impl ComponentUseRulePatch {
    pub fn is_empty(&self) -> bool {
        self.component_name.is_none()
            && self.component_type.is_none()
            && self.disabled.is_none()
            && self.use_desc.is_none()
            && self.use_rule_desc.is_none()
    }
}

/// Component-use rule listing request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UseRuleQuery {
    pub component_type: Option<String>,
    pub disabled: Option<bool>,
    /// Substring of `component_name`.
    pub keywords: Option<String>,
    pub pagination: Pagination,
}

// ── Share nodes ───────────────────────────────────────────────────

/// A persisted share-node fragment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShareNodeRecord {
    pub id: String,
    pub kind: ShareNodeKind,
    pub name: String,
    /// The fragment JSON, exactly as saved.
    pub content: String,
}
