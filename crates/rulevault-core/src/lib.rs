//! rulevault-core — shared types for the rulevault storage layer.
//!
//! Holds the parsed rule-chain DSL document, run snapshots, share-node
//! fragment kinds, the backend-agnostic pagination engine, and the TOML
//! configuration consumed by the daemon.

pub mod config;
pub mod dsl;
pub mod page;
pub mod types;

pub use config::{Backend, BackendSelection, SqliteConfig, VaultConfig};
pub use dsl::{
    DslError, DslValidation, EndpointDsl, NodeConnection, RuleChain, RuleChainInfo, RuleMetadata,
    RuleNode,
};
pub use page::{ChainFilter, Page, Pagination};
pub use types::*;
