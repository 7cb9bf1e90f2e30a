//! rulevault-store — persistence for rule chains, run logs and share nodes.
//!
//! Every entity has a file backend and a SQLite backend behind one trait,
//! and [`StorageGateway`] picks one per entity from the configuration.
//!
//! # Architecture
//!
//! - [`FileChainStore`] keeps one JSON document per chain under
//!   `<data_dir>/workflows/<owner>/rules/` and an in-memory index over it,
//!   guarded by a read-write lock. The files are authoritative; the index
//!   is rebuilt by a full scan on open and on demand.
//! - [`SqlChainStore`] maps chains onto `regulations` /
//!   `component_regulations` with a native upsert and soft delete.
//! - [`RunLogArchive`] stores one immutable snapshot per completed run.
//! - [`ShareNodeRegistry`] holds node/endpoint fragments and loads them into
//!   a [`NodePool`] all-or-nothing.
//!
//! The [`SqlClient`] is `Clone` (an `Arc` around one connection) and is
//! constructed once by the caller, then passed to each relational store.

pub mod chain;
pub mod error;
pub mod file_index;
pub mod files;
pub mod gateway;
pub mod relational;
pub mod run_log;
pub mod schema;
pub mod share_node;
pub mod sql;
pub mod types;
pub mod use_rules;

pub use chain::ChainStore;
pub use error::{StoreError, StoreResult};
pub use file_index::FileChainStore;
pub use gateway::StorageGateway;
pub use relational::SqlChainStore;
pub use run_log::{FileRunLogs, RunLogArchive, RunLogStore, SqlRunLogs};
pub use share_node::{
    FileShareNodes, MemoryNodePool, NodePool, ShareFragment, ShareNodeRegistry, ShareNodeStore,
    SqlShareNodes,
};
pub use sql::SqlClient;
pub use types::*;
pub use use_rules::UseRuleStore;
