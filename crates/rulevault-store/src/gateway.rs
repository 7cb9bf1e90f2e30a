//! The storage gateway: one CRUD + list surface over whichever backend each
//! entity was configured with.
//!
//! Backends are chosen once, in [`StorageGateway::from_config`], and never
//! mixed for an entity afterwards. The SQL client is passed in rather than
//! opened here so callers (and tests) decide its lifetime.

use std::sync::Arc;

use rulevault_core::{Backend, ChainFilter, Page, Pagination, RuleChain, VaultConfig};
use tracing::{debug, info};

use crate::chain::ChainStore;
use crate::error::{StoreError, StoreResult};
use crate::file_index::FileChainStore;
use crate::relational::SqlChainStore;
use crate::run_log::{FileRunLogs, RunLogArchive, RunLogStore, SqlRunLogs};
use crate::share_node::{FileShareNodes, ShareNodeRegistry, ShareNodeStore, SqlShareNodes};
use crate::sql::SqlClient;
use crate::types::{ChainNamespace, RebuildReport, RuleChainRecord};
use crate::use_rules::UseRuleStore;

/// A chain store plus, for the file backend, a handle on its index.
#[derive(Clone)]
struct ChainBackend {
    store: Arc<dyn ChainStore>,
    index: Option<Arc<FileChainStore>>,
}

impl ChainBackend {
    fn build(
        config: &VaultConfig,
        backend: Backend,
        ns: ChainNamespace,
        sql: Option<&SqlClient>,
    ) -> StoreResult<Self> {
        match backend {
            Backend::File => {
                let index = Arc::new(FileChainStore::open(&config.data_dir, ns)?);
                Ok(Self {
                    store: index.clone(),
                    index: Some(index),
                })
            }
            Backend::Sqlite => Ok(Self {
                store: Arc::new(SqlChainStore::new(require_sql(sql)?.clone(), ns)),
                index: None,
            }),
        }
    }

    fn rebuild_index(&self, owner: &str) -> StoreResult<RebuildReport> {
        match &self.index {
            Some(index) => index.rebuild(owner),
            None => Err(StoreError::Config(format!(
                "{} are not stored in the file backend",
                self.store.namespace().dir_name()
            ))),
        }
    }
}

fn require_sql(sql: Option<&SqlClient>) -> StoreResult<&SqlClient> {
    sql.ok_or_else(|| {
        StoreError::Config("a sqlite backend is selected but no sql client was provided".into())
    })
}

/// Facade over the chain, component, run-log, share-node and use-rule stores.
#[derive(Clone)]
pub struct StorageGateway {
    chains: ChainBackend,
    components: ChainBackend,
    run_logs: RunLogArchive,
    share_nodes: ShareNodeRegistry,
    use_rules: Option<UseRuleStore>,
}

impl StorageGateway {
    /// Build every store according to `config.backends`.
    ///
    /// Fails with `Config` when any entity is on sqlite and `sql` is `None`.
    /// Component-use rules are only available when a client is given.
    pub fn from_config(config: &VaultConfig, sql: Option<SqlClient>) -> StoreResult<Self> {
        let sql = sql.as_ref();
        let backends = &config.backends;

        let chains = ChainBackend::build(config, backends.chains, ChainNamespace::Rules, sql)?;
        let components =
            ChainBackend::build(config, backends.components, ChainNamespace::Components, sql)?;

        let run_logs: Arc<dyn RunLogStore> = match backends.run_logs {
            Backend::File => Arc::new(FileRunLogs::new(&config.data_dir)),
            Backend::Sqlite => Arc::new(SqlRunLogs::new(require_sql(sql)?.clone())),
        };
        let share_nodes: Arc<dyn ShareNodeStore> = match backends.share_nodes {
            Backend::File => Arc::new(FileShareNodes::new(&config.data_dir)),
            Backend::Sqlite => Arc::new(SqlShareNodes::new(require_sql(sql)?.clone())),
        };

        info!(
            chains = ?backends.chains,
            components = ?backends.components,
            run_logs = ?backends.run_logs,
            share_nodes = ?backends.share_nodes,
            data_dir = %config.data_dir.display(),
            "storage gateway ready"
        );

        Ok(Self {
            chains,
            components,
            run_logs: RunLogArchive::new(run_logs),
            share_nodes: ShareNodeRegistry::new(share_nodes),
            use_rules: sql.cloned().map(UseRuleStore::new),
        })
    }

    // ── Rule chains ───────────────────────────────────────────────

    pub fn list(
        &self,
        owner: &str,
        filter: &ChainFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<RuleChainRecord>> {
        self.chains.store.list(owner, filter, pagination)
    }

    pub fn get(&self, owner: &str, id: &str) -> StoreResult<RuleChainRecord> {
        self.chains.store.get(owner, id)
    }

    /// Upsert; invalid content is rejected before anything is written.
    pub fn save(&self, owner: &str, id: &str, content: &str) -> StoreResult<()> {
        self.chains.store.save(owner, id, content)
    }

    /// Delete a chain and every run log recorded for it.
    pub fn delete(&self, owner: &str, id: &str) -> StoreResult<()> {
        self.chains.store.delete(owner, id)?;
        let removed = self.run_logs.delete_by_chain_id(owner, id)?;
        debug!(%owner, %id, removed, "chain deleted with its run logs");
        Ok(())
    }

    pub fn get_as_rule_chain(&self, owner: &str, id: &str) -> StoreResult<RuleChain> {
        self.chains.store.get_as_rule_chain(owner, id)
    }

    pub fn latest(&self, owner: &str) -> StoreResult<RuleChainRecord> {
        self.chains.store.latest(owner)
    }

    pub fn load_enabled(&self, owner: &str) -> StoreResult<Vec<RuleChain>> {
        self.chains.store.load_enabled(owner)
    }

    /// Rescan one owner's chain directory. File backend only.
    pub fn rebuild_index(&self, owner: &str) -> StoreResult<RebuildReport> {
        self.chains.rebuild_index(owner)
    }

    // ── Components ────────────────────────────────────────────────

    pub fn list_components(
        &self,
        owner: &str,
        filter: &ChainFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<RuleChainRecord>> {
        self.components.store.list(owner, filter, pagination)
    }

    pub fn get_component(&self, owner: &str, id: &str) -> StoreResult<RuleChainRecord> {
        self.components.store.get(owner, id)
    }

    pub fn save_component(&self, owner: &str, id: &str, content: &str) -> StoreResult<()> {
        self.components.store.save(owner, id, content)
    }

    /// Components are purged, never soft-deleted.
    pub fn delete_component(&self, owner: &str, id: &str) -> StoreResult<()> {
        self.components.store.purge(owner, id)
    }

    pub fn rebuild_component_index(&self, owner: &str) -> StoreResult<RebuildReport> {
        self.components.rebuild_index(owner)
    }

    // ── Other entities ────────────────────────────────────────────

    pub fn run_logs(&self) -> &RunLogArchive {
        &self.run_logs
    }

    pub fn share_nodes(&self) -> &ShareNodeRegistry {
        &self.share_nodes
    }

    pub fn use_rules(&self) -> StoreResult<&UseRuleStore> {
        self.use_rules
            .as_ref()
            .ok_or_else(|| StoreError::Config("component-use rules need a sql client".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulevault_core::{BackendSelection, ChainRun, RunSnapshot};

    use crate::types::RunLogQuery;

    const DOC: &str = r#"{"ruleChain": {"id": "c1", "name": "orders"}}"#;

    fn config(dir: &std::path::Path, backends: BackendSelection) -> VaultConfig {
        VaultConfig {
            data_dir: dir.to_path_buf(),
            backends,
            ..VaultConfig::default()
        }
    }

    #[test]
    fn sqlite_selection_without_client_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = StorageGateway::from_config(&config(dir.path(), BackendSelection::default()), None)
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn all_file_needs_no_client() {
        let dir = tempfile::tempdir().unwrap();
        let gateway =
            StorageGateway::from_config(&config(dir.path(), BackendSelection::all_file()), None)
                .unwrap();
        gateway.save("alice", "c1", DOC).unwrap();
        assert_eq!(gateway.rebuild_index("alice").unwrap().entries, 1);
        assert!(matches!(gateway.use_rules().err().unwrap(), StoreError::Config(_)));
    }

    #[test]
    fn rebuild_index_is_file_only() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = StorageGateway::from_config(
            &config(dir.path(), BackendSelection::all_sqlite()),
            Some(SqlClient::open_in_memory().unwrap()),
        )
        .unwrap();
        assert!(matches!(gateway.rebuild_index("alice").unwrap_err(), StoreError::Config(_)));
    }

    #[test]
    fn component_delete_is_a_purge() {
        let dir = tempfile::tempdir().unwrap();
        let client = SqlClient::open_in_memory().unwrap();
        let gateway = StorageGateway::from_config(
            &config(dir.path(), BackendSelection::all_sqlite()),
            Some(client.clone()),
        )
        .unwrap();
        gateway.save_component("alice", "c1", DOC).unwrap();
        gateway.delete_component("alice", "c1").unwrap();

        let conn = client.lock().unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM component_regulations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn chain_delete_cascades_to_run_logs() {
        let dir = tempfile::tempdir().unwrap();
        let gateway =
            StorageGateway::from_config(&config(dir.path(), BackendSelection::all_file()), None)
                .unwrap();
        gateway.save("alice", "c1", DOC).unwrap();
        let snapshot = RunSnapshot {
            id: "r1".into(),
            ..RunSnapshot::default()
        };
        gateway.run_logs().save("alice", &ChainRun::new("c1"), &snapshot).unwrap();

        gateway.delete("alice", "c1").unwrap();
        let page = gateway.run_logs().list("alice", &RunLogQuery::for_chain("c1")).unwrap();
        assert_eq!(page.total, 0);
    }
}
