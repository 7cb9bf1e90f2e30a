//! Relational chain store over `regulations` / `component_regulations`.
//!
//! Listing builds its predicate by AND-ing whichever filters are present and
//! issues the page query and the `COUNT` query separately, so under
//! concurrent writes the total may be stale relative to the page. Saves are
//! a single native upsert on `(user_name, rule_chain_id)`. Deletes are soft
//! (`deleted_at`); `purge` removes the row outright.

use rulevault_core::{ChainFilter, Page, Pagination, RuleChain, now_ms};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, warn};

use crate::chain::{ChainStore, parse_for_save};
use crate::error::{StoreError, StoreResult};
use crate::schema::like_pattern;
use crate::sql::SqlClient;
use crate::types::{ChainNamespace, RuleChainRecord};

const CHAIN_COLUMNS: &str =
    "rule_chain_id, user_name, name, root, disabled, rule_config, created_at, updated_at";

/// Relational chain store for one namespace.
#[derive(Clone)]
pub struct SqlChainStore {
    client: SqlClient,
    ns: ChainNamespace,
}

impl SqlChainStore {
    pub fn new(client: SqlClient, ns: ChainNamespace) -> Self {
        Self { client, ns }
    }

    fn table(&self) -> &'static str {
        self.ns.table()
    }

    fn not_found(&self, owner: &str, id: &str) -> StoreError {
        StoreError::NotFound(format!("{} {owner}/{id}", self.table()))
    }
}

/// Map a row selected with [`CHAIN_COLUMNS`].
fn chain_row(row: &Row<'_>) -> rusqlite::Result<RuleChainRecord> {
    Ok(RuleChainRecord {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        root: row.get(3)?,
        disabled: row.get(4)?,
        content: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// `WHERE` clause and its positional parameters for a chain listing.
fn listing_predicate(owner: &str, filter: &ChainFilter) -> (String, Vec<Value>) {
    let mut clauses = vec!["user_name = ?", "deleted_at IS NULL"];
    let mut values = vec![Value::Text(owner.to_string())];
    if let Some(root) = filter.root {
        clauses.push("root = ?");
        values.push(Value::Integer(root as i64));
    }
    if let Some(disabled) = filter.disabled {
        clauses.push("disabled = ?");
        values.push(Value::Integer(disabled as i64));
    }
    if let Some(keyword) = filter.keyword() {
        clauses.push("name LIKE ? ESCAPE '\\'");
        values.push(Value::Text(like_pattern(keyword)));
    }
    (clauses.join(" AND "), values)
}

/// SQLite treats a negative `LIMIT` as unbounded and a negative `OFFSET` as
/// zero, so both are clamped to `i64::MAX` rather than cast.
pub(crate) fn limit_offset(pagination: Pagination) -> [Value; 2] {
    let limit = pagination
        .limit()
        .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
        .unwrap_or(-1);
    let offset = i64::try_from(pagination.offset()).unwrap_or(i64::MAX);
    [Value::Integer(limit), Value::Integer(offset)]
}

impl ChainStore for SqlChainStore {
    fn namespace(&self) -> ChainNamespace {
        self.ns
    }

    fn list(
        &self,
        owner: &str,
        filter: &ChainFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<RuleChainRecord>> {
        let (predicate, values) = listing_predicate(owner, filter);
        let table = self.table();

        let items = {
            let conn = self.client.lock()?;
            let sql = format!(
                "SELECT {CHAIN_COLUMNS} FROM {table} WHERE {predicate} \
                 ORDER BY updated_at DESC, rule_chain_id ASC LIMIT ? OFFSET ?"
            );
            let mut stmt = conn.prepare(&sql)?;
            let page_params = values.iter().cloned().chain(limit_offset(pagination));
            let rows = stmt.query_map(params_from_iter(page_params), chain_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let total: i64 = {
            let conn = self.client.lock()?;
            let sql = format!("SELECT COUNT(*) FROM {table} WHERE {predicate}");
            conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?
        };

        Ok(Page::new(items, total as usize, pagination))
    }

    fn get(&self, owner: &str, id: &str) -> StoreResult<RuleChainRecord> {
        let conn = self.client.lock()?;
        let sql = format!(
            "SELECT {CHAIN_COLUMNS} FROM {} \
             WHERE user_name = ?1 AND rule_chain_id = ?2 AND deleted_at IS NULL",
            self.table()
        );
        conn.query_row(&sql, params![owner, id], chain_row)
            .optional()?
            .ok_or_else(|| self.not_found(owner, id))
    }

    fn save(&self, owner: &str, id: &str, content: &str) -> StoreResult<()> {
        let doc = parse_for_save(content)?;
        let now = now_ms();
        let conn = self.client.lock()?;
        let sql = format!(
            "INSERT INTO {} (user_name, root, disabled, rule_chain_id, name, rule_config, \
               created_at, updated_at, deleted_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, NULL) \
             ON CONFLICT(user_name, rule_chain_id) DO UPDATE SET \
               root = excluded.root, \
               disabled = excluded.disabled, \
               name = excluded.name, \
               rule_config = excluded.rule_config, \
               updated_at = excluded.updated_at, \
               deleted_at = NULL",
            self.table()
        );
        conn.execute(
            &sql,
            params![owner, doc.root(), doc.disabled(), id, doc.name(), content, now],
        )?;
        debug!(%owner, %id, table = self.table(), "chain upserted");
        Ok(())
    }

    fn delete(&self, owner: &str, id: &str) -> StoreResult<()> {
        let conn = self.client.lock()?;
        let sql = format!(
            "UPDATE {} SET deleted_at = ?3 \
             WHERE user_name = ?1 AND rule_chain_id = ?2 AND deleted_at IS NULL",
            self.table()
        );
        if conn.execute(&sql, params![owner, id, now_ms()])? == 0 {
            return Err(self.not_found(owner, id));
        }
        debug!(%owner, %id, table = self.table(), "chain soft-deleted");
        Ok(())
    }

    fn purge(&self, owner: &str, id: &str) -> StoreResult<()> {
        let conn = self.client.lock()?;
        let sql = format!(
            "DELETE FROM {} WHERE user_name = ?1 AND rule_chain_id = ?2",
            self.table()
        );
        if conn.execute(&sql, params![owner, id])? == 0 {
            return Err(self.not_found(owner, id));
        }
        debug!(%owner, %id, table = self.table(), "chain purged");
        Ok(())
    }

    fn latest(&self, owner: &str) -> StoreResult<RuleChainRecord> {
        let conn = self.client.lock()?;
        let sql = format!(
            "SELECT {CHAIN_COLUMNS} FROM {} WHERE user_name = ?1 AND deleted_at IS NULL \
             ORDER BY updated_at DESC, rule_chain_id ASC LIMIT 1",
            self.table()
        );
        conn.query_row(&sql, params![owner], chain_row)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("no chains for {owner}")))
    }

    fn load_enabled(&self, owner: &str) -> StoreResult<Vec<RuleChain>> {
        let records = {
            let conn = self.client.lock()?;
            let sql = format!(
                "SELECT {CHAIN_COLUMNS} FROM {} \
                 WHERE user_name = ?1 AND disabled = 0 AND deleted_at IS NULL \
                 ORDER BY updated_at DESC, rule_chain_id ASC",
                self.table()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![owner], chain_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        let mut chains = Vec::with_capacity(records.len());
        for record in records {
            match record.document() {
                Ok(chain) => chains.push(chain),
                Err(e) => warn!(%owner, id = %record.id, error = %e, "skipping unparsable chain"),
            }
        }
        Ok(chains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_doc(name: &str, root: bool, disabled: bool) -> String {
        format!(
            r#"{{"ruleChain": {{"id": "x", "name": "{name}", "root": {root}, "disabled": {disabled}}}}}"#
        )
    }

    fn test_store() -> SqlChainStore {
        SqlChainStore::new(SqlClient::open_in_memory().unwrap(), ChainNamespace::Rules)
    }

    fn row_count(store: &SqlChainStore) -> i64 {
        let conn = store.client.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM regulations", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn save_and_get() {
        let store = test_store();
        let doc = chain_doc("orders", true, false);
        store.save("alice", "c1", &doc).unwrap();

        let record = store.get("alice", "c1").unwrap();
        assert_eq!(record.content, doc);
        assert_eq!(record.owner, "alice");
        assert!(record.root);
        assert!(!record.disabled);
    }

    #[test]
    fn upsert_updates_in_place() {
        let store = test_store();
        store.save("alice", "c1", &chain_doc("v1", false, false)).unwrap();
        store.save("alice", "c1", &chain_doc("v1", false, false)).unwrap();
        store.save("alice", "c1", &chain_doc("v2", false, true)).unwrap();

        assert_eq!(row_count(&store), 1);
        let record = store.get("alice", "c1").unwrap();
        assert_eq!(record.name, "v2");
        assert!(record.disabled);
    }

    #[test]
    fn same_id_for_two_owners_is_two_rows() {
        let store = test_store();
        store.save("alice", "c1", &chain_doc("a", false, false)).unwrap();
        store.save("bob", "c1", &chain_doc("b", false, false)).unwrap();
        assert_eq!(row_count(&store), 2);
        assert_eq!(store.get("bob", "c1").unwrap().name, "b");
    }

    #[test]
    fn invalid_content_writes_nothing() {
        let store = test_store();
        assert!(store.save("alice", "c1", "[1,2]").unwrap_err().is_validation());
        assert_eq!(row_count(&store), 0);
    }

    #[test]
    fn soft_delete_hides_and_purge_removes() {
        let store = test_store();
        store.save("alice", "c1", &chain_doc("a", false, false)).unwrap();

        store.delete("alice", "c1").unwrap();
        assert!(store.get("alice", "c1").unwrap_err().is_not_found());
        assert!(store.delete("alice", "c1").unwrap_err().is_not_found());
        assert_eq!(row_count(&store), 1);

        let page = store.list("alice", &ChainFilter::default(), Pagination::all()).unwrap();
        assert_eq!(page.total, 0);

        store.purge("alice", "c1").unwrap();
        assert_eq!(row_count(&store), 0);
        assert!(store.purge("alice", "c1").unwrap_err().is_not_found());
    }

    #[test]
    fn save_revives_soft_deleted_chain() {
        let store = test_store();
        store.save("alice", "c1", &chain_doc("a", false, false)).unwrap();
        let created = store.get("alice", "c1").unwrap().created_at;
        store.delete("alice", "c1").unwrap();

        store.save("alice", "c1", &chain_doc("back", false, false)).unwrap();
        let record = store.get("alice", "c1").unwrap();
        assert_eq!(record.name, "back");
        assert_eq!(record.created_at, created);
        assert_eq!(row_count(&store), 1);
    }

    #[test]
    fn list_combines_filters() {
        let store = test_store();
        store.save("alice", "a", &chain_doc("billing main", true, false)).unwrap();
        store.save("alice", "b", &chain_doc("billing sub", false, true)).unwrap();
        store.save("alice", "c", &chain_doc("alerts", false, false)).unwrap();
        store.save("bob", "d", &chain_doc("billing", true, false)).unwrap();

        let filter = ChainFilter::default().keywords("billing").root(true);
        let page = store.list("alice", &filter, Pagination::all()).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, "a");

        let enabled = ChainFilter::default().disabled(false);
        assert_eq!(store.list("alice", &enabled, Pagination::all()).unwrap().total, 2);
    }

    #[test]
    fn keyword_is_case_sensitive_and_literal() {
        let store = test_store();
        store.save("alice", "a", &chain_doc("Billing", false, false)).unwrap();
        store.save("alice", "b", &chain_doc("100% sure", false, false)).unwrap();
        store.save("alice", "c", &chain_doc("1000 sure", false, false)).unwrap();

        let lower = ChainFilter::default().keywords("billing");
        assert_eq!(store.list("alice", &lower, Pagination::all()).unwrap().total, 0);

        let percent = ChainFilter::default().keywords("0%");
        let page = store.list("alice", &percent, Pagination::all()).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, "b");
    }

    #[test]
    fn paging_reports_full_total() {
        let store = test_store();
        for i in 0..7 {
            store
                .save("alice", &format!("c{i}"), &chain_doc(&format!("n{i}"), false, false))
                .unwrap();
        }
        let page = store.list("alice", &ChainFilter::default(), Pagination::new(3, 3)).unwrap();
        assert_eq!(page.total, 7);
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn load_enabled_skips_disabled_and_corrupt_rows() {
        let store = test_store();
        store.save("alice", "a", &chain_doc("a", false, false)).unwrap();
        store.save("alice", "b", &chain_doc("b", false, true)).unwrap();
        store.save("alice", "c", &chain_doc("c", false, false)).unwrap();
        {
            let conn = store.client.lock().unwrap();
            conn.execute(
                "UPDATE regulations SET rule_config = 'garbage' WHERE rule_chain_id = 'c'",
                [],
            )
            .unwrap();
        }
        let chains = store.load_enabled("alice").unwrap();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].name(), "a");
    }

    #[test]
    fn component_namespace_uses_its_own_table() {
        let client = SqlClient::open_in_memory().unwrap();
        let rules = SqlChainStore::new(client.clone(), ChainNamespace::Rules);
        let components = SqlChainStore::new(client, ChainNamespace::Components);

        components.save("alice", "c1", &chain_doc("comp", false, false)).unwrap();
        assert!(rules.get("alice", "c1").unwrap_err().is_not_found());
        assert_eq!(components.get_as_rule_chain("alice", "c1").unwrap().name(), "comp");
    }

    #[test]
    fn page_past_the_end_is_empty_even_when_offset_overflows_i64() {
        let store = test_store();
        store.save("alice", "c1", &chain_doc("only", false, false)).unwrap();

        let far = Pagination::new(usize::MAX / 4, 8);
        let page = store.list("alice", &ChainFilter::default(), far).unwrap();
        assert_eq!(page.total, 1);
        assert!(page.items.is_empty());
        assert_eq!(
            limit_offset(far),
            [Value::Integer(8), Value::Integer(i64::MAX)]
        );
    }
}
