//! Share-node registry: reusable node and endpoint fragments per owner.
//!
//! `node` and `endpoint` are disjoint sub-namespaces: every operation is
//! routed by [`ShareNodeKind`] and the same id may exist once in each.
//! [`ShareNodeRegistry::load`] populates an execution node pool at session
//! start and is all-or-nothing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rulevault_core::{DslError, EndpointDsl, Page, Pagination, RuleNode, ShareNodeKind, now_ms};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult, map_err};
use crate::files::{Layout, json_stem, read_optional, remove_optional, write_atomic};
use crate::relational::limit_offset;
use crate::schema::{SHARE_NODES, like_pattern};
use crate::sql::SqlClient;
use crate::types::ShareNodeRecord;

/// A decoded share fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum ShareFragment {
    Node(RuleNode),
    Endpoint(EndpointDsl),
}

impl ShareFragment {
    pub fn parse(kind: ShareNodeKind, content: &[u8]) -> Result<Self, DslError> {
        match kind {
            ShareNodeKind::Node => RuleNode::parse(content).map(ShareFragment::Node),
            ShareNodeKind::Endpoint => EndpointDsl::parse(content).map(ShareFragment::Endpoint),
        }
    }

    pub fn kind(&self) -> ShareNodeKind {
        match self {
            ShareFragment::Node(_) => ShareNodeKind::Node,
            ShareFragment::Endpoint(_) => ShareNodeKind::Endpoint,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ShareFragment::Node(node) => &node.id,
            ShareFragment::Endpoint(endpoint) => &endpoint.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ShareFragment::Node(node) => &node.name,
            ShareFragment::Endpoint(endpoint) => &endpoint.name,
        }
    }
}

/// Parse a fragment for an upsert. The id is taken from the content.
fn parse_for_upsert(kind: ShareNodeKind, content: &str) -> StoreResult<ShareFragment> {
    let fragment = ShareFragment::parse(kind, content.as_bytes())?;
    if fragment.id().is_empty() {
        return Err(StoreError::Validation(format!("{kind} fragment has no id")));
    }
    Ok(fragment)
}

fn record_for(kind: ShareNodeKind, fragment: &ShareFragment, content: &str) -> ShareNodeRecord {
    ShareNodeRecord {
        id: fragment.id().to_string(),
        kind,
        name: fragment.name().to_string(),
        content: content.to_string(),
    }
}

fn not_found(owner: &str, kind: ShareNodeKind, id: &str) -> StoreError {
    StoreError::NotFound(format!("share {kind} {owner}/{id}"))
}

pub trait ShareNodeStore: Send + Sync {
    fn upsert(&self, owner: &str, kind: ShareNodeKind, content: &str) -> StoreResult<ShareNodeRecord>;

    fn get(&self, owner: &str, kind: ShareNodeKind, id: &str) -> StoreResult<ShareNodeRecord>;

    fn delete(&self, owner: &str, kind: ShareNodeKind, id: &str) -> StoreResult<()>;

    /// Ordered by id. `keywords` is a case-sensitive substring of id or name.
    fn list(
        &self,
        owner: &str,
        kind: ShareNodeKind,
        keywords: Option<&str>,
        pagination: Pagination,
    ) -> StoreResult<Page<ShareNodeRecord>>;

    /// Every stored fragment of a kind, content undecoded.
    fn list_all(&self, owner: &str, kind: ShareNodeKind) -> StoreResult<Vec<ShareNodeRecord>>;
}

// ── File backend ──────────────────────────────────────────────────

pub struct FileShareNodes {
    layout: Layout,
}

impl FileShareNodes {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            layout: Layout::new(data_dir),
        }
    }

    /// `(id, content)` for every `.json` file of a kind, ordered by id.
    fn read_all(&self, owner: &str, kind: ShareNodeKind) -> StoreResult<Vec<(String, String)>> {
        let dir = self.layout.share_dir(owner, kind)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(map_err!(Io))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().and_then(json_stem) else {
                continue;
            };
            let bytes = std::fs::read(entry.path()).map_err(map_err!(Io))?;
            out.push((id.to_string(), decode_content(bytes)?));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

fn decode_content(bytes: Vec<u8>) -> StoreResult<String> {
    String::from_utf8(bytes).map_err(map_err!(Deserialize))
}

/// Best-effort name for a stored fragment whose content may not decode.
fn stored_name(content: &str) -> String {
    serde_json::from_str::<serde_json::Value>(content)
        .ok()
        .and_then(|v| v.get("name").and_then(|n| n.as_str()).map(str::to_string))
        .unwrap_or_default()
}

impl ShareNodeStore for FileShareNodes {
    fn upsert(&self, owner: &str, kind: ShareNodeKind, content: &str) -> StoreResult<ShareNodeRecord> {
        let fragment = parse_for_upsert(kind, content)?;
        let path = self.layout.share_file(owner, kind, fragment.id())?;
        write_atomic(&path, content.as_bytes())?;
        debug!(%owner, %kind, id = fragment.id(), "share node saved");
        Ok(record_for(kind, &fragment, content))
    }

    fn get(&self, owner: &str, kind: ShareNodeKind, id: &str) -> StoreResult<ShareNodeRecord> {
        let path = self.layout.share_file(owner, kind, id)?;
        let bytes = read_optional(&path)?.ok_or_else(|| not_found(owner, kind, id))?;
        let content = decode_content(bytes)?;
        Ok(ShareNodeRecord {
            id: id.to_string(),
            kind,
            name: stored_name(&content),
            content,
        })
    }

    fn delete(&self, owner: &str, kind: ShareNodeKind, id: &str) -> StoreResult<()> {
        let path = self.layout.share_file(owner, kind, id)?;
        if !remove_optional(&path)? {
            return Err(not_found(owner, kind, id));
        }
        debug!(%owner, %kind, %id, "share node deleted");
        Ok(())
    }

    fn list(
        &self,
        owner: &str,
        kind: ShareNodeKind,
        keywords: Option<&str>,
        pagination: Pagination,
    ) -> StoreResult<Page<ShareNodeRecord>> {
        let keyword = keywords.filter(|k| !k.is_empty());
        let matched: Vec<ShareNodeRecord> = self
            .list_all(owner, kind)?
            .into_iter()
            .filter(|r| keyword.is_none_or(|k| r.id.contains(k) || r.name.contains(k)))
            .collect();
        Ok(Page::from_filtered(matched, pagination))
    }

    fn list_all(&self, owner: &str, kind: ShareNodeKind) -> StoreResult<Vec<ShareNodeRecord>> {
        Ok(self
            .read_all(owner, kind)?
            .into_iter()
            .map(|(id, content)| ShareNodeRecord {
                id,
                kind,
                name: stored_name(&content),
                content,
            })
            .collect())
    }
}

// ── Relational backend ────────────────────────────────────────────

#[derive(Clone)]
pub struct SqlShareNodes {
    client: SqlClient,
}

impl SqlShareNodes {
    pub fn new(client: SqlClient) -> Self {
        Self { client }
    }
}

fn share_row(kind: ShareNodeKind) -> impl Fn(&Row<'_>) -> rusqlite::Result<ShareNodeRecord> {
    move |row| {
        Ok(ShareNodeRecord {
            id: row.get(0)?,
            kind,
            name: row.get(1)?,
            content: row.get(2)?,
        })
    }
}

impl ShareNodeStore for SqlShareNodes {
    fn upsert(&self, owner: &str, kind: ShareNodeKind, content: &str) -> StoreResult<ShareNodeRecord> {
        let fragment = parse_for_upsert(kind, content)?;
        let conn = self.client.lock()?;
        conn.execute(
            "INSERT INTO share_nodes (user_name, kind, node_id, name, content, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
             ON CONFLICT(user_name, kind, node_id) DO UPDATE SET \
               name = excluded.name, \
               content = excluded.content, \
               updated_at = excluded.updated_at",
            params![owner, kind.as_str(), fragment.id(), fragment.name(), content, now_ms()],
        )?;
        debug!(%owner, %kind, id = fragment.id(), "share node saved");
        Ok(record_for(kind, &fragment, content))
    }

    fn get(&self, owner: &str, kind: ShareNodeKind, id: &str) -> StoreResult<ShareNodeRecord> {
        let conn = self.client.lock()?;
        conn.query_row(
            "SELECT node_id, name, content FROM share_nodes \
             WHERE user_name = ?1 AND kind = ?2 AND node_id = ?3",
            params![owner, kind.as_str(), id],
            share_row(kind),
        )
        .optional()?
        .ok_or_else(|| not_found(owner, kind, id))
    }

    fn delete(&self, owner: &str, kind: ShareNodeKind, id: &str) -> StoreResult<()> {
        let conn = self.client.lock()?;
        let deleted = conn.execute(
            "DELETE FROM share_nodes WHERE user_name = ?1 AND kind = ?2 AND node_id = ?3",
            params![owner, kind.as_str(), id],
        )?;
        if deleted == 0 {
            return Err(not_found(owner, kind, id));
        }
        debug!(%owner, %kind, %id, "share node deleted");
        Ok(())
    }

    fn list(
        &self,
        owner: &str,
        kind: ShareNodeKind,
        keywords: Option<&str>,
        pagination: Pagination,
    ) -> StoreResult<Page<ShareNodeRecord>> {
        let mut predicate = String::from("user_name = ? AND kind = ?");
        let mut values = vec![
            Value::Text(owner.to_string()),
            Value::Text(kind.as_str().to_string()),
        ];
        if let Some(keyword) = keywords.filter(|k| !k.is_empty()) {
            predicate.push_str(" AND (node_id LIKE ? ESCAPE '\\' OR name LIKE ? ESCAPE '\\')");
            let pattern = like_pattern(keyword);
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern));
        }

        let items = {
            let conn = self.client.lock()?;
            let sql = format!(
                "SELECT node_id, name, content FROM {SHARE_NODES} WHERE {predicate} \
                 ORDER BY node_id ASC LIMIT ? OFFSET ?"
            );
            let mut stmt = conn.prepare(&sql)?;
            let page_params = values.iter().cloned().chain(limit_offset(pagination));
            let rows = stmt.query_map(params_from_iter(page_params), share_row(kind))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        let total: i64 = {
            let conn = self.client.lock()?;
            let sql = format!("SELECT COUNT(*) FROM {SHARE_NODES} WHERE {predicate}");
            conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?
        };
        Ok(Page::new(items, total as usize, pagination))
    }

    fn list_all(&self, owner: &str, kind: ShareNodeKind) -> StoreResult<Vec<ShareNodeRecord>> {
        Ok(self.list(owner, kind, None, Pagination::all())?.items)
    }
}

// ── Node pool ─────────────────────────────────────────────────────

/// The execution engine's shared-node pool as seen by the registry.
pub trait NodePool {
    /// Register one fragment. Fails if the id is already taken for its kind.
    fn register(&mut self, fragment: ShareFragment) -> StoreResult<()>;

    /// Remove a fragment, returning whether it was present.
    fn unregister(&mut self, kind: ShareNodeKind, id: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process pool keyed by `(kind, id)`.
#[derive(Debug, Default)]
pub struct MemoryNodePool {
    fragments: HashMap<(ShareNodeKind, String), ShareFragment>,
}

impl MemoryNodePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: ShareNodeKind, id: &str) -> Option<&ShareFragment> {
        self.fragments.get(&(kind, id.to_string()))
    }
}

impl NodePool for MemoryNodePool {
    fn register(&mut self, fragment: ShareFragment) -> StoreResult<()> {
        let key = (fragment.kind(), fragment.id().to_string());
        if self.fragments.contains_key(&key) {
            return Err(StoreError::Validation(format!(
                "share {} {} already registered",
                key.0, key.1
            )));
        }
        self.fragments.insert(key, fragment);
        Ok(())
    }

    fn unregister(&mut self, kind: ShareNodeKind, id: &str) -> bool {
        self.fragments.remove(&(kind, id.to_string())).is_some()
    }

    fn len(&self) -> usize {
        self.fragments.len()
    }
}

// ── Registry ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ShareNodeRegistry {
    store: Arc<dyn ShareNodeStore>,
}

impl ShareNodeRegistry {
    pub fn new(store: Arc<dyn ShareNodeStore>) -> Self {
        Self { store }
    }

    pub fn upsert(&self, owner: &str, kind: ShareNodeKind, content: &str) -> StoreResult<ShareNodeRecord> {
        self.store.upsert(owner, kind, content)
    }

    pub fn get(&self, owner: &str, kind: ShareNodeKind, id: &str) -> StoreResult<ShareNodeRecord> {
        self.store.get(owner, kind, id)
    }

    pub fn delete(&self, owner: &str, kind: ShareNodeKind, id: &str) -> StoreResult<()> {
        self.store.delete(owner, kind, id)
    }

    pub fn list(
        &self,
        owner: &str,
        kind: ShareNodeKind,
        keywords: Option<&str>,
        pagination: Pagination,
    ) -> StoreResult<Page<ShareNodeRecord>> {
        self.store.list(owner, kind, keywords, pagination)
    }

    /// Decode every stored fragment of both kinds, then register them all.
    ///
    /// Any decode failure aborts before the pool is touched. A registration
    /// failure unregisters what this call already added, so the pool ends
    /// up exactly as it was.
    pub fn load(&self, owner: &str, pool: &mut dyn NodePool) -> StoreResult<usize> {
        let mut decoded = Vec::new();
        for kind in ShareNodeKind::ALL {
            for record in self.store.list_all(owner, kind)? {
                let fragment = ShareFragment::parse(kind, record.content.as_bytes()).map_err(|e| {
                    StoreError::Deserialize(format!("share {kind} {owner}/{}: {e}", record.id))
                })?;
                decoded.push(fragment);
            }
        }

        let mut registered: Vec<(ShareNodeKind, String)> = Vec::with_capacity(decoded.len());
        for fragment in decoded {
            let key = (fragment.kind(), fragment.id().to_string());
            if let Err(e) = pool.register(fragment) {
                warn!(%owner, error = %e, rolled_back = registered.len(), "share node load aborted");
                for (kind, id) in &registered {
                    pool.unregister(*kind, id);
                }
                return Err(e);
            }
            registered.push(key);
        }
        info!(%owner, loaded = registered.len(), "share nodes loaded");
        Ok(registered.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTTP_ENDPOINT: &str = r#"{"id": "http", "type": "endpoint/http", "name": "api server"}"#;
    const LOG_NODE: &str = r#"{"id": "log", "type": "log", "name": "shared logger"}"#;

    fn stores() -> Vec<(&'static str, Arc<dyn ShareNodeStore>, tempfile::TempDir)> {
        let file_dir = tempfile::tempdir().unwrap();
        let file: Arc<dyn ShareNodeStore> = Arc::new(FileShareNodes::new(file_dir.path()));
        let sql: Arc<dyn ShareNodeStore> =
            Arc::new(SqlShareNodes::new(SqlClient::open_in_memory().unwrap()));
        vec![
            ("file", file, file_dir),
            ("sqlite", sql, tempfile::tempdir().unwrap()),
        ]
    }

    #[test]
    fn kinds_are_disjoint() {
        for (name, store, _dir) in stores() {
            let same_id = r#"{"id": "log", "type": "endpoint/mqtt"}"#;
            store.upsert("alice", ShareNodeKind::Node, LOG_NODE).unwrap();
            store.upsert("alice", ShareNodeKind::Endpoint, same_id).unwrap();

            let node = store.get("alice", ShareNodeKind::Node, "log").unwrap();
            assert_eq!(node.content, LOG_NODE, "{name}");
            assert_eq!(node.name, "shared logger", "{name}");
            store.delete("alice", ShareNodeKind::Node, "log").unwrap();
            assert!(store.get("alice", ShareNodeKind::Endpoint, "log").is_ok(), "{name}");
            assert!(
                store.delete("alice", ShareNodeKind::Node, "log").unwrap_err().is_not_found(),
                "{name}"
            );
        }
    }

    #[test]
    fn upsert_requires_an_id() {
        for (name, store, _dir) in stores() {
            let err = store
                .upsert("alice", ShareNodeKind::Node, r#"{"type": "log"}"#)
                .unwrap_err();
            assert!(err.is_validation(), "{name}");
            let err = store.upsert("alice", ShareNodeKind::Node, "nope").unwrap_err();
            assert!(err.is_validation(), "{name}");
        }
    }

    #[test]
    fn list_matches_id_or_name_in_id_order() {
        for (name, store, _dir) in stores() {
            store.upsert("alice", ShareNodeKind::Endpoint, HTTP_ENDPOINT).unwrap();
            store
                .upsert("alice", ShareNodeKind::Endpoint, r#"{"id": "api-mqtt", "name": "broker"}"#)
                .unwrap();
            store
                .upsert("alice", ShareNodeKind::Endpoint, r#"{"id": "cron", "name": "timer"}"#)
                .unwrap();

            let page = store
                .list("alice", ShareNodeKind::Endpoint, Some("api"), Pagination::all())
                .unwrap();
            let ids: Vec<_> = page.items.iter().map(|r| r.id.as_str()).collect();
            assert_eq!(ids, ["api-mqtt", "http"], "{name}");
            assert_eq!(page.total, 2, "{name}");

            let all = store
                .list("alice", ShareNodeKind::Endpoint, None, Pagination::new(2, 2))
                .unwrap();
            assert_eq!(all.total, 3, "{name}");
            assert_eq!(all.items[0].id, "http", "{name}");
        }
    }

    #[test]
    fn invalid_utf8_fragment_fails_get_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileShareNodes::new(dir.path()));
        store.upsert("alice", ShareNodeKind::Node, LOG_NODE).unwrap();
        let path = dir.path().join("workflows/alice/sharenodes/node/log.json");
        std::fs::write(&path, b"{\"id\": \"log\", \"name\": \"\xff\xfe\"}").unwrap();

        let err = store.get("alice", ShareNodeKind::Node, "log").unwrap_err();
        assert!(matches!(err, StoreError::Deserialize(_)));

        let registry = ShareNodeRegistry::new(store);
        let mut pool = MemoryNodePool::new();
        let err = registry.load("alice", &mut pool).unwrap_err();
        assert!(err.is_storage());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn load_registers_both_kinds() {
        for (name, store, _dir) in stores() {
            store.upsert("alice", ShareNodeKind::Node, LOG_NODE).unwrap();
            store.upsert("alice", ShareNodeKind::Endpoint, HTTP_ENDPOINT).unwrap();
            let registry = ShareNodeRegistry::new(store);
            let mut pool = MemoryNodePool::new();
            assert_eq!(registry.load("alice", &mut pool).unwrap(), 2, "{name}");
            assert!(pool.get(ShareNodeKind::Endpoint, "http").is_some(), "{name}");
        }
    }

    #[test]
    fn failed_registration_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileShareNodes::new(dir.path()));
        store.upsert("alice", ShareNodeKind::Node, LOG_NODE).unwrap();
        store
            .upsert("alice", ShareNodeKind::Node, r#"{"id": "zz", "type": "log"}"#)
            .unwrap();
        let registry = ShareNodeRegistry::new(store);

        let mut pool = MemoryNodePool::new();
        pool.register(ShareFragment::Node(RuleNode {
            id: "zz".into(),
            ..RuleNode::default()
        }))
        .unwrap();

        assert!(registry.load("alice", &mut pool).is_err());
        assert_eq!(pool.len(), 1);
        assert!(pool.get(ShareNodeKind::Node, "log").is_none());
    }
}
