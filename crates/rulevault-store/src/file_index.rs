//! File chain store: one JSON file per chain plus an in-memory index.
//!
//! The files are authoritative. The index maps `owner → chain id → ChainMeta`
//! and only accelerates listing; [`FileChainStore::rebuild`] reconstructs it
//! from a directory scan. A crash between a file write and the index update
//! leaves them out of step until the next rebuild.
//!
//! Readers (`list`, `get`) share the lock; writers (`save`, `delete`) hold
//! it exclusively across the file operation and the index update. There is
//! no cross-process locking.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use rulevault_core::{ChainFilter, Page, Pagination, RuleChain, TimestampMs, now_ms};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chain::{ChainStore, parse_for_save};
use crate::error::{StoreError, StoreResult, map_err};
use crate::files::{self, Layout};
use crate::types::{ChainId, ChainMeta, ChainNamespace, RebuildReport, RuleChainRecord};

type OwnerIndex = HashMap<ChainId, ChainMeta>;

/// File-backed chain store for one namespace.
pub struct FileChainStore {
    layout: Layout,
    ns: ChainNamespace,
    index: RwLock<HashMap<String, OwnerIndex>>,
}

impl FileChainStore {
    /// Open the store and index every owner directory found on disk.
    pub fn open(data_dir: &Path, ns: ChainNamespace) -> StoreResult<Self> {
        let store = Self {
            layout: Layout::new(data_dir),
            ns,
            index: RwLock::new(HashMap::new()),
        };
        let owners = store.rebuild_all()?;
        debug!(?data_dir, namespace = ns.dir_name(), owners, "file chain store opened");
        Ok(store)
    }

    /// Rescan one owner's directory and replace that owner's index.
    ///
    /// The scan runs under the write lock so a concurrent `save` is either
    /// seen by the scan or applied after the new index is in place.
    pub fn rebuild(&self, owner: &str) -> StoreResult<RebuildReport> {
        let dir = self.layout.chains_dir(owner, self.ns)?;
        let mut index = self.write_index()?;
        let fresh = scan_dir(&dir)?;
        let previous = index.remove(owner).unwrap_or_default();
        let report = RebuildReport {
            entries: fresh.len(),
            added: fresh.keys().filter(|id| !previous.contains_key(*id)).count(),
            removed: previous.keys().filter(|id| !fresh.contains_key(*id)).count(),
        };
        if !fresh.is_empty() {
            index.insert(owner.to_string(), fresh);
        }
        info!(%owner, namespace = self.ns.dir_name(), ?report, "chain index rebuilt");
        Ok(report)
    }

    /// Rescan every owner directory. Returns the number of owners indexed.
    pub fn rebuild_all(&self) -> StoreResult<usize> {
        let workflows = self.layout.workflows_dir();
        let mut index = self.write_index()?;
        let mut fresh = HashMap::new();
        if workflows.is_dir() {
            for entry in WalkDir::new(&workflows).min_depth(1).max_depth(1) {
                let entry = entry.map_err(map_err!(Io))?;
                if !entry.file_type().is_dir() {
                    continue;
                }
                let Some(owner) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let owner_index = scan_dir(&entry.path().join(self.ns.dir_name()))?;
                if !owner_index.is_empty() {
                    fresh.insert(owner, owner_index);
                }
            }
        }
        let owners = fresh.len();
        *index = fresh;
        Ok(owners)
    }

    /// Ordered copy of one owner's index entries.
    pub fn index_snapshot(&self, owner: &str) -> StoreResult<Vec<ChainMeta>> {
        let index = self.read_index()?;
        let mut metas: Vec<ChainMeta> = index
            .get(owner)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default();
        metas.sort_by(listing_order);
        Ok(metas)
    }

    fn read_index(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<String, OwnerIndex>>> {
        self.index
            .read()
            .map_err(|_| StoreError::Io("chain index lock poisoned".to_string()))
    }

    fn write_index(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<String, OwnerIndex>>> {
        self.index
            .write()
            .map_err(|_| StoreError::Io("chain index lock poisoned".to_string()))
    }

    /// Read a chain file into a record. `meta` supplies the index view when
    /// one exists; otherwise the flags come from the document itself.
    fn read_record(
        &self,
        owner: &str,
        id: &str,
        meta: Option<&ChainMeta>,
    ) -> StoreResult<Option<RuleChainRecord>> {
        let path = self.layout.chain_file(owner, self.ns, id)?;
        let Some(bytes) = files::read_optional(&path)? else {
            return Ok(None);
        };
        let content = String::from_utf8(bytes).map_err(map_err!(Deserialize))?;
        let file_meta = std::fs::metadata(&path).map_err(map_err!(Io))?;
        let modified = files::modified_ms(&file_meta);
        let created = file_meta
            .created()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as TimestampMs)
            .unwrap_or(modified);

        let (name, root, disabled, updated_at) = match meta {
            Some(m) => (m.name.clone(), m.root, m.disabled, m.update_time),
            None => {
                let doc = RuleChain::parse(content.as_bytes())
                    .map_err(|e| StoreError::Deserialize(e.to_string()))?;
                (doc.name().to_string(), doc.root(), doc.disabled(), modified)
            }
        };
        Ok(Some(RuleChainRecord {
            id: id.to_string(),
            owner: owner.to_string(),
            name,
            root,
            disabled,
            content,
            created_at: created.min(updated_at),
            updated_at,
        }))
    }

    fn remove(&self, owner: &str, id: &str) -> StoreResult<()> {
        let path = self.layout.chain_file(owner, self.ns, id)?;
        let mut index = self.write_index()?;
        let existed = files::remove_optional(&path)?;
        let had_entry = index
            .get_mut(owner)
            .and_then(|entries| entries.remove(id))
            .is_some();
        if !existed {
            if had_entry {
                warn!(%owner, %id, inconsistency = "file_missing", "index entry without chain file dropped");
            }
            return Err(StoreError::NotFound(format!("chain {owner}/{id}")));
        }
        debug!(%owner, %id, namespace = self.ns.dir_name(), "chain file deleted");
        Ok(())
    }
}

impl ChainStore for FileChainStore {
    fn namespace(&self) -> ChainNamespace {
        self.ns
    }

    fn list(
        &self,
        owner: &str,
        filter: &ChainFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<RuleChainRecord>> {
        let index = self.read_index()?;
        let mut matched: Vec<&ChainMeta> = index
            .get(owner)
            .map(|entries| {
                entries
                    .values()
                    .filter(|m| filter.matches(&m.name, m.root, m.disabled))
                    .collect()
            })
            .unwrap_or_default();
        matched.sort_by(|a, b| listing_order(a, b));

        let total = matched.len();
        let mut items = Vec::new();
        for meta in pagination.slice(matched) {
            match self.read_record(owner, &meta.id, Some(meta))? {
                Some(record) => items.push(record),
                None => warn!(%owner, id = %meta.id, inconsistency = "file_missing", "indexed chain file missing during list"),
            }
        }
        Ok(Page::new(items, total, pagination))
    }

    fn get(&self, owner: &str, id: &str) -> StoreResult<RuleChainRecord> {
        let index = self.read_index()?;
        let meta = index.get(owner).and_then(|entries| entries.get(id));
        match self.read_record(owner, id, meta)? {
            Some(record) => {
                if meta.is_none() {
                    warn!(%owner, %id, inconsistency = "entry_missing", "chain file has no index entry");
                }
                Ok(record)
            }
            None => {
                if meta.is_some() {
                    warn!(%owner, %id, inconsistency = "file_missing", "index entry without chain file");
                }
                Err(StoreError::NotFound(format!("chain {owner}/{id}")))
            }
        }
    }

    fn save(&self, owner: &str, id: &str, content: &str) -> StoreResult<()> {
        let doc = parse_for_save(content)?;
        let path = self.layout.chain_file(owner, self.ns, id)?;
        let mut index = self.write_index()?;
        files::write_atomic(&path, content.as_bytes())?;
        index.entry(owner.to_string()).or_default().insert(
            id.to_string(),
            ChainMeta {
                name: doc.name().to_string(),
                id: id.to_string(),
                root: doc.root(),
                disabled: doc.disabled(),
                update_time: now_ms(),
            },
        );
        debug!(%owner, %id, namespace = self.ns.dir_name(), "chain file saved");
        Ok(())
    }

    fn delete(&self, owner: &str, id: &str) -> StoreResult<()> {
        self.remove(owner, id)
    }

    fn purge(&self, owner: &str, id: &str) -> StoreResult<()> {
        self.remove(owner, id)
    }

    fn latest(&self, owner: &str) -> StoreResult<RuleChainRecord> {
        let snapshot = self.index_snapshot(owner)?;
        let meta = snapshot
            .first()
            .ok_or_else(|| StoreError::NotFound(format!("no chains for {owner}")))?;
        self.get(owner, &meta.id)
    }

    fn load_enabled(&self, owner: &str) -> StoreResult<Vec<RuleChain>> {
        let snapshot = self.index_snapshot(owner)?;
        let mut chains = Vec::new();
        for meta in snapshot.iter().filter(|m| !m.disabled) {
            let path = self.layout.chain_file(owner, self.ns, &meta.id)?;
            let Some(bytes) = files::read_optional(&path)? else {
                warn!(%owner, id = %meta.id, inconsistency = "file_missing", "indexed chain file missing during load");
                continue;
            };
            match RuleChain::parse(&bytes) {
                Ok(chain) => chains.push(chain),
                Err(e) => warn!(%owner, id = %meta.id, error = %e, "skipping unparsable chain"),
            }
        }
        Ok(chains)
    }
}

/// `update_time` descending, then id ascending.
fn listing_order(a: &ChainMeta, b: &ChainMeta) -> Ordering {
    b.update_time
        .cmp(&a.update_time)
        .then_with(|| a.id.cmp(&b.id))
}

/// Index every parsable `*.json` file in one directory.
fn scan_dir(dir: &Path) -> StoreResult<OwnerIndex> {
    let mut entries = OwnerIndex::new();
    if !dir.is_dir() {
        return Ok(entries);
    }
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(map_err!(Io))?;
        let Some(id) = entry.file_name().to_str().and_then(files::json_stem) else {
            continue;
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = entry.metadata().map_err(map_err!(Io))?;
        let bytes = std::fs::read(entry.path()).map_err(map_err!(Io))?;
        let doc = match RuleChain::parse(&bytes) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = ?entry.path(), error = %e, "skipping unparsable chain file");
                continue;
            }
        };
        entries.insert(
            id.to_string(),
            ChainMeta {
                name: doc.name().to_string(),
                id: id.to_string(),
                root: doc.root(),
                disabled: doc.disabled(),
                update_time: files::modified_ms(&meta),
            },
        );
    }
    Ok(entries)
}
