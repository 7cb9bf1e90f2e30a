//! The chain storage contract shared by the file and relational backends.

use rulevault_core::{ChainFilter, Page, Pagination, RuleChain};

use crate::error::StoreResult;
use crate::types::{ChainNamespace, RuleChainRecord};

/// CRUD + filtered listing over one chain namespace.
///
/// Implementations are selected once at startup and never mixed for the
/// same namespace; no consistency between backends is attempted.
pub trait ChainStore: Send + Sync {
    fn namespace(&self) -> ChainNamespace;

    /// Filter, order by `updated_at` desc (ties by id asc), and page.
    fn list(
        &self,
        owner: &str,
        filter: &ChainFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<RuleChainRecord>>;

    /// Fetch one live chain; `NotFound` when absent.
    fn get(&self, owner: &str, id: &str) -> StoreResult<RuleChainRecord>;

    /// Insert or update. The content is validated before anything is written.
    fn save(&self, owner: &str, id: &str, content: &str) -> StoreResult<()>;

    /// Remove a chain the way the backend normally deletes.
    fn delete(&self, owner: &str, id: &str) -> StoreResult<()>;

    /// Remove a chain physically, including soft-deleted rows.
    fn purge(&self, owner: &str, id: &str) -> StoreResult<()>;

    /// The most recently updated live chain.
    fn latest(&self, owner: &str) -> StoreResult<RuleChainRecord>;

    /// Every live, enabled chain parsed into its document. Unparsable
    /// documents are skipped.
    fn load_enabled(&self, owner: &str) -> StoreResult<Vec<RuleChain>>;

    /// Fetch and parse one chain.
    fn get_as_rule_chain(&self, owner: &str, id: &str) -> StoreResult<RuleChain> {
        self.get(owner, id)?.document()
    }
}

/// Parse content for a save. Failure aborts the write as a validation error.
pub(crate) fn parse_for_save(content: &str) -> StoreResult<RuleChain> {
    Ok(RuleChain::parse(content.as_bytes())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_for_save_maps_to_validation() {
        assert!(parse_for_save("{}").unwrap_err().is_validation());
        let chain = parse_for_save(r#"{"ruleChain": {"id": "a", "name": "A"}}"#).unwrap();
        assert_eq!(chain.name(), "A");
    }
}
