//! Component-use rules: usage guidance per component type, relational only.

use rulevault_core::{Page, now_ms};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::relational::limit_offset;
use crate::schema::{COMPONENT_USE_RULES, like_pattern};
use crate::sql::SqlClient;
use crate::types::{ComponentUseRule, ComponentUseRulePatch, NewComponentUseRule, UseRuleQuery};

const RULE_COLUMNS: &str =
    "id, component_name, component_type, disabled, use_desc, use_rule_desc, created_at, updated_at";

#[derive(Clone)]
pub struct UseRuleStore {
    client: SqlClient,
}

fn rule_row(row: &Row<'_>) -> rusqlite::Result<ComponentUseRule> {
    Ok(ComponentUseRule {
        id: row.get(0)?,
        component_name: row.get(1)?,
        component_type: row.get(2)?,
        disabled: row.get(3)?,
        use_desc: row.get(4)?,
        use_rule_desc: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn not_found(id: i64) -> StoreError {
    StoreError::NotFound(format!("{COMPONENT_USE_RULES} {id}"))
}

impl UseRuleStore {
    pub fn new(client: SqlClient) -> Self {
        Self { client }
    }

    pub fn create(&self, rule: &NewComponentUseRule) -> StoreResult<ComponentUseRule> {
        if rule.component_name.is_empty() {
            return Err(StoreError::Validation(
                "component_name must not be empty".into(),
            ));
        }
        let now = now_ms();
        let conn = self.client.lock()?;
        conn.execute(
            "INSERT INTO component_use_rules \
               (component_name, component_type, disabled, use_desc, use_rule_desc, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                rule.component_name,
                rule.component_type,
                rule.disabled,
                rule.use_desc,
                rule.use_rule_desc,
                now
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, component = %rule.component_name, "use rule created");
        Ok(ComponentUseRule {
            id,
            component_name: rule.component_name.clone(),
            component_type: rule.component_type.clone(),
            disabled: rule.disabled,
            use_desc: rule.use_desc.clone(),
            use_rule_desc: rule.use_rule_desc.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get(&self, id: i64) -> StoreResult<ComponentUseRule> {
        let conn = self.client.lock()?;
        let sql = format!("SELECT {RULE_COLUMNS} FROM {COMPONENT_USE_RULES} WHERE id = ?1");
        conn.query_row(&sql, params![id], rule_row)
            .optional()?
            .ok_or_else(|| not_found(id))
    }

    pub fn list(&self, query: &UseRuleQuery) -> StoreResult<Page<ComponentUseRule>> {
        let mut clauses = vec!["1 = 1"];
        let mut values = Vec::new();
        if let Some(component_type) = query.component_type.as_deref().filter(|t| !t.is_empty()) {
            clauses.push("component_type = ?");
            values.push(Value::Text(component_type.to_string()));
        }
        if let Some(disabled) = query.disabled {
            clauses.push("disabled = ?");
            values.push(Value::Integer(disabled as i64));
        }
        if let Some(keywords) = query.keywords.as_deref().filter(|k| !k.is_empty()) {
            clauses.push("component_name LIKE ? ESCAPE '\\'");
            values.push(Value::Text(like_pattern(keywords)));
        }
        let predicate = clauses.join(" AND ");

        let items = {
            let conn = self.client.lock()?;
            let sql = format!(
                "SELECT {RULE_COLUMNS} FROM {COMPONENT_USE_RULES} WHERE {predicate} \
                 ORDER BY updated_at DESC, id DESC LIMIT ? OFFSET ?"
            );
            let mut stmt = conn.prepare(&sql)?;
            let page_params = values.iter().cloned().chain(limit_offset(query.pagination));
            let rows = stmt.query_map(params_from_iter(page_params), rule_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        let total: i64 = {
            let conn = self.client.lock()?;
            let sql = format!("SELECT COUNT(*) FROM {COMPONENT_USE_RULES} WHERE {predicate}");
            conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?
        };
        Ok(Page::new(items, total as usize, query.pagination))
    }

    /// Apply the present fields of `patch` and bump `updated_at`.
    pub fn update(&self, id: i64, patch: &ComponentUseRulePatch) -> StoreResult<ComponentUseRule> {
        let mut sets = Vec::new();
        let mut values = Vec::new();
        if let Some(name) = &patch.component_name {
            if name.is_empty() {
                return Err(StoreError::Validation(
                    "component_name must not be empty".into(),
                ));
            }
            sets.push("component_name = ?");
            values.push(Value::Text(name.clone()));
        }
        if let Some(component_type) = &patch.component_type {
            sets.push("component_type = ?");
            values.push(Value::Text(component_type.clone()));
        }
        if let Some(disabled) = patch.disabled {
            sets.push("disabled = ?");
            values.push(Value::Integer(disabled as i64));
        }
        if let Some(use_desc) = &patch.use_desc {
            sets.push("use_desc = ?");
            values.push(Value::Text(use_desc.clone()));
        }
        if let Some(use_rule_desc) = &patch.use_rule_desc {
            sets.push("use_rule_desc = ?");
            values.push(Value::Text(use_rule_desc.clone()));
        }
        sets.push("updated_at = ?");
        values.push(Value::Integer(now_ms()));
        values.push(Value::Integer(id));

        {
            let conn = self.client.lock()?;
            let sql = format!(
                "UPDATE {COMPONENT_USE_RULES} SET {} WHERE id = ?",
                sets.join(", ")
            );
            if conn.execute(&sql, params_from_iter(values))? == 0 {
                return Err(not_found(id));
            }
        }
        debug!(id, "use rule updated");
        self.get(id)
    }

    pub fn delete(&self, id: i64) -> StoreResult<()> {
        let conn = self.client.lock()?;
        let sql = format!("DELETE FROM {COMPONENT_USE_RULES} WHERE id = ?1");
        if conn.execute(&sql, params![id])? == 0 {
            return Err(not_found(id));
        }
        debug!(id, "use rule deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulevault_core::Pagination;

    fn new_rule(name: &str, component_type: &str, disabled: bool) -> NewComponentUseRule {
        NewComponentUseRule {
            component_name: name.into(),
            component_type: component_type.into(),
            disabled,
            use_desc: format!("how to use {name}"),
            use_rule_desc: String::new(),
        }
    }

    fn store() -> UseRuleStore {
        UseRuleStore::new(SqlClient::open_in_memory().unwrap())
    }

    #[test]
    fn create_assigns_ids() {
        let store = store();
        let a = store.create(&new_rule("restApiCall", "action", false)).unwrap();
        let b = store.create(&new_rule("jsFilter", "filter", false)).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.get(a.id).unwrap(), a);
    }

    #[test]
    fn create_rejects_empty_name() {
        assert!(store().create(&new_rule("", "x", false)).unwrap_err().is_validation());
    }

    #[test]
    fn list_filters_and_counts() {
        let store = store();
        store.create(&new_rule("restApiCall", "action", false)).unwrap();
        store.create(&new_rule("mqttClient", "action", true)).unwrap();
        store.create(&new_rule("jsFilter", "filter", false)).unwrap();

        let actions = UseRuleQuery {
            component_type: Some("action".into()),
            pagination: Pagination::new(1, 1),
            ..Default::default()
        };
        let page = store.list(&actions).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.len(), 1);

        let enabled_with_call = UseRuleQuery {
            disabled: Some(false),
            keywords: Some("Call".into()),
            ..Default::default()
        };
        let page = store.list(&enabled_with_call).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].component_name, "restApiCall");
    }

    #[test]
    fn update_applies_only_present_fields() {
        let store = store();
        let rule = store.create(&new_rule("restApiCall", "action", false)).unwrap();
        let patch = ComponentUseRulePatch {
            disabled: Some(true),
            use_rule_desc: Some("only for internal hosts".into()),
            ..Default::default()
        };
        let updated = store.update(rule.id, &patch).unwrap();
        assert!(updated.disabled);
        assert_eq!(updated.use_rule_desc, "only for internal hosts");
        assert_eq!(updated.use_desc, rule.use_desc);
        assert_eq!(updated.component_name, rule.component_name);
        assert!(updated.updated_at >= rule.updated_at);
    }

    #[test]
    fn missing_ids_are_not_found() {
        let store = store();
        assert!(store.get(42).unwrap_err().is_not_found());
        assert!(store.update(42, &ComponentUseRulePatch::default()).unwrap_err().is_not_found());
        assert!(store.delete(42).unwrap_err().is_not_found());
    }

    #[test]
    fn delete_is_physical() {
        let store = store();
        let rule = store.create(&new_rule("restApiCall", "action", false)).unwrap();
        store.delete(rule.id).unwrap();
        assert!(store.get(rule.id).unwrap_err().is_not_found());
        assert_eq!(store.list(&UseRuleQuery::default()).unwrap().total, 0);
    }
}
