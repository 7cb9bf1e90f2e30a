//! SQLite schema for the relational backend.
//!
//! `regulations` and `component_regulations` share one shape; chains are
//! keyed by `(user_name, rule_chain_id)` so saves can use a native upsert.
//! Rows with `deleted_at` set are soft-deleted and hidden from default
//! queries.

pub const REGULATIONS: &str = "regulations";
pub const COMPONENT_REGULATIONS: &str = "component_regulations";
pub const RUN_LOGS: &str = "run_logs";
pub const COMPONENT_USE_RULES: &str = "component_use_rules";
pub const SHARE_NODES: &str = "share_nodes";

/// Connection-level settings applied on every open.
pub const PRAGMAS: &str = r#"
    PRAGMA foreign_keys = ON;
    PRAGMA case_sensitive_like = ON;
"#;

pub const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS regulations (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      user_name TEXT NOT NULL,
      root INTEGER NOT NULL DEFAULT 0,
      disabled INTEGER NOT NULL DEFAULT 0,
      rule_chain_id TEXT NOT NULL,
      name TEXT NOT NULL DEFAULT '',
      rule_config TEXT NOT NULL,
      created_at INTEGER NOT NULL,
      updated_at INTEGER NOT NULL,
      deleted_at INTEGER,
      UNIQUE (user_name, rule_chain_id)
    );

    CREATE INDEX IF NOT EXISTS idx_regulations_listing
      ON regulations (user_name, deleted_at, updated_at);

    CREATE TABLE IF NOT EXISTS component_regulations (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      user_name TEXT NOT NULL,
      root INTEGER NOT NULL DEFAULT 0,
      disabled INTEGER NOT NULL DEFAULT 0,
      rule_chain_id TEXT NOT NULL,
      name TEXT NOT NULL DEFAULT '',
      rule_config TEXT NOT NULL,
      created_at INTEGER NOT NULL,
      updated_at INTEGER NOT NULL,
      deleted_at INTEGER,
      UNIQUE (user_name, rule_chain_id)
    );

    CREATE INDEX IF NOT EXISTS idx_component_regulations_listing
      ON component_regulations (user_name, deleted_at, updated_at);

    CREATE TABLE IF NOT EXISTS run_logs (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      user_name TEXT NOT NULL,
      run_id TEXT NOT NULL,
      chain_id TEXT NOT NULL,
      chain_name TEXT NOT NULL DEFAULT '',
      node_log TEXT NOT NULL,
      additional_info TEXT NOT NULL,
      rule_chain_info TEXT NOT NULL,
      metadata TEXT NOT NULL,
      start_ts INTEGER NOT NULL DEFAULT 0,
      end_ts INTEGER NOT NULL DEFAULT 0,
      created_at INTEGER NOT NULL,
      updated_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_run_logs_chain
      ON run_logs (user_name, chain_id, created_at);
    CREATE INDEX IF NOT EXISTS idx_run_logs_run_id
      ON run_logs (user_name, run_id);

    CREATE TABLE IF NOT EXISTS component_use_rules (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      component_name TEXT NOT NULL,
      component_type TEXT NOT NULL DEFAULT '',
      disabled INTEGER NOT NULL DEFAULT 0,
      use_desc TEXT NOT NULL DEFAULT '',
      use_rule_desc TEXT NOT NULL DEFAULT '',
      created_at INTEGER NOT NULL,
      updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS share_nodes (
      user_name TEXT NOT NULL,
      kind TEXT NOT NULL,
      node_id TEXT NOT NULL,
      name TEXT NOT NULL DEFAULT '',
      content TEXT NOT NULL,
      created_at INTEGER NOT NULL,
      updated_at INTEGER NOT NULL,
      PRIMARY KEY (user_name, kind, node_id)
    );
"#;

/// Escape `%`, `_` and `\` and wrap in wildcards for `LIKE ? ESCAPE '\'`.
pub fn like_pattern(keyword: &str) -> String {
    let mut out = String::with_capacity(keyword.len() + 2);
    out.push('%');
    for ch in keyword.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("abc"), "%abc%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }
}
