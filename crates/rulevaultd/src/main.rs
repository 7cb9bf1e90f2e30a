//! rulevaultd — operator binary for the rulevault storage layer.
//!
//! Loads `rulevault.toml`, opens the SQLite client once when any entity is
//! configured for it, builds the [`StorageGateway`] and runs one storage
//! operation. Results are printed to stdout as JSON; logs go to stderr.
//!
//! # Usage
//!
//! ```text
//! rulevaultd --config rulevault.toml --owner alice chains list --disabled false
//! rulevaultd --data-dir ./data chains save c1 --file chain.json
//! rulevaultd runs list --chain c1 --size 10
//! rulevaultd share load
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rulevault_core::VaultConfig;
use rulevault_store::{SqlClient, StorageGateway};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::chains::ChainsAction;
use commands::runs::RunsAction;
use commands::share::ShareAction;
use commands::use_rules::UseRulesAction;

const DEFAULT_LOG_FILTER: &str = "info,rulevault=debug,rulevaultd=debug";

#[derive(Parser)]
#[command(name = "rulevaultd", about = "rulevault storage operator", version, propagate_version = true)]
struct Cli {
    /// Path to rulevault.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override `data_dir` from the config file.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Owner whose namespace the command acts on.
    #[arg(long, global = true, default_value = "admin")]
    owner: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rule chains.
    Chains {
        #[command(subcommand)]
        action: ChainsAction,
    },
    /// Run-log archive.
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
    /// Shared node and endpoint fragments.
    Share {
        #[command(subcommand)]
        action: ShareAction,
    },
    /// Component-use rules (sqlite only).
    UseRules {
        #[command(subcommand)]
        action: UseRulesAction,
    },
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>, data_dir: Option<PathBuf>) -> anyhow::Result<VaultConfig> {
    let mut config = match path {
        Some(path) => VaultConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => VaultConfig::default(),
    };
    if let Some(data_dir) = data_dir {
        config.data_dir = data_dir;
    }
    Ok(config)
}

/// Open the process-wide SQL client when something needs it.
fn open_sql(config: &VaultConfig, required: bool) -> anyhow::Result<Option<SqlClient>> {
    if !required && !config.needs_sql() {
        return Ok(None);
    }
    let path = config.sqlite_path();
    let client = SqlClient::open(&path, Duration::from_millis(config.sqlite.busy_timeout_ms))
        .with_context(|| format!("failed to open sqlite database {}", path.display()))?;
    info!(path = %path.display(), "sqlite client opened");
    Ok(Some(client))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref(), cli.data_dir)?;
    debug!(?config, "configuration loaded");

    let sql = open_sql(&config, matches!(cli.command, Command::UseRules { .. }))?;
    let gateway = StorageGateway::from_config(&config, sql)?;
    let owner = cli.owner.as_str();

    match cli.command {
        Command::Chains { action } => commands::chains::run(&gateway, owner, action),
        Command::Runs { action } => commands::runs::run(&gateway, owner, action),
        Command::Share { action } => commands::share::run(&gateway, owner, action),
        Command::UseRules { action } => commands::use_rules::run(&gateway, action),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);
    run(cli)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from([
            "rulevaultd",
            "chains",
            "list",
            "--owner",
            "bob",
            "--disabled",
            "true",
        ])
        .unwrap();
        assert_eq!(cli.owner, "bob");
        assert!(matches!(cli.command, Command::Chains { .. }));
    }

    #[test]
    fn data_dir_flag_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rulevault.toml");
        std::fs::write(&path, "data_dir = \"/from/file\"\n").unwrap();

        let config = load_config(Some(&path), Some(PathBuf::from("/from/flag"))).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/from/flag"));
        let config = load_config(Some(&path), None).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/from/file"));
    }

    #[test]
    fn file_only_config_runs_without_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("rulevault.toml");
        std::fs::write(
            &config_path,
            "[backends]\nchains = \"file\"\ncomponents = \"file\"\nrun_logs = \"file\"\nshare_nodes = \"file\"\n",
        )
        .unwrap();
        let chain_path = dir.path().join("chain.json");
        std::fs::write(&chain_path, r#"{"ruleChain": {"id": "c1", "name": "demo"}}"#).unwrap();

        let data_dir = dir.path().join("data");
        let args = |rest: &[&str]| {
            let mut argv = vec![
                "rulevaultd".to_string(),
                "--config".into(),
                config_path.display().to_string(),
                "--data-dir".into(),
                data_dir.display().to_string(),
            ];
            argv.extend(rest.iter().map(|s| s.to_string()));
            Cli::try_parse_from(argv).unwrap()
        };

        let chain_file = chain_path.display().to_string();
        run(args(&["chains", "save", "c1", "--file", &chain_file])).unwrap();
        run(args(&["chains", "get", "c1"])).unwrap();
        run(args(&["chains", "rebuild-index"])).unwrap();
        run(args(&["chains", "rebuild-index", "--components"])).unwrap();
        assert!(data_dir.join("workflows/admin/rules/c1.json").is_file());
        assert!(!data_dir.join("rulevault.db").exists());
    }
}
