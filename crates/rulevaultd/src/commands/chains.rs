use std::path::PathBuf;

use anyhow::bail;
use clap::Subcommand;
use rulevault_core::ChainFilter;
use rulevault_core::dsl::{validate, validate_content};
use rulevault_store::StorageGateway;
use serde_json::json;

use super::{PageArgs, print_json, read_content};

#[derive(Subcommand)]
pub enum ChainsAction {
    /// List chains, newest first.
    List {
        /// Case-sensitive substring of the chain name.
        #[arg(long)]
        keywords: Option<String>,
        #[arg(long)]
        root: Option<bool>,
        #[arg(long)]
        disabled: Option<bool>,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Print one chain record.
    Get { id: String },
    /// Create or replace a chain from a JSON document (`-` reads stdin).
    Save {
        id: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Delete a chain and its run logs.
    Delete { id: String },
    /// Rescan the owner's chain directory (file backend).
    RebuildIndex {
        /// Rebuild the component index instead.
        #[arg(long)]
        components: bool,
    },
    /// Check a stored chain, or a document on disk, for structural problems.
    Validate {
        id: Option<String>,
        #[arg(long, conflicts_with = "id")]
        file: Option<PathBuf>,
    },
}

pub fn run(gateway: &StorageGateway, owner: &str, action: ChainsAction) -> anyhow::Result<()> {
    match action {
        ChainsAction::List {
            keywords,
            root,
            disabled,
            page,
        } => {
            let filter = ChainFilter {
                keywords,
                root,
                disabled,
            };
            print_json(&gateway.list(owner, &filter, page.into())?)
        }
        ChainsAction::Get { id } => print_json(&gateway.get(owner, &id)?),
        ChainsAction::Save { id, file } => {
            let content = read_content(&file)?;
            gateway.save(owner, &id, &content)?;
            print_json(&json!({ "saved": id }))
        }
        ChainsAction::Delete { id } => {
            gateway.delete(owner, &id)?;
            print_json(&json!({ "deleted": id }))
        }
        ChainsAction::RebuildIndex { components } => {
            let report = if components {
                gateway.rebuild_component_index(owner)?
            } else {
                gateway.rebuild_index(owner)?
            };
            print_json(&report)
        }
        ChainsAction::Validate { id, file } => {
            let report = match (id, file) {
                (Some(id), _) => validate(&gateway.get_as_rule_chain(owner, &id)?),
                (None, Some(file)) => validate_content(read_content(&file)?.as_bytes()),
                (None, None) => bail!("pass a chain id or --file"),
            };
            print_json(&report)
        }
    }
}
