use std::path::PathBuf;

use clap::Subcommand;
use rulevault_core::ShareNodeKind;
use rulevault_store::{MemoryNodePool, StorageGateway};
use serde_json::json;

use super::{PageArgs, print_json, read_content};

#[derive(Subcommand)]
pub enum ShareAction {
    /// List fragments of one kind, ordered by id.
    List {
        /// `node` or `endpoint`.
        kind: ShareNodeKind,
        /// Substring of the fragment id or name.
        #[arg(long)]
        keywords: Option<String>,
        #[command(flatten)]
        page: PageArgs,
    },
    Get { kind: ShareNodeKind, id: String },
    /// Create or replace a fragment; the id is read from the document.
    Upsert {
        kind: ShareNodeKind,
        #[arg(long)]
        file: PathBuf,
    },
    Delete { kind: ShareNodeKind, id: String },
    /// Decode every fragment and register it into a fresh node pool.
    Load,
}

pub fn run(gateway: &StorageGateway, owner: &str, action: ShareAction) -> anyhow::Result<()> {
    let registry = gateway.share_nodes();
    match action {
        ShareAction::List {
            kind,
            keywords,
            page,
        } => print_json(&registry.list(owner, kind, keywords.as_deref(), page.into())?),
        ShareAction::Get { kind, id } => print_json(&registry.get(owner, kind, &id)?),
        ShareAction::Upsert { kind, file } => {
            let content = read_content(&file)?;
            print_json(&registry.upsert(owner, kind, &content)?)
        }
        ShareAction::Delete { kind, id } => {
            registry.delete(owner, kind, &id)?;
            print_json(&json!({ "deleted": id, "kind": kind }))
        }
        ShareAction::Load => {
            let mut pool = MemoryNodePool::new();
            let loaded = registry.load(owner, &mut pool)?;
            print_json(&json!({ "loaded": loaded }))
        }
    }
}
