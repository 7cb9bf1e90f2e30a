use clap::Subcommand;
use rulevault_core::TimestampMs;
use rulevault_store::{RunLogQuery, StorageGateway};
use serde_json::json;

use super::{PageArgs, print_json};

#[derive(Subcommand)]
pub enum RunsAction {
    /// List run snapshots, newest first.
    List {
        /// Only runs of this chain.
        #[arg(long)]
        chain: Option<String>,
        /// Inclusive lower bound in epoch ms (sqlite only).
        #[arg(long)]
        start_ms: Option<TimestampMs>,
        /// Inclusive upper bound in epoch ms (sqlite only).
        #[arg(long)]
        end_ms: Option<TimestampMs>,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Print one run snapshot.
    Get { chain: String, run_id: String },
    /// Delete one run snapshot.
    Delete { chain: String, run_id: String },
}

pub fn run(gateway: &StorageGateway, owner: &str, action: RunsAction) -> anyhow::Result<()> {
    let archive = gateway.run_logs();
    match action {
        RunsAction::List {
            chain,
            start_ms,
            end_ms,
            page,
        } => {
            let query = RunLogQuery {
                chain_id: chain,
                start_ms,
                end_ms,
                pagination: page.into(),
            };
            print_json(&archive.list(owner, &query)?)
        }
        RunsAction::Get { chain, run_id } => print_json(&archive.get(owner, &chain, &run_id)?),
        RunsAction::Delete { chain, run_id } => {
            archive.delete(owner, &chain, &run_id)?;
            print_json(&json!({ "deleted": run_id }))
        }
    }
}
