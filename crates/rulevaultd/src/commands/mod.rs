pub mod chains;
pub mod runs;
pub mod share;
pub mod use_rules;

use std::io::Read;
use std::path::Path;

use anyhow::Context;
use clap::Args;
use rulevault_core::Pagination;
use serde::Serialize;

/// `--page` / `--size` shared by every list subcommand.
#[derive(Args, Debug, Clone, Copy)]
pub struct PageArgs {
    /// 1-based page number.
    #[arg(long, default_value = "1")]
    pub page: usize,

    /// Page size; 0 returns everything.
    #[arg(long, default_value = "20")]
    pub size: usize,
}

impl From<PageArgs> for Pagination {
    fn from(args: PageArgs) -> Self {
        Pagination::new(args.page, args.size)
    }
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Read a document from a file, or from stdin when the path is `-`.
pub fn read_content(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("failed to read stdin")?;
        return Ok(content);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
