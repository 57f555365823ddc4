//! Key ring CLI commands

use clap::Subcommand;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::error::VaultResult;

use super::context::CryptoContext;
use super::migrate::format_instant;

/// Key ring subcommands
#[derive(Subcommand)]
pub enum KeysCommands {
    /// List key versions and their lifecycle state
    List,
}

#[derive(Tabled)]
struct KeyRow {
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Activated")]
    activated: String,
    #[tabled(rename = "Retired")]
    retired: String,
}

/// Handle a key ring command
pub fn handle_keys_command(ctx: &CryptoContext, cmd: KeysCommands) -> VaultResult<()> {
    match cmd {
        KeysCommands::List => {
            let active = ctx.keystore.active_version();
            let rows: Vec<KeyRow> = ctx
                .keystore
                .versions()
                .iter()
                .map(|kv| KeyRow {
                    version: if kv.version == active {
                        format!("v{} *", kv.version)
                    } else {
                        format!("v{}", kv.version)
                    },
                    status: kv.status.to_string(),
                    created: kv.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                    activated: format_instant(&kv.activated_at),
                    retired: format_instant(&kv.retired_at),
                })
                .collect();

            let mut table = Table::new(rows);
            table.with(Style::sharp());
            println!("{}", table);
            println!("* current write key");
        }
    }

    Ok(())
}
