use clap::Subcommand;
use serde_json::json;

use super::{open_engine, print_json, CliResult};

#[derive(Subcommand)]
pub enum LedgerAction {
    /// Print a user's Pi balance
    Balance { user: String },
    /// List a user's ledger entries, oldest first
    Entries { user: String },
}

pub fn run(action: LedgerAction) -> CliResult {
    let engine = open_engine()?;
    match action {
        LedgerAction::Balance { user } => print_json(&json!({
            "user_id": user,
            "balance": engine.balance_of(&user)?,
        })),
        LedgerAction::Entries { user } => print_json(&engine.entries_for(&user)?),
    }
}
