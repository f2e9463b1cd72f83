use clap::Subcommand;
use serde_json::json;

use super::{open_engine, print_json, CliResult};

#[derive(Subcommand)]
pub enum RewardsAction {
    /// Replay payouts parked after a failure
    Retry,
}

pub fn run(action: RewardsAction) -> CliResult {
    let engine = open_engine()?;
    match action {
        RewardsAction::Retry => {
            let report = engine.retry_pending_rewards()?;
            print_json(&json!({
                "report": report,
                "still_pending": engine.pending_rewards()?,
            }))
        }
    }
}
