use clap::{Subcommand, ValueEnum};
use hearth_core::Resolution;

use super::{open_engine, print_json, CliResult};

#[derive(Clone, Copy, ValueEnum)]
pub enum ResolutionArg {
    Resolved,
    FalseAlarm,
}

impl From<ResolutionArg> for Resolution {
    fn from(arg: ResolutionArg) -> Self {
        match arg {
            ResolutionArg::Resolved => Resolution::Resolved,
            ResolutionArg::FalseAlarm => Resolution::FalseAlarm,
        }
    }
}

#[derive(Subcommand)]
pub enum EmergencyAction {
    /// Close an active emergency
    Resolve {
        check_in_id: String,
        #[arg(long, value_enum, default_value = "resolved")]
        outcome: ResolutionArg,
    },
}

pub fn run(action: EmergencyAction) -> CliResult {
    let engine = open_engine()?;
    match action {
        EmergencyAction::Resolve {
            check_in_id,
            outcome,
        } => print_json(&engine.resolve_emergency(&check_in_id, outcome.into())?),
    }
}
