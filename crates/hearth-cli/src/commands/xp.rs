use clap::{Subcommand, ValueEnum};
use hearth_core::RewardSource;

use super::{open_engine, print_json, CliResult};

#[derive(Clone, Copy, ValueEnum)]
pub enum SourceArg {
    Booking,
    Review,
    Referral,
    Achievement,
    Daily,
    Streak,
}

impl From<SourceArg> for RewardSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Booking => RewardSource::Booking,
            SourceArg::Review => RewardSource::Review,
            SourceArg::Referral => RewardSource::Referral,
            SourceArg::Achievement => RewardSource::Achievement,
            SourceArg::Daily => RewardSource::Daily,
            SourceArg::Streak => RewardSource::Streak,
        }
    }
}

#[derive(Subcommand)]
pub enum XpAction {
    /// Deposit XP for a user
    Add {
        user: String,
        /// XP amount (zero or negative is ignored)
        #[arg(allow_hyphen_values = true)]
        amount: i64,
        #[arg(long, value_enum, default_value = "booking")]
        source: SourceArg,
    },
    /// Print a user's level state as JSON
    Show { user: String },
}

pub fn run(action: XpAction) -> CliResult {
    let engine = open_engine()?;
    match action {
        XpAction::Add {
            user,
            amount,
            source,
        } => {
            let state = engine.add_xp(&user, amount, source.into())?;
            print_json(&state)
        }
        XpAction::Show { user } => print_json(&engine.level_of(&user)?),
    }
}
