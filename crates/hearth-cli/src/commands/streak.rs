use clap::Subcommand;
use hearth_core::ActivityType;

use super::{open_engine, print_json, CliResult};

#[derive(Subcommand)]
pub enum StreakAction {
    /// Record an activity for today
    Record {
        user: String,
        /// daily_login, booking, review or check_in
        activity: ActivityType,
    },
    /// Show streaks for a user (all activities unless one is given)
    Show {
        user: String,
        activity: Option<ActivityType>,
    },
}

pub fn run(action: StreakAction) -> CliResult {
    let engine = open_engine()?;
    match action {
        StreakAction::Record { user, activity } => {
            print_json(&engine.record_activity(&user, activity)?)
        }
        StreakAction::Show {
            user,
            activity: Some(activity),
        } => print_json(&engine.streak_of(&user, activity)?),
        StreakAction::Show {
            user,
            activity: None,
        } => print_json(&engine.streaks_of(&user)?),
    }
}
