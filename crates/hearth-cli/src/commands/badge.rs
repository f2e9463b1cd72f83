use clap::Subcommand;
use hearth_core::rewards::catalog;
use hearth_core::BadgeAward;
use serde_json::json;

use super::{open_engine, print_json, CliResult};

#[derive(Subcommand)]
pub enum BadgeAction {
    /// Award a badge to a user
    Award { user: String, badge: String },
    /// List badges held by a user
    List { user: String },
    /// Print the badge catalog
    Catalog,
}

pub fn run(action: BadgeAction) -> CliResult {
    match action {
        BadgeAction::Award { user, badge } => {
            let engine = open_engine()?;
            let out = match engine.award_badge(&user, &badge)? {
                BadgeAward::Granted { grant, rewards } => json!({
                    "outcome": "granted",
                    "grant": grant,
                    "rewards": rewards,
                }),
                BadgeAward::AlreadyHeld(grant) => json!({
                    "outcome": "already_held",
                    "grant": grant,
                }),
                BadgeAward::UnknownBadge => {
                    return Err(format!("unknown badge: {badge}").into());
                }
            };
            print_json(&out)
        }
        BadgeAction::List { user } => print_json(&open_engine()?.badges_of(&user)?),
        BadgeAction::Catalog => print_json(&catalog()),
    }
}
