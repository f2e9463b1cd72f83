use clap::Subcommand;

use super::{open_engine, print_json, CliResult};

#[derive(Subcommand)]
pub enum ReferralAction {
    /// Invite someone on behalf of a referrer
    Create {
        referrer: String,
        email: String,
    },
    /// Record that the invitee signed up
    Signup {
        referral_id: String,
        user: String,
    },
    /// Record the invitee's first booking and pay rewards
    Complete {
        referral_id: String,
        user: String,
    },
    /// Show one referral, or every referral of `--referrer`
    Show {
        referral_id: Option<String>,
        #[arg(long, conflicts_with = "referral_id")]
        referrer: Option<String>,
    },
}

pub fn run(action: ReferralAction) -> CliResult {
    let engine = open_engine()?;
    match action {
        ReferralAction::Create { referrer, email } => {
            print_json(&engine.create_referral(&referrer, &email)?)
        }
        ReferralAction::Signup { referral_id, user } => {
            print_json(&engine.mark_referral_signed_up(&referral_id, &user)?)
        }
        ReferralAction::Complete { referral_id, user } => {
            print_json(&engine.complete_referral(&referral_id, &user)?)
        }
        ReferralAction::Show {
            referral_id: Some(id),
            ..
        } => match engine.referrals().get(&id)? {
            Some(record) => print_json(&record),
            None => Err(format!("referral not found: {id}").into()),
        },
        ReferralAction::Show {
            referrer: Some(referrer),
            ..
        } => print_json(&engine.referrals().referrals_by(&referrer)?),
        ReferralAction::Show { .. } => Err("pass a referral id or --referrer".into()),
    }
}
