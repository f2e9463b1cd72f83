use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Subcommand;
use hearth_core::{Clock, SystemClock, TokioScheduler};
use serde_json::json;
use tracing::{info, warn};

use super::{engine_builder, open_engine, print_json, CliResult};

#[derive(Subcommand)]
pub enum CheckinAction {
    /// Schedule the post-arrival check-in for a booking
    Schedule {
        booking: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        property: String,
        /// Check-in time as RFC 3339 (defaults to now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Confirm a check-in
    Confirm { check_in_id: String },
    /// Show a check-in, the one for `--booking`, or all of them
    Show {
        check_in_id: Option<String>,
        #[arg(long, conflicts_with = "check_in_id")]
        booking: Option<String>,
    },
    /// Escalate every check-in past its deadline
    Sweep,
    /// Keep running and escalate check-ins as their deadlines pass
    Watch {
        /// Seconds between overdue sweeps and reward retries
        #[arg(long, default_value = "60")]
        interval: u64,
    },
}

pub fn run(action: CheckinAction) -> CliResult {
    match action {
        CheckinAction::Schedule {
            booking,
            user,
            property,
            at,
        } => {
            let engine = open_engine()?;
            let at = at.unwrap_or_else(|| engine.clock().now());
            print_json(&engine.schedule_check_in(&booking, &user, &property, at)?)
        }
        CheckinAction::Confirm { check_in_id } => {
            print_json(&open_engine()?.confirm_check_in(&check_in_id)?)
        }
        CheckinAction::Show {
            check_in_id: Some(id),
            ..
        } => match open_engine()?.safety().get(&id)? {
            Some(check_in) => print_json(&check_in),
            None => Err(format!("check-in not found: {id}").into()),
        },
        CheckinAction::Show {
            booking: Some(booking),
            ..
        } => match open_engine()?.safety().for_booking(&booking)? {
            Some(check_in) => print_json(&check_in),
            None => Err(format!("no check-in for booking: {booking}").into()),
        },
        CheckinAction::Show { .. } => print_json(&open_engine()?.safety().all()?),
        CheckinAction::Sweep => {
            let escalated = open_engine()?.escalate_overdue()?;
            print_json(&json!({ "escalated": escalated }))
        }
        CheckinAction::Watch { interval } => watch(Duration::from_secs(interval.max(1))),
    }
}

fn watch(interval: Duration) -> CliResult {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let scheduler = TokioScheduler::current(clock.clone())?;
        let engine = engine_builder()?
            .clock(clock)
            .scheduler(Arc::new(scheduler))
            .build();

        let rearmed = engine.rearm_pending()?;
        let escalated = engine.escalate_overdue()?;
        info!(rearmed, escalated = escalated.len(), "watching check-ins");

        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = engine.escalate_overdue() {
                        warn!(error = %e, "overdue sweep failed");
                    }
                    if let Err(e) = engine.retry_pending_rewards() {
                        warn!(error = %e, "reward retry failed");
                    }
                    for event in engine.drain_events() {
                        println!("{}", serde_json::to_string(&event)?);
                    }
                }
            }
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
