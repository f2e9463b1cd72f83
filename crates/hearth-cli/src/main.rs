use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "hearth-cli", version, about = "Hearth rewards and safety engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Experience points and levels
    Xp {
        #[command(subcommand)]
        action: commands::xp::XpAction,
    },
    /// Badge awards and catalog
    Badge {
        #[command(subcommand)]
        action: commands::badge::BadgeAction,
    },
    /// Daily activity streaks
    Streak {
        #[command(subcommand)]
        action: commands::streak::StreakAction,
    },
    /// Referral lifecycle
    Referral {
        #[command(subcommand)]
        action: commands::referral::ReferralAction,
    },
    /// Safety check-ins
    Checkin {
        #[command(subcommand)]
        action: commands::checkin::CheckinAction,
    },
    /// Emergency follow-up
    Emergency {
        #[command(subcommand)]
        action: commands::emergency::EmergencyAction,
    },
    /// Emergency contacts
    Contact {
        #[command(subcommand)]
        action: commands::contact::ContactAction,
    },
    /// Pi ledger queries
    Ledger {
        #[command(subcommand)]
        action: commands::ledger::LedgerAction,
    },
    /// Deferred reward payouts
    Rewards {
        #[command(subcommand)]
        action: commands::rewards::RewardsAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Print shell completions
    Completions {
        shell: Shell,
    },
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("HEARTH_LOG")
                .unwrap_or_else(|_| "hearth_core=info,hearth_cli=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Xp { action } => commands::xp::run(action),
        Commands::Badge { action } => commands::badge::run(action),
        Commands::Streak { action } => commands::streak::run(action),
        Commands::Referral { action } => commands::referral::run(action),
        Commands::Checkin { action } => commands::checkin::run(action),
        Commands::Emergency { action } => commands::emergency::run(action),
        Commands::Contact { action } => commands::contact::run(action),
        Commands::Ledger { action } => commands::ledger::run(action),
        Commands::Rewards { action } => commands::rewards::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "hearth-cli", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
