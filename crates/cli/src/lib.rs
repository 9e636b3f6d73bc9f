pub mod bootstrap;
pub mod commands;

use clap::{Parser, Subcommand};
use purser_core::config::{AppConfig, LoadOptions, LogFormat};
use rust_decimal::Decimal;
use std::process::ExitCode;

use commands::decide::DecideArgs;
use commands::turn::TurnArgs;

#[derive(Debug, Parser)]
#[command(
    name = "purser",
    about = "Purser buyer-negotiation agent CLI",
    long_about = "Negotiate a purchase turn by turn, pay in ERC-20 tokens, and inspect sessions, \
                  wallet state, and configuration.",
    after_help = "Examples:\n  purser turn --user-id ana --goal headphones --budget 100\n  \
                  purser turn --user-id ana --goal headphones --budget 100 --text \"Yes, $60\"\n  \
                  purser decide --goal headphones --budget 100 --text \"$60 to 0x...\"\n  \
                  purser doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, payer key readiness, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Process one counterparty message, or open the negotiation without --text")]
    Turn {
        #[arg(long)]
        user_id: String,
        #[arg(long, help = "Resume or name a specific session")]
        session_id: Option<String>,
        #[arg(long)]
        goal: String,
        #[arg(long)]
        budget: Decimal,
        #[arg(long, help = "Counterparty message; omit to send the opening message")]
        text: Option<String>,
    },
    #[command(about = "Show the decision for a message without paying or recording anything")]
    Decide {
        #[arg(long)]
        goal: String,
        #[arg(long)]
        budget: Decimal,
        #[arg(long)]
        text: String,
        #[arg(long, help = "Evaluate against a stored session")]
        session_id: Option<String>,
    },
    #[command(about = "Print a stored session record")]
    Session {
        #[arg(long)]
        session_id: String,
    },
    #[command(about = "List a user's most recent turns across sessions")]
    History {
        #[arg(long)]
        user_id: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    #[command(about = "Show the payer wallet address and token balance")]
    Wallet,
    #[command(name = "tx-status", about = "Look up a transaction receipt")]
    TxStatus {
        #[arg(long)]
        reference: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Turn { user_id, session_id, goal, budget, text } => {
            commands::turn::run(TurnArgs { user_id, session_id, goal, budget, text })
        }
        Command::Decide { goal, budget, text, session_id } => {
            commands::decide::run(DecideArgs { goal, budget, text, session_id })
        }
        Command::Session { session_id } => commands::session::run(session_id),
        Command::History { user_id, limit } => commands::history::run(user_id, limit),
        Command::Wallet => commands::wallet::run(),
        Command::TxStatus { reference } => commands::tx_status::run(reference),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout stays a single JSON document.
fn init_logging() {
    use tracing::Level;

    let logging = AppConfig::load(LoadOptions::default())
        .map(|config| config.logging)
        .unwrap_or_else(|_| AppConfig::default().logging);
    let log_level = logging.level.parse::<Level>().unwrap_or(Level::INFO);

    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}
