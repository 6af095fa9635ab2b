use std::{fs, path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use fund_ledger::{
    config::{self, SessionConfig},
    session::{Script, Session, Step},
    units::{format_units, parse_units, NATIVE_DECIMALS},
};

#[derive(Parser)]
#[command(name = "fundctl", version, about = "Replay token ledger and donation escrow operations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply every step of a JSON script and print one result line per step
    Run {
        script: PathBuf,
        /// Session config; overrides the config embedded in the script
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print the final token and escrow snapshots
        #[arg(long)]
        snapshot: bool,
    },
    /// Print a sample script exercising both ledgers
    Sample,
    /// Convert between human-readable amounts and base units
    Units {
        #[command(subcommand)]
        action: UnitsAction,
    },
}

#[derive(Subcommand)]
enum UnitsAction {
    /// "1.5" -> base units
    Parse {
        value: String,
        #[arg(long, default_value_t = NATIVE_DECIMALS)]
        decimals: u8,
    },
    /// base units -> "1.5"
    Format {
        value: u128,
        #[arg(long, default_value_t = NATIVE_DECIMALS)]
        decimals: u8,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_cmd(script_path: PathBuf, config_path: Option<PathBuf>, snapshot: bool) -> Result<ExitCode> {
    let raw = fs::read(&script_path)
        .with_context(|| format!("reading script {}", script_path.display()))?;
    let script: Script = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing script {}", script_path.display()))?;
    let config = match config_path {
        Some(path) => config::load(&path)?,
        None => script.config.clone().unwrap_or_default(),
    };

    let mut session = Session::new(&config).context("starting session")?;
    let mut failures = 0usize;
    for (index, result) in session.run(&script.steps).into_iter().enumerate() {
        let line = match result {
            Ok(outcome) => json!({ "step": index, "status": "ok", "outcome": outcome }),
            Err(err) => {
                failures += 1;
                tracing::warn!(step = index, error = %err, "step failed");
                json!({ "step": index, "status": "error", "error": err.to_string() })
            }
        };
        println!("{line}");
    }

    if snapshot {
        println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
    }
    tracing::info!(steps = script.steps.len(), failures, "script finished");
    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn sample_script() -> Script {
    let one = 1_000_000_000_000_000_000u128;
    Script {
        config: Some(SessionConfig::default()),
        steps: vec![
            Step::Transfer {
                caller: "deployer".into(),
                to: "alice".into(),
                amount: one,
            },
            Step::Approve {
                caller: "alice".into(),
                spender: "bob".into(),
                amount: one / 2,
            },
            Step::TransferFrom {
                caller: "bob".into(),
                from: "alice".into(),
                to: "bob".into(),
                amount: one / 2,
            },
            Step::CreateAccount {
                caller: "deployer".into(),
                receiver: "0x1234567890123456789012345678901234567890".into(),
                description: "Test Foundation".into(),
                amount: one,
            },
            Step::Donate {
                caller: "alice".into(),
                account: "#1".into(),
                amount: one,
            },
            Step::Deposit {
                caller: "bob".into(),
                account: "#1".into(),
                amount: one,
            },
            Step::Release {
                caller: "deployer".into(),
                account: "#1".into(),
                amount: 2 * one,
            },
            Step::UpdateDescription {
                caller: "deployer".into(),
                account: "#1".into(),
                description: "hello world".into(),
            },
        ],
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run {
            script,
            config,
            snapshot,
        } => run_cmd(script, config, snapshot),
        Command::Sample => serde_json::to_string_pretty(&sample_script())
            .map(|text| {
                println!("{text}");
                ExitCode::SUCCESS
            })
            .map_err(Into::into),
        Command::Units { action } => match action {
            UnitsAction::Parse { value, decimals } => parse_units(&value, decimals)
                .map(|units| {
                    println!("{units}");
                    ExitCode::SUCCESS
                })
                .map_err(Into::into),
            UnitsAction::Format { value, decimals } => {
                println!("{}", format_units(value, decimals));
                Ok(ExitCode::SUCCESS)
            }
        },
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}
