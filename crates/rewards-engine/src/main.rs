//! Rewards engine service and operator CLI
//!
//! `run` starts the accrual keeper; the other subcommands perform one
//! operation against the configured state store and exit.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rewards_core::{Address, PositionId, SettlementEvent};
use rewards_engine::signer::ClaimSigningKey;
use rewards_engine::{create_example_config, EngineConfig, RewardsEngine};

#[derive(Parser, Debug)]
#[command(name = "rewards-engine")]
#[command(about = "Liquidity-mining reward accrual and claim authorization service")]
#[command(version)]
struct Cli {
    /// Path to engine configuration file
    #[arg(short, long, default_value = "rewards.toml", global = true)]
    config: PathBuf,

    /// Override log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the accrual keeper until interrupted
    Run,

    /// Commit every elapsed period once and exit
    ProcessPeriods,

    /// Print the treasury snapshot
    Snapshot,

    /// Print a user's claim state
    User {
        address: Address,
    },

    /// Enroll a position in the program
    RegisterPosition {
        position_id: String,
        owner: Address,
        /// RFC 3339 enrollment time, defaults to now
        #[arg(long)]
        enrolled_at: Option<DateTime<Utc>>,
    },

    /// Issue a signed claim authorization
    IssueClaim {
        user: Address,
    },

    /// Record an on-chain claim settlement
    Settle {
        user: Address,
        amount: Decimal,
        nonce: u64,
        tx_hash: String,
    },

    /// Propose a new calculator signing key
    ProposeRotation {
        key_id: String,
    },

    /// Activate the pending signing key once its delay has passed
    ActivateRotation,

    /// Drop the pending signing key
    CancelRotation,

    /// Write a new random signing seed
    GenerateKey {
        path: PathBuf,
    },

    /// Write an example configuration file
    InitConfig {
        #[arg(short, long, default_value = "rewards.toml")]
        output: PathBuf,
    },

    /// Validate the configuration and exit
    ValidateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that work without a configuration file
    match &cli.command {
        Commands::InitConfig { output } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), false)?;
            create_example_config(output).with_context(|| format!("writing {}", output.display()))?;
            info!("Example configuration written to {}", output.display());
            return Ok(());
        }
        Commands::GenerateKey { path } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), false)?;
            let key = ClaimSigningKey::generate_seed_file(path)?;
            println!("{}", hex::encode(key.verifying_key().to_bytes()));
            return Ok(());
        }
        _ => {}
    }

    let mut config = EngineConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(log_level) = cli.log_level {
        config.monitoring.log_level = log_level;
    }
    init_logging(&config.monitoring.log_level, config.monitoring.structured_logging)?;

    config.validate()?;
    if let Commands::ValidateConfig = cli.command {
        info!("Configuration is valid");
        return Ok(());
    }

    let base_dir = config_dir(&cli.config);
    let engine = RewardsEngine::from_config(config, &base_dir)?;

    match cli.command {
        Commands::Run => {
            info!("Starting rewards engine");
            engine
                .keeper()
                .run(async {
                    if let Err(e) = signal::ctrl_c().await {
                        warn!("Failed to listen for shutdown signal: {}", e);
                    }
                    info!("Received shutdown signal");
                })
                .await;
            info!("Rewards engine stopped");
        }
        Commands::ProcessPeriods => {
            let reports = engine.keeper().process_pending_periods().await?;
            for report in &reports {
                println!(
                    "period {}: {} records, requested {}, granted {}{}",
                    report.commit.period_index,
                    report.commit.records,
                    report.commit.requested,
                    report.commit.granted,
                    if report.commit.truncation_factor.is_some() { " (truncated)" } else { "" }
                );
            }
            if reports.is_empty() {
                println!("no elapsed periods to commit");
            }
        }
        Commands::Snapshot => print_json(&engine.snapshot())?,
        Commands::User { address } => match engine.ledger().user_state(&address) {
            Some(state) => print_json(&state)?,
            None => println!("no claim state for {}", address),
        },
        Commands::RegisterPosition {
            position_id,
            owner,
            enrolled_at,
        } => {
            let enrollment = engine
                .keeper()
                .register_position(PositionId::new(position_id), owner, enrolled_at)?;
            print_json(&enrollment)?;
        }
        Commands::IssueClaim { user } => {
            let authorization = engine.claims().issue_claim_authorization(user).await?;
            print_json(&authorization)?;
        }
        Commands::Settle {
            user,
            amount,
            nonce,
            tx_hash,
        } => {
            let outcome = engine
                .claims()
                .on_claim_settled(SettlementEvent {
                    user,
                    amount,
                    nonce,
                    tx_hash,
                })
                .await?;
            println!("{:?}", outcome);
        }
        Commands::ProposeRotation { key_id } => {
            let activation = engine.claims().propose_signing_key_rotation(&key_id)?;
            println!("key {} can be activated at {}", key_id, activation);
        }
        Commands::ActivateRotation => print_json(&engine.claims().activate_pending_key()?)?,
        Commands::CancelRotation => {
            let cancelled = engine.claims().cancel_pending_rotation()?;
            println!("cancelled rotation to {}", cancelled);
        }
        Commands::InitConfig { .. } | Commands::GenerateKey { .. } | Commands::ValidateConfig => {}
    }

    Ok(())
}

fn config_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging(log_level: &str, structured: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rewards_engine={},rewards_core={},security=info", log_level, log_level).into());

    if structured {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
    }

    Ok(())
}
