//! Kaspa Guardian operator CLI.
//!
//! ```bash
//! kaspa-guardian init --beneficiary <addr>  # write a template config.json
//! kaspa-guardian heartbeat <key>         # record liveness
//! kaspa-guardian status                  # liveness + chain snapshot
//! kaspa-guardian execute --dry-run       # show the claim without sending it
//! kaspa-guardian monitor                 # run the timeout monitor
//! kaspa-guardian serve                   # HTTP control surface + monitor
//! ```
//!
//! Requires kaspad with `--rpclisten-borsh` and `--utxoindex` for any command
//! that touches the chain.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kaspa_guardian::config::GuardianConfig;
use kaspa_guardian::monitor::TimeoutMonitor;
use kaspa_guardian::pipeline::{ExecuteOptions, GuardianContext};
use kaspa_guardian::store::{CONFIG_FILE, FileStore, GuardianStore};
use kaspa_guardian::{api, init_tracing};

#[derive(Parser)]
#[command(name = "kaspa-guardian")]
#[command(about = "Dead-man switch for Kaspa covenant funds", long_about = None)]
struct Cli {
    /// Directory holding config.json, heartbeat.json and claim.json
    #[arg(short, long, env = "GUARDIAN_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a template config
    Init {
        /// Address the claim pays out to
        #[arg(long)]
        beneficiary: String,
        /// Heartbeat key; a random one is generated when omitted
        #[arg(long)]
        heartbeat_key: Option<String>,
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
    /// Record a heartbeat
    Heartbeat { key: String },
    /// Print liveness and chain status
    Status,
    /// Claim the covenant funds for the beneficiary
    Execute {
        #[arg(long)]
        dry_run: bool,
        /// Re-attempt a claim whose previous submission failed
        #[arg(long)]
        retry_failed: bool,
    },
    /// Run the timeout monitor until Ctrl-C
    Monitor,
    /// Serve the HTTP control surface with the monitor alongside
    Serve {
        #[arg(short, long, env = "GUARDIAN_LISTEN", default_value = "127.0.0.1:3000")]
        listen: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            beneficiary,
            heartbeat_key,
            force,
        } => {
            let store = FileStore::new(&cli.data_dir);
            if cli.data_dir.join(CONFIG_FILE).exists() && !force {
                return Err(format!(
                    "{} already exists in {}; pass --force to overwrite",
                    CONFIG_FILE,
                    cli.data_dir.display()
                )
                .into());
            }
            let key = heartbeat_key.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
            let config = GuardianConfig::template(key.clone(), beneficiary);
            config.validate()?;
            store.save_config(&config)?;
            println!("Wrote {}", cli.data_dir.join(CONFIG_FILE).display());
            println!("Heartbeat key: {key}");
            println!("Fill in contract.address, contract.scriptHash, and contract.redeemScript or");
            println!("contract.artifact before starting the monitor.");
        }
        Commands::Heartbeat { key } => {
            let store = FileStore::new(&cli.data_dir);
            let clock = kaspa_guardian::clock::SystemClock;
            let record = kaspa_guardian::heartbeat::HeartbeatGateway::new(&store, &clock).beat(&key)?;
            println!("Heartbeat recorded: {}", record.iso_date);
        }
        Commands::Status => {
            let ctx = GuardianContext::connect(&cli.data_dir).await?;
            let snapshot = ctx.status().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Execute {
            dry_run,
            retry_failed,
        } => {
            let ctx = GuardianContext::connect(&cli.data_dir).await?;
            let key = ctx.store.require_config()?.owner.heartbeat_key;
            let resp = ctx
                .execute(
                    &key,
                    ExecuteOptions {
                        dry_run,
                        retry_failed,
                    },
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        Commands::Monitor => {
            let ctx = GuardianContext::connect(&cli.data_dir).await?;
            let interval = ctx.store.require_config()?.timing.check_interval_seconds;
            let handle = TimeoutMonitor::new(ctx).start(Duration::from_secs(interval.max(1)));
            tokio::signal::ctrl_c().await?;
            handle.abort();
            tracing::info!("monitor stopped");
        }
        Commands::Serve { listen } => {
            let ctx = GuardianContext::connect(&cli.data_dir).await?;
            api::serve(ctx, &listen).await?;
        }
    }

    Ok(())
}
