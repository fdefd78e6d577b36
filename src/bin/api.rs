//! Guardian daemon: HTTP control surface plus the background timeout monitor.
//!
//! Usage:
//!   cargo run --bin api -- --data-dir ./guardian --listen 0.0.0.0:3000
//!
//! Requires:
//!   - kaspad running with --rpclisten-borsh and --utxoindex (endpoint in
//!     config.json `node.rpcUrl`)

use std::path::PathBuf;

use clap::Parser;
use kaspa_guardian::pipeline::GuardianContext;
use kaspa_guardian::{api, init_tracing};

#[derive(Parser)]
#[command(name = "api")]
#[command(about = "Kaspa Guardian HTTP daemon", long_about = None)]
struct Args {
    #[arg(short, long, env = "GUARDIAN_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    #[arg(short, long, env = "GUARDIAN_LISTEN", default_value = "0.0.0.0:3000")]
    listen: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %args.data_dir.display(),
        "kaspa-guardian daemon starting"
    );

    let ctx = GuardianContext::connect(&args.data_dir).await?;
    match ctx.status().await {
        Ok(s) => tracing::info!(
            status = ?s.status,
            chain_available = s.chain.available,
            contract = s.contract.as_deref().unwrap_or("none"),
            "initial state"
        ),
        Err(e) => tracing::warn!(error = %e, "no usable config yet; POST /update or run `kaspa-guardian init`"),
    }

    api::serve(ctx, &args.listen).await
}
