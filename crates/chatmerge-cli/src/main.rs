#![forbid(unsafe_code)]

use anyhow::Context;
use chatmerge_core::{Engine, MigrationConfig, RunOptions};
use clap::{ArgAction, Parser};
use std::env;
use std::io;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod output;
mod remote;

use output::{render_report, resolve_output_mode};
use remote::RestStore;

#[derive(Parser, Debug)]
#[command(
    name = "chatmerge",
    version,
    about = "Fold duplicate direct-message chats into one canonical chat per pair",
    long_about = "Fold duplicate direct-message chats into one canonical chat per pair.\n\n\
                  Connection settings come from APPWRITE_* environment variables \
                  (or a TOML file named by CHATMERGE_CONFIG). Runs are safe to repeat."
)]
struct Cli {
    /// Plan only; pass `--dry-run false` to write changes.
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    dry_run: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CHATMERGE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "chatmerge=debug,info"
        } else {
            "chatmerge=info,warn"
        })
    });

    let format = env::var("CHATMERGE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let config = MigrationConfig::from_env().map_err(|err| {
        error!(code = %err.code(), "{err}");
        anyhow::anyhow!("{}: {err}", err.code())
    })?;
    info!(?config, dry_run = cli.dry_run, "configuration loaded");

    let store = RestStore::new(&config).context("failed to set up store client")?;
    let options = RunOptions::from_config(&config, cli.dry_run);

    let report = Engine::new(&store, options).run().map_err(|err| {
        error!(code = %err.code(), "{err}");
        anyhow::Error::new(err)
    })?;
    info!(requests = store.request_count(), "store calls issued");

    let mut stdout = io::stdout().lock();
    render_report(&report, resolve_output_mode(), &mut stdout)
        .context("failed to write report")?;

    Ok(())
}
