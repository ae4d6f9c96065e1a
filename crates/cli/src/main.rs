mod args;
mod config;

use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use splitstitch_core::error::ErrorEnvelope;
use splitstitch_transcoder::scheduler::{Collaborators, Scheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::Args;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = config::from_env();
    if let Some(dir) = &args.work_dir {
        config.work_root = dir.clone();
    }
    if args.job_timeout_secs.is_some() {
        config.job_timeout = args.job_timeout();
    }
    std::fs::create_dir_all(&config.work_root).context("failed to create work root")?;
    info!(work_root = %config.work_root.display(), "configuration loaded");

    let scheduler = Scheduler::new(config.clone(), Collaborators::system(&config));

    // Ctrl-C kills every worker and cleans up
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let started = Instant::now();
    match scheduler.run(&args.request(), cancel).await {
        Ok(report) => {
            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("failed to encode report")?
                );
            } else {
                print!("{}", report.summary());
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let elapsed = started.elapsed();
            error!(
                code = e.code(),
                state = e.run_state().as_str(),
                elapsed_secs = elapsed.as_secs_f64(),
                "{e}"
            );
            if args.json {
                let envelope = ErrorEnvelope::from(&e).with_elapsed(elapsed);
                println!(
                    "{}",
                    serde_json::to_string_pretty(&envelope).context("failed to encode error")?
                );
            }
            Ok(ExitCode::from(e.exit_code()))
        }
    }
}
