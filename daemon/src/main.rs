mod args;

use crate::args::{Args, SubCommand};
use clap::Parser;
use env_logger::Env;
use patchgate::config;
use patchgate::store::Store;
use patchgate::testinfo;
use patchgate_common::errors::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let logging = match args.verbose {
        0 => "info",
        1 => "patchgate=debug,patchgate_common=debug,patchgate_runner=debug,info",
        2 => "debug",
        _ => "trace",
    };

    env_logger::init_from_env(Env::default().default_filter_or(logging));

    let config = config::load(args.config.as_deref())?;
    let poll_interval = config.schedule.poll_interval();

    match args.subcommand {
        SubCommand::CheckConfig => {
            println!("{:#?}", config);
        }
        SubCommand::Testinfo => {
            let store = Store::open(&args.db)?;
            print!("{}", testinfo::render(&store)?);
        }
        SubCommand::Run => {
            let store = Store::open(&args.db)?;
            let engine = patchgate::setup_engine(&config, store).await?;
            patchgate::run(engine, poll_interval, config.schedule.baseline_interval()).await?;
        }
        SubCommand::Baseline(baseline) => {
            patchgate::check_one_shot(&config, !baseline.no_wait)?;
            let store = Store::open(&args.db)?;
            let mut engine = patchgate::setup_engine(&config, store).await?;
            let job = engine.submit_baseline().await?;
            if !baseline.no_wait {
                patchgate::wait_for_job(&mut engine, job.id, poll_interval).await?;
            }
            engine.shutdown().await?;
        }
        SubCommand::Patchwork(patchwork) => {
            patchgate::check_one_shot(&config, patchwork.wait)?;
            let store = Store::open(&args.db)?;
            let mut engine = patchgate::setup_engine(&config, store).await?;
            let summary = engine.ingest().await?;
            info!(
                "Found {} new series, submitted {} builds ({} again), dropped {} expired patches",
                summary.new_series,
                summary.submitted.len(),
                summary.resubmitted,
                summary.dropped
            );
            if patchwork.wait {
                patchgate::wait_for_builds(&mut engine, &summary.submitted, poll_interval).await?;
            }
            engine.shutdown().await?;
        }
        SubCommand::Reconcile => {
            let store = Store::open(&args.db)?;
            let mut engine = patchgate::setup_engine(&config, store).await?;
            let summary = engine.reconcile().await?;
            info!(
                "Reconciled {} jobs, discarded {}, {} still pending, {} failed",
                summary.reconciled, summary.discarded, summary.pending, summary.failed
            );
            engine.shutdown().await?;
        }
    }

    Ok(())
}
