// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ribsnapd: periodic RIB/BGP table snapshots, diffs, and churn metrics.

use anyhow::Context;
use clap::{Parser, Subcommand};
use collector::Collector;
use rs_common::log::init_logger;
use rs_common::println_nopipe;
use slog::{info, o};
use snapdb::Store;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;

mod api;
mod config;
mod error;
mod inventory;
mod metrics;
mod scheduler;

use config::Config;
use metrics::Metrics;
use scheduler::CycleContext;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the snapshot poller daemon.
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Run exactly one cycle, print a JSON report, and exit.
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Address to listen on for the read API and metrics endpoint.
    #[arg(long, default_value_t = Ipv6Addr::UNSPECIFIED.into())]
    listen_addr: IpAddr,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    match args.command {
        Commands::Run(run_args) => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("build tokio runtime")?
            .block_on(run(run_args)),
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let log = init_logger();
    let config = Config::from_env()?;

    let store = Store::new(&config.snapdir, log.new(o!("unit" => "store")));
    let metrics = Arc::new(Metrics::new().context("build metrics registry")?);

    let mut collector = Collector::new(log.new(o!("unit" => "collector")));
    if config.use_nxapi {
        collector = collector.with_nxapi(config.nxapi.clone());
    }

    let ctx = Arc::new(CycleContext {
        store: store.clone(),
        collector,
        metrics: metrics.clone(),
        log: log.new(o!("unit" => "scheduler")),
    });

    if args.once {
        let devices = inventory::fetch(&config, &log).await?;
        let reports =
            scheduler::run_cycle(ctx, devices, config.cycle_deadline())
                .await;
        println_nopipe!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    info!(
        log,
        "starting ribsnapd";
        "snapdir" => %config.snapdir.display(),
        "interval_s" => config.poll_interval.as_secs(),
    );

    metrics::start_server(log.clone(), config.prom_port, metrics)
        .map_err(anyhow::Error::msg)?;

    let api_context = Arc::new(api::HandlerContext {
        store,
        log: log.clone(),
    });
    api::start_server(
        log.clone(),
        args.listen_addr,
        config.api_port,
        api_context,
    )
    .map_err(anyhow::Error::msg)?;

    scheduler::run_forever(ctx, config).await;
    unreachable!("scheduler loop never returns");
}
