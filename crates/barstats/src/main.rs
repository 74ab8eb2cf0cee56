//! barstats - samples system stats and triggers a bar event with them.

mod cli;
mod stats;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Args;

fn main() -> Result<()> {
    let args = Args::parse();
    args.validate()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    run(args)
}

#[cfg(target_os = "macos")]
fn run(args: Args) -> Result<()> {
    use std::thread;
    use std::time::Duration;

    use tracing::{debug, info};

    use crate::stats::Sampler;

    info!(bar = %args.bar, event = %args.event, interval = args.interval, "starting");

    let mut sampler = Sampler::new(args.no_units);
    loop {
        let vars = sampler.collect(&args);
        let command = format!("--trigger {} {}", args.event, vars);
        debug!(%command, "pushing sample");
        // An empty reply covers both "delivered" and "bar unreachable";
        // the bar protocol has no error channel, so just keep sampling.
        barlink::send_command(&args.bar, &command);
        thread::sleep(Duration::from_secs(args.interval.into()));
    }
}

#[cfg(not(target_os = "macos"))]
fn run(_args: Args) -> Result<()> {
    anyhow::bail!("barstats talks to the bar over Mach IPC and only runs on macOS");
}
