use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use procswap::common::logging;
use procswap::proc::{self, SystemProcesses};
use procswap::supervisor::{self, Loop};
use procswap::swap::{Swap, SwapProcess};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "procswap")]
#[command(about = "Run processes when any prioritized process is not running", long_about = None)]
struct Args {
    /// A path to a file or directory to scan for priority executables
    #[arg(short = 'p', long = "priority", required = true)]
    priority: Vec<PathBuf>,

    /// A process that will run when no priority executable is running
    #[arg(short = 's', long = "swap", required = true)]
    swap: Vec<PathBuf>,

    /// Ignore a priority executable by name (case insensitive)
    #[arg(short = 'i', long = "ignore")]
    ignore: Vec<String>,

    /// A script that runs once each time any priority starts
    #[arg(long = "priority-script")]
    priority_script: Option<PathBuf>,

    /// A limit to the number of times the loop runs (0 = infinite)
    #[arg(short = 'l', long = "limit", default_value_t = 0)]
    limit: u32,

    /// Time in seconds to wait between polls for running processes
    #[arg(long = "poll-interval", default_value_t = 10)]
    poll_interval: u64,

    /// Disable actions (keyboard inputs)
    #[arg(long = "disable-actions")]
    disable_actions: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose)?;

    info!("starting procswap");

    // Priority executable setup.
    let priorities = proc::list_executables(&args.priority, &args.ignore);
    if priorities.is_empty() {
        warn!("found no priority executables - swap processes will run indefinitely");
    } else {
        info!("found {} priority executables", priorities.len());
    }

    // A swap that is also a priority would fight itself forever.
    if let Err(e) = supervisor::validate_disjoint(&priorities, &args.swap) {
        error!("{e}");
        std::process::exit(1);
    }

    // Swap process setup.
    let swaps: Vec<Box<dyn Swap>> = args
        .swap
        .iter()
        .map(|path| Box::new(SwapProcess::new(path.clone())) as Box<dyn Swap>)
        .collect();
    info!("registered {} swap processes", swaps.len());

    let mut swap_loop = Loop::new(Box::new(SystemProcesses::new()))
        .with_priorities(priorities)
        .with_swaps(swaps)
        .with_limit(args.limit)
        .with_actions_enabled(!args.disable_actions);

    if args.poll_interval > 0 {
        swap_loop = swap_loop.with_poll_interval(args.poll_interval);
    }

    if let Some(script) = args.priority_script {
        info!("registered priority script {}", script.display());
        swap_loop = swap_loop.with_priority_script(script);
    }

    // Runs until the limit is reached, or forever.
    swap_loop.run();

    Ok(())
}
