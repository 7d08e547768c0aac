use std::time::{Duration, Instant};

use anyhow::{ensure, Result};
use clap::Parser;
use log::info;
use mkbp::{sim::Simulator, timing::Timing};

/// Drives the MKBP event queue with a random scan matrix and a polling host.
#[derive(Parser)]
#[command(name = "mkbp-sim", version, about)]
struct Cli {
    /// Matrix scans per second.
    #[arg(long, default_value_t = 100)]
    scan_rate: u64,

    /// Host polls per second.
    #[arg(long, default_value_t = 30)]
    poll_rate: u64,

    /// Maximum reads the host issues per poll.
    #[arg(long, default_value_t = 4)]
    poll_burst: usize,

    /// FIFO depth requested through SET_CONFIG before the run.
    #[arg(long, default_value_t = 100)]
    fifo_depth: u8,

    /// Chance that a scan sees one key change.
    #[arg(long, default_value_t = 0.3)]
    press_chance: f64,

    /// How long to run.
    #[arg(long, default_value_t = 2000)]
    duration_ms: u64,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    ensure!(cli.scan_rate > 0, "--scan-rate must be positive");
    ensure!(cli.poll_rate > 0, "--poll-rate must be positive");
    ensure!(
        (0.0..=1.0).contains(&cli.press_chance),
        "--press-chance must be within 0.0..=1.0"
    );

    let timing = Timing::new(cli.scan_rate, cli.poll_rate);
    let mut sim = Simulator::new(timing, cli.press_chance, cli.poll_burst);
    sim.host_set_depth(cli.fifo_depth)?;

    let deadline = Instant::now() + Duration::from_millis(cli.duration_ms);
    while Instant::now() < deadline {
        sim.handle_update()?;
    }
    info!("Stopping with {} events still queued", sim.pending());
    sim.drain()?;

    let stats = sim.stats();
    println!(
        "scans={} queued={} ignored={} overflows={} reads={}",
        stats.scans, stats.queued, stats.ignored, stats.overflows, stats.reads
    );
    Ok(())
}
