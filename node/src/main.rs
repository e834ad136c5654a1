mod logging;

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use chain::{
    Simulation, SimulationConfig,
    state::{block::Block, ledger::Ledger},
    stats::StatsSnapshot,
};
use clap::{Args, Parser, Subcommand};
use slog::Logger;

#[derive(Parser)]
#[command(name = "deichain", about = "DEIChain proof-of-work network simulator", version)]
struct Cli {
    /// Minimum level of log records (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Also append log records to this file
    #[arg(long, global = true, env = "DEICHAIN_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the simulation until the chain is complete or Ctrl+C
    Run {
        #[command(flatten)]
        config: ConfigArgs,
        /// Export the final ledger to this file
        #[arg(long)]
        ledger_out: Option<PathBuf>,
    },
    /// Load and validate a configuration file, then print it
    Check {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Print the blocks of an exported ledger
    Inspect { ledger: PathBuf },
}

#[derive(Args)]
struct ConfigArgs {
    /// Configuration file (.toml, or the four-integer format with --legacy)
    #[arg(long, short, env = "DEICHAIN_CONFIG")]
    config: PathBuf,
    /// Read `NUM_MINERS POOL_SIZE TRANSACTIONS_PER_BLOCK BLOCKCHAIN_BLOCKS`
    #[arg(long)]
    legacy: bool,
}

impl ConfigArgs {
    fn load(&self) -> Result<SimulationConfig> {
        let config = if self.legacy {
            SimulationConfig::from_legacy_path(&self.config)
        } else {
            SimulationConfig::from_path(&self.config)
        };
        config.with_context(|| format!("invalid configuration in {}", self.config.display()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { config, ledger_out } => {
            let logger = logging::build_logger(&cli.log_level, cli.log_file.as_deref())?;
            handle_run(&config, ledger_out.as_deref(), logger).await
        }
        Command::Check { config } => handle_check(&config),
        Command::Inspect { ledger } => handle_inspect(&ledger),
    }
}

async fn handle_run(args: &ConfigArgs, ledger_out: Option<&Path>, logger: Logger) -> Result<()> {
    let config = args.load()?;
    let report_every = Duration::from_secs(config.report_interval_secs);

    let sim = Simulation::start(config, logger.clone()).context("failed to start simulation")?;
    let completion = sim.completion();

    let done = completion.notified();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(done, ctrl_c);

    let mut report = tokio::time::interval(report_every);
    // The first tick completes immediately
    report.tick().await;

    loop {
        tokio::select! {
            _ = &mut done => {
                slog::info!(logger, "Target chain length reached");
                break;
            }
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    slog::error!(logger, "Failed to listen for Ctrl+C"; "error" => %e);
                } else {
                    slog::info!(logger, "Interrupt received, stopping");
                }
                break;
            }
            _ = report.tick() => sim.log_pool_snapshot(),
        }
    }

    let report = tokio::task::spawn_blocking(move || sim.shutdown())
        .await
        .context("shutdown task failed")?;

    print_summary(&report.ledger, &report.stats);

    if let Some(path) = ledger_out {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        report
            .ledger
            .export(BufWriter::new(file))
            .with_context(|| format!("failed to write ledger to {}", path.display()))?;
        println!("ledger written to {}", path.display());
    }
    Ok(())
}

fn handle_check(args: &ConfigArgs) -> Result<()> {
    let config = args.load()?;
    println!("configuration OK");
    println!("producers:        {}", config.num_producers);
    println!("miners:           {}", config.num_miners);
    println!("pool_capacity:    {}", config.pool_capacity);
    println!("tx_per_block:     {}", config.tx_per_block);
    println!("chain_length:     {}", config.chain_length);
    println!("reward:           {}", config.generator.reward);
    println!("interval_ms:      {}", config.generator.interval_ms);
    println!("channel_capacity: {}", config.channel_capacity);
    println!("miner_backoff_ms: {}", config.miner_backoff_ms);
    Ok(())
}

fn handle_inspect(path: &Path) -> Result<()> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let ledger = Ledger::import(BufReader::new(file)).context("invalid ledger file")?;

    println!("blocks:       {}", ledger.len());
    println!("tx_per_block: {}", ledger.tx_per_block());
    for (height, block) in ledger.blocks().iter().enumerate() {
        println!();
        print_block(height as u64 + 1, block);
    }
    Ok(())
}

fn print_block(height: u64, b: &Block) {
    println!("height:        {height}");
    println!("block_id:      {}", b.block_id);
    println!("hash:          {}", b.fingerprint());
    println!("previous_hash: {}", b.previous_block_hash);
    println!("timestamp:     {}", b.timestamp);
    println!("nonce:         {}", b.nonce);
    for tx in b.transactions.iter() {
        println!(
            "  tx {:>16x}  {:>4} -> {:<4}  value {:>3}  reward {}  age {}",
            tx.id, tx.sender_id, tx.receiver_id, tx.value, tx.reward, tx.age
        );
    }
}

fn print_summary(ledger: &Ledger, stats: &StatsSnapshot) {
    println!("blocks in chain:        {}", ledger.len());
    println!("transactions generated: {}", stats.transactions_generated);
    println!("blocks published:       {}", stats.blocks_published);
    println!("blocks accepted:        {}", stats.blocks_accepted);
    println!("rejected (stale):       {}", stats.rejected_stale);
    println!("rejected (conflict):    {}", stats.rejected_conflict);
    println!("rejected (complete):    {}", stats.rejected_complete);
    println!("corrupted records:      {}", stats.corrupted_records);
    println!("pool underflows:        {}", stats.underflows);
    println!("publish failures:       {}", stats.publish_failures);
    if let Some(last) = ledger.last() {
        println!("tip:                    {}", last.fingerprint());
    }
}
