use clap::Parser;
use std::path::PathBuf;
use tiermem::simulator::config::{apply_cli_overrides, dump_config, load_config, validate_config};
use tiermem::simulator::utils::log::{init_log, set_quiet};
use tiermem::simulator::utils::report::{print_dispatcher_records, print_summary};
use tiermem::simulator::Simulator;

/// tiermem - dispatcher between a remapping table, a migration manager and two memory tiers
#[derive(Parser, Debug)]
#[command(name = "tiermem")]
#[command(version = "0.1.0")]
#[command(about = "Tiered memory dispatcher simulator", long_about = None)]
struct Args {
  /// Configuration file layered over the built-in defaults
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Enable step mode (interactive stepping)
  #[arg(short, long)]
  step: bool,

  /// Quiet mode (suppress log messages)
  #[arg(short, long)]
  quiet: bool,

  /// Output trace file path
  #[arg(long, value_name = "FILE")]
  trace_file: Option<String>,

  /// Stop once simulated time passes this tick
  #[arg(long, value_name = "TICKS")]
  max_ticks: Option<u64>,

  /// Print the dispatcher's block/unblock records after the run
  #[arg(long)]
  records: bool,

  /// Print the summary as JSON instead of text
  #[arg(long)]
  json: bool,

  /// Print the effective configuration and exit
  #[arg(long)]
  dump_config: bool,
}

fn main() -> std::io::Result<()> {
  init_log();

  let args = Args::parse();

  let mut config = load_config(args.config.as_deref())?;
  apply_cli_overrides(
    &mut config,
    args.quiet,
    args.step,
    args.trace_file.as_deref(),
    args.max_ticks,
  );
  validate_config(&config)?;

  if args.dump_config {
    print!("{}", dump_config(&config)?);
    return Ok(());
  }

  set_quiet(config.simulation.quiet);

  let mut simulator = Simulator::new(config)?;
  let summary = simulator.run()?;

  if args.json {
    let text = serde_json::to_string_pretty(&summary)
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    println!("{}", text);
  } else {
    print_summary(&summary);
  }
  if args.records {
    print_dispatcher_records(simulator.dispatcher());
  }

  Ok(())
}
