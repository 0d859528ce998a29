use std::path::PathBuf;

use clap::{Args as ClapArgs, CommandFactory, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(version, about = "Weft CLI", long_about = None, bin_name = "weft")]
pub struct Cli {
  #[command(subcommand)]
  pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
  /// Daemon related commands
  Daemon(DaemonArgs),
  /// Create the .weft layout and a default project config
  Init,
  /// Submit, inspect and steer runs
  Run(RunArgs),
  /// Print a run's event timeline
  Events(EventsArgs),
}

#[derive(Debug, ClapArgs)]
pub struct DaemonArgs {
  #[command(subcommand)]
  pub command: DaemonSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum DaemonSubcommand {
  /// Show daemon status
  Status,
  /// Start the daemon
  Start,
  /// Stop the daemon
  Stop,
  /// Run the daemon (foreground)
  Run,
  /// Restart the daemon
  Restart,
}

#[derive(Debug, ClapArgs)]
pub struct RunArgs {
  #[command(subcommand)]
  pub command: RunSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum RunSubcommand {
  /// Create a run from a JSON run package (`-` reads stdin)
  Submit(SubmitArgs),
  /// List runs, newest first
  List,
  /// Show a run with its records and lanes
  Show(RunRef),
  /// Cancel a run
  Cancel(CancelArgs),
  /// Mark a run completed or failed
  Finish(FinishArgs),
  /// Merge queued lanes into the integration branch
  Merge(RunRef),
}

#[derive(Debug, ClapArgs)]
pub struct SubmitArgs {
  /// Path to the run package
  pub package: PathBuf,
}

#[derive(Debug, ClapArgs)]
pub struct RunRef {
  /// Run id
  pub run_id: String,
}

#[derive(Debug, ClapArgs)]
pub struct CancelArgs {
  pub run_id: String,
  #[arg(long)]
  pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FinishStatus {
  Completed,
  Failed,
}

#[derive(Debug, ClapArgs)]
pub struct FinishArgs {
  pub run_id: String,
  #[arg(long, value_enum, default_value = "completed")]
  pub status: FinishStatus,
  #[arg(long)]
  pub reason: Option<String>,
}

#[derive(Debug, ClapArgs)]
pub struct EventsArgs {
  /// Run id
  pub run_id: String,
  /// Only show events with a greater id
  #[arg(long, default_value_t = 0)]
  pub after: u64,
  /// Keep streaming live events until the run ends
  #[arg(long, short)]
  pub follow: bool,
}

impl Cli {
  pub fn print_help_and_exit() {
    let mut cmd = Cli::command();
    cmd.print_help().expect("print help");
    println!();
  }
}
