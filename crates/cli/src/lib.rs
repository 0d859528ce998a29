pub mod args;
pub mod commands;
pub mod render;
pub mod rpc;
pub mod util;

use clap::Parser;

pub fn run() {
  // If no additional args, show help and exit 0
  if std::env::args_os().len() == 1 {
    args::Cli::print_help_and_exit();
    return;
  }

  // Parse arguments; this will also handle --help/--version.
  let cli = args::Cli::parse();
  match cli.command {
    Some(args::Commands::Daemon(daemon)) => match daemon.command {
      args::DaemonSubcommand::Status => commands::daemon::print_status(),
      args::DaemonSubcommand::Start => commands::daemon::start_daemon(),
      args::DaemonSubcommand::Stop => commands::daemon::stop_daemon(),
      args::DaemonSubcommand::Run => commands::daemon::run_daemon_foreground(),
      args::DaemonSubcommand::Restart => commands::daemon::restart_daemon(),
    },
    Some(args::Commands::Init) => commands::init::init_project(),
    Some(args::Commands::Run(run)) => match run.command {
      args::RunSubcommand::Submit(a) => commands::run::submit(a),
      args::RunSubcommand::List => commands::run::list(),
      args::RunSubcommand::Show(a) => commands::run::show(a),
      args::RunSubcommand::Cancel(a) => commands::run::cancel(a),
      args::RunSubcommand::Finish(a) => commands::run::finish(a),
      args::RunSubcommand::Merge(a) => commands::run::merge(a),
    },
    Some(args::Commands::Events(a)) => commands::events::show_events(a),
    None => {
      // No subcommand provided; show help
      args::Cli::print_help_and_exit();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::{CommandFactory, Parser, error::ErrorKind};
  use pretty_assertions::assert_eq;

  #[test]
  fn help_flag_triggers_displayhelp() {
    // Using try_parse_from to capture the help behavior without exiting the process.
    let err = args::Cli::try_parse_from(["weft", "--help"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DisplayHelp);
  }

  #[test]
  fn version_flag_triggers_displayversion() {
    let err = args::Cli::try_parse_from(["weft", "--version"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DisplayVersion);
  }

  #[test]
  fn command_factory_builds() {
    args::Cli::command().debug_assert();
  }

  #[test]
  fn parses_events_follow() {
    let cli = args::Cli::try_parse_from(["weft", "events", "r1", "--after", "4", "-f"]).unwrap();
    match cli.command {
      Some(args::Commands::Events(a)) => {
        assert_eq!(a.run_id, "r1");
        assert_eq!(a.after, 4);
        assert!(a.follow);
      }
      other => panic!("unexpected: {other:?}"),
    }
  }

  #[test]
  fn finish_defaults_to_completed() {
    let cli = args::Cli::try_parse_from(["weft", "run", "finish", "r1"]).unwrap();
    match cli.command {
      Some(args::Commands::Run(args::RunArgs {
        command: args::RunSubcommand::Finish(a),
      })) => {
        assert_eq!(a.status, args::FinishStatus::Completed);
        assert_eq!(a.reason, None);
      }
      other => panic!("unexpected: {other:?}"),
    }
  }

  #[test]
  fn finish_rejects_unknown_status() {
    let err = args::Cli::try_parse_from(["weft", "run", "finish", "r1", "--status", "cancelled"])
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
  }
}
