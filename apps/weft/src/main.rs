fn main() {
  // Initialize structured logging early
  let root = std::env::var_os(weft_cli::util::daemon_proc::REPO_ROOT_ENV)
    .map(std::path::PathBuf::from)
    .or_else(|| std::env::current_dir().ok())
    .unwrap_or_else(|| std::path::PathBuf::from("."));
  let cfg = weft_core::config::load(Some(&root))
    .unwrap_or_else(|_| weft_core::config::Config::default());
  let log_path = weft_core::adapters::fs::logs_path(&root);
  weft_core::logging::init(&log_path, cfg.log_level);

  weft_cli::run();
}
