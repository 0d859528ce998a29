pub fn init_project() {
  let root = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
  if !weft_core::adapters::git::is_repository(&root) {
    eprintln!("init failed: {} is not a git repository", root.display());
    std::process::exit(1);
  }
  if let Err(e) = weft_core::adapters::fs::ensure_layout(&root) {
    eprintln!("failed to create .weft layout: {e}");
    std::process::exit(1);
  }
  match weft_core::config::write_default_project_config(&root) {
    Ok(true) => println!("initialized .weft at {}", root.join(".weft").display()),
    Ok(false) => println!("already initialized: {}", root.join(".weft").display()),
    Err(e) => {
      eprintln!("failed to write config: {e}");
      std::process::exit(1);
    }
  }
}
