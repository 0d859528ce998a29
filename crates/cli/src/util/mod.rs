pub mod daemon_proc;
pub mod errors;
