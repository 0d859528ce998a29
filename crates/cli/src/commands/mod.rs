pub mod daemon;
pub mod events;
pub mod init;
pub mod run;
