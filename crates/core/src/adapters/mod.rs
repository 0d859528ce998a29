pub mod fs;
pub mod git;
pub mod process;
