//! CLI subcommand implementations.

mod clean;
mod init;
mod run;

pub use clean::clean;
pub use init::init;
pub use run::run;
