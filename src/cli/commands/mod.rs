//! CLI command dispatch and handlers
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod attack;
pub mod init;
pub mod phases;
pub mod validate;
pub mod version;

use tokio_util::sync::CancellationToken;

use crate::cli::args::{Cli, Commands};
use crate::error::TestudoError;

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// `cancel` is triggered by the signal handler; only `attack` observes it.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<(), TestudoError> {
    match cli.command {
        Commands::Attack(args) => attack::run(&args, cancel, cli.quiet).await,
        Commands::Validate(args) => validate::run(&args),
        Commands::Init(args) => init::run(&args),
        Commands::Phases(args) => {
            phases::run(&args);
            Ok(())
        }
        Commands::Version(args) => {
            version::run(&args);
            Ok(())
        }
    }
}
