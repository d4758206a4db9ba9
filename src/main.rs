//! `Testudo` - multi-phase security assessment coordinator

use clap::Parser;
use tokio_util::sync::CancellationToken;

use testudo::cli::args::Cli;
use testudo::cli::commands;
use testudo::error::ExitCode;
use testudo::observability::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        init_logging(cli.log_format, cli.verbose, cli.color);
    }

    let cancel = CancellationToken::new();
    tokio::spawn(handle_signals(cancel.clone()));

    match commands::dispatch(cli, cancel).await {
        Ok(()) => std::process::exit(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

/// First signal cancels at the next phase boundary; a second one exits.
#[cfg(unix)]
async fn handle_signals(cancel: CancellationToken) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(error = %e, "failed to register SIGTERM handler");
            None
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        Some(()) = recv(&mut sigterm) => {}
    }

    cancel.cancel();
    eprintln!("\nStopping after the current phase... (press Ctrl+C again to force)");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => std::process::exit(ExitCode::INTERRUPTED),
        Some(()) = recv(&mut sigterm) => std::process::exit(ExitCode::TERMINATED),
    }
}

#[cfg(unix)]
async fn recv(sig: &mut Option<tokio::signal::unix::Signal>) -> Option<()> {
    match sig {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn handle_signals(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        cancel.cancel();
        eprintln!("\nStopping after the current phase... (press Ctrl+C again to force)");
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(ExitCode::INTERRUPTED);
        }
    }
}
