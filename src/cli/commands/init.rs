//! `init` command
//!
//! Writes a starter configuration describing the reference deployment.

use crate::cli::args::InitArgs;
use crate::config::AssessmentConfig;
use crate::error::TestudoError;

const HEADER: &str = "\
# Testudo assessment configuration.
#
# Each phase is delegated to the service at `endpoint`; requests go to
# `<endpoint>/execute`. Durations use humantime notation (500ms, 30s, 2m).
# Values may reference environment variables with the usual shell
# brace syntax, including :- defaults and :? required markers.
# The advisory API key is read from the variable named by `api_key_env`.

";

/// Renders the starter configuration.
///
/// # Errors
///
/// Returns a YAML error if serialization fails.
pub fn starter_config() -> Result<String, TestudoError> {
    let body = serde_yaml::to_string(&AssessmentConfig::default())?;
    Ok(format!("{HEADER}{body}"))
}

/// Writes the starter configuration to `args.output`.
///
/// # Errors
///
/// Returns [`TestudoError::Usage`] if the file exists and `--force` was not
/// given, or an I/O error if it cannot be written.
pub fn run(args: &InitArgs) -> Result<(), TestudoError> {
    if args.output.exists() && !args.force {
        return Err(TestudoError::Usage(format!(
            "{} already exists; pass --force to overwrite",
            args.output.display()
        )));
    }
    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&args.output, starter_config()?)?;
    tracing::info!(path = %args.output.display(), "configuration written");
    println!("Wrote {}", args.output.display());
    Ok(())
}
