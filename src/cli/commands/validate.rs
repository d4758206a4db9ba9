//! `validate` command
//!
//! Loads each configuration file through the full pipeline and reports
//! errors and warnings without contacting any service.

use std::path::Path;

use serde_json::json;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::{ConfigLoader, LoadResult};
use crate::error::{ConfigError, Severity, TestudoError, ValidationIssue};

/// Validates every file; fails on the first invalid one after reporting all.
///
/// # Errors
///
/// Returns the first file's [`ConfigError`], or a validation error built
/// from warnings when `--strict` is set.
pub fn run(args: &ValidateArgs) -> Result<(), TestudoError> {
    let loader = ConfigLoader::default();
    let mut first_error: Option<ConfigError> = None;

    for path in &args.files {
        tracing::info!(file = %path.display(), "validating configuration");
        let outcome = loader
            .load(path)
            .and_then(|loaded| check_strict(path, loaded, args.strict));
        report(path, &outcome, args.format);
        if let Err(e) = outcome {
            first_error.get_or_insert(e);
        }
    }

    first_error.map_or(Ok(()), |e| Err(e.into()))
}

fn check_strict(path: &Path, loaded: LoadResult, strict: bool) -> Result<LoadResult, ConfigError> {
    if !strict || loaded.warnings.is_empty() {
        return Ok(loaded);
    }
    Err(ConfigError::ValidationError {
        path: path.display().to_string(),
        errors: loaded
            .warnings
            .iter()
            .map(|w| ValidationIssue {
                path: w.location.clone().unwrap_or_default(),
                message: w.message.clone(),
                severity: Severity::Error,
            })
            .collect(),
    })
}

fn report(path: &Path, outcome: &Result<LoadResult, ConfigError>, format: OutputFormat) {
    match format {
        OutputFormat::Human => match outcome {
            Ok(loaded) => {
                println!("{}: valid", path.display());
                for w in &loaded.warnings {
                    println!(
                        "  warning: {} at {}",
                        w.message,
                        w.location.as_deref().unwrap_or("<unknown>")
                    );
                }
            }
            Err(ConfigError::ValidationError { errors, .. }) => {
                println!("{}: invalid", path.display());
                for issue in errors {
                    println!("  {issue}");
                }
            }
            Err(e) => println!("{}: {e}", path.display()),
        },
        OutputFormat::Json => {
            let value = match outcome {
                Ok(loaded) => json!({
                    "file": path.display().to_string(),
                    "valid": true,
                    "phases": loaded.config.phase_sequence(),
                    "warnings": loaded.warnings.iter().map(|w| json!({
                        "message": w.message,
                        "location": w.location,
                    })).collect::<Vec<_>>(),
                }),
                Err(ConfigError::ValidationError { errors, .. }) => json!({
                    "file": path.display().to_string(),
                    "valid": false,
                    "errors": errors.iter().map(|i| json!({
                        "message": i.message,
                        "location": i.path,
                    })).collect::<Vec<_>>(),
                }),
                Err(e) => json!({
                    "file": path.display().to_string(),
                    "valid": false,
                    "errors": [{"message": e.to_string()}],
                }),
            };
            println!("{value}");
        }
    }
}
