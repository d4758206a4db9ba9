//! `phases` command

use serde_json::json;

use crate::cli::args::{OutputFormat, PhasesArgs};
use crate::phase::Phase;

/// Lists every phase with its label and default endpoint.
pub fn run(args: &PhasesArgs) {
    match args.format {
        OutputFormat::Human => {
            for phase in Phase::ALL {
                println!(
                    "{:<14} {:<18} {}",
                    phase.id(),
                    phase.label(),
                    phase.default_endpoint()
                );
            }
        }
        OutputFormat::Json => {
            let list: Vec<_> = Phase::ALL
                .iter()
                .map(|p| {
                    json!({
                        "id": p.id(),
                        "label": p.label(),
                        "default_endpoint": p.default_endpoint(),
                    })
                })
                .collect();
            println!("{}", serde_json::Value::Array(list));
        }
    }
}
