//! Choosing which configured phases a run attempts.

use crate::config::AssessmentConfig;
use crate::error::ConfigError;
use crate::phase::Phase;

/// Preset phase sets offered on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Mode {
    /// Every configured phase.
    #[default]
    Full,
    /// Reconnaissance only.
    Recon,
    /// Reconnaissance and network scan.
    Network,
    /// Everything up to exploitation.
    Exploit,
}

impl Mode {
    /// Phases the preset asks for; `None` means all configured phases.
    #[must_use]
    pub const fn phases(self) -> Option<&'static [Phase]> {
        match self {
            Self::Full => None,
            Self::Recon => Some(&[Phase::Recon]),
            Self::Network => Some(&[Phase::Recon, Phase::Scan]),
            Self::Exploit => Some(&[Phase::Recon, Phase::Scan, Phase::Exploit]),
        }
    }
}

/// How the run's phases are chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// A preset.
    Mode(Mode),
    /// An explicit subset.
    Phases(Vec<Phase>),
}

impl Default for Selection {
    fn default() -> Self {
        Self::Mode(Mode::Full)
    }
}

/// Resolves `selection` against the configured sequence.
///
/// The result keeps configured order regardless of the order asked for.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] when a requested phase is not
/// configured or the selection is empty.
pub fn select_phases(
    config: &AssessmentConfig,
    selection: &Selection,
) -> Result<Vec<Phase>, ConfigError> {
    let configured = config.phase_sequence();
    let wanted: &[Phase] = match selection {
        Selection::Mode(mode) => match mode.phases() {
            Some(p) => p,
            None => return non_empty(configured),
        },
        Selection::Phases(p) => p,
    };

    if let Some(missing) = wanted.iter().find(|p| !configured.contains(p)) {
        return Err(ConfigError::InvalidValue {
            field: "phases".to_string(),
            value: missing.to_string(),
            expected: format!(
                "one of the configured phases ({})",
                configured
                    .iter()
                    .map(|p| p.id())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        });
    }

    non_empty(
        configured
            .into_iter()
            .filter(|p| wanted.contains(p))
            .collect(),
    )
}

fn non_empty(phases: Vec<Phase>) -> Result<Vec<Phase>, ConfigError> {
    if phases.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "phases".to_string(),
            value: String::new(),
            expected: "at least one phase".to_string(),
        });
    }
    Ok(phases)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_mode_is_configured_sequence() {
        let config = AssessmentConfig::default();
        let phases = select_phases(&config, &Selection::default()).unwrap();
        assert_eq!(phases, Phase::ALL.to_vec());
    }

    #[test]
    fn test_network_mode() {
        let config = AssessmentConfig::default();
        let phases = select_phases(&config, &Selection::Mode(Mode::Network)).unwrap();
        assert_eq!(phases, vec![Phase::Recon, Phase::Scan]);
    }

    #[test]
    fn test_explicit_selection_keeps_configured_order() {
        let config = AssessmentConfig::default();
        let phases = select_phases(
            &config,
            &Selection::Phases(vec![Phase::Exploit, Phase::Recon]),
        )
        .unwrap();
        assert_eq!(phases, vec![Phase::Recon, Phase::Exploit]);
    }

    #[test]
    fn test_unconfigured_phase_is_error() {
        let mut config = AssessmentConfig::default();
        config.phases.retain(|p| p.phase == Phase::Recon);
        let err = select_phases(&config, &Selection::Mode(Mode::Exploit)).unwrap_err();
        assert!(err.to_string().contains("scan"), "{err}");
    }

    #[test]
    fn test_unconfigured_phase_lists_configured_ids() {
        let mut config = AssessmentConfig::default();
        config.phases.retain(|p| matches!(p.phase, Phase::Recon | Phase::Scan));
        let err = select_phases(&config, &Selection::Phases(vec![Phase::Exploit])).unwrap_err();
        assert!(
            err.to_string().contains("one of the configured phases (recon, scan)"),
            "{err}"
        );
    }

    #[test]
    fn test_empty_selection_is_error() {
        let config = AssessmentConfig::default();
        assert!(select_phases(&config, &Selection::Phases(vec![])).is_err());
    }
}
