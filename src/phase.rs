//! The closed set of assessment phases.
//!
//! [`Phase`] is defined once and shared by configuration, dispatch,
//! orchestration, metrics labels and artifact generation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// One discrete stage of an assessment, delegated to a remote service.
///
/// Declaration order is the canonical order; `Ord` follows it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Phase {
    /// Passive and active information gathering.
    Recon,
    /// Network and service scanning.
    Scan,
    /// Exploitation attempts against discovered services.
    Exploit,
    /// Post-exploitation activity on compromised hosts.
    PostExploit,
}

impl Phase {
    /// Every phase in canonical order.
    pub const ALL: [Self; 4] = [Self::Recon, Self::Scan, Self::Exploit, Self::PostExploit];

    /// Stable identifier used in configuration, file names and wire payloads.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Recon => "recon",
            Self::Scan => "scan",
            Self::Exploit => "exploit",
            Self::PostExploit => "post_exploit",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Recon => "Reconnaissance",
            Self::Scan => "Network scan",
            Self::Exploit => "Exploitation",
            Self::PostExploit => "Post-exploitation",
        }
    }

    /// Endpoint used when the configuration does not name one.
    #[must_use]
    pub const fn default_endpoint(self) -> &'static str {
        match self {
            Self::Recon => "http://testudo-osint:8081",
            Self::Scan => "http://testudo-network:8082",
            Self::Exploit => "http://testudo-exploit:8083",
            Self::PostExploit => "http://testudo-post:8084",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Error returned when a string names no known phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPhase {
    /// The rejected input
    pub input: String,
    /// Closest known identifier, if any is reasonably close
    pub suggestion: Option<&'static str>,
}

impl fmt::Display for UnknownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown phase '{}'", self.input)?;
        if let Some(s) = self.suggestion {
            write!(f, ", did you mean '{s}'?")?;
        }
        Ok(())
    }
}

impl std::error::Error for UnknownPhase {}

impl FromStr for Phase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "recon" | "reconnaissance" => Ok(Self::Recon),
            "scan" => Ok(Self::Scan),
            "exploit" => Ok(Self::Exploit),
            "post_exploit" | "postexploit" => Ok(Self::PostExploit),
            _ => Err(UnknownPhase {
                input: s.to_string(),
                suggestion: suggest(&normalized),
            }),
        }
    }
}

// Accepts the same aliases as `FromStr` and reports near misses.
impl<'de> Deserialize<'de> for Phase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Returns the known phase id closest to `input` by Jaro-Winkler similarity.
fn suggest(input: &str) -> Option<&'static str> {
    Phase::ALL
        .iter()
        .map(|p| (p.id(), strsim::jaro_winkler(input, p.id())))
        .filter(|(_, score)| *score >= 0.8)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(id, _)| id)
}
