//! Assessment targets and the pluggable validator that admits them.

use std::fmt;
use std::net::IpAddr;

use serde::Serialize;

use crate::error::TargetError;

/// Decides whether a target may be assessed.
///
/// Authorization policy lives behind this trait; the orchestrator only
/// invokes it, once, before any dispatch.
pub trait TargetValidator: Send + Sync {
    /// Returns `Err(reason)` when the target must not be assessed.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason on rejection.
    fn validate(&self, target: &str) -> Result<(), String>;
}

/// A target that passed validation. Immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    /// Validates `raw` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::Rejected`] when the validator refuses it.
    pub fn new(raw: &str, validator: &dyn TargetValidator) -> Result<Self, TargetError> {
        let trimmed = raw.trim();
        validator
            .validate(trimmed)
            .map_err(|reason| TargetError::Rejected {
                target: raw.to_string(),
                reason,
            })?;
        Ok(Self(trimmed.to_string()))
    }

    /// The validated target string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe form used in artifact names.
    ///
    /// Alphanumerics and `-` are kept and `.` becomes `_`. Every other
    /// byte is written as `+hh`, so distinct targets never share a slug.
    #[must_use]
    pub fn slug(&self) -> String {
        let mut slug = String::with_capacity(self.0.len());
        for b in self.0.bytes() {
            match b {
                b'.' => slug.push('_'),
                b'-' => slug.push('-'),
                _ if b.is_ascii_alphanumeric() => slug.push(char::from(b)),
                _ => slug.push_str(&format!("+{b:02x}")),
            }
        }
        slug
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accepts IP literals, CIDR blocks and RFC 1123 host names.
///
/// Everything else is rejected, in particular anything that could break
/// out of a command template once substituted.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostValidator;

impl TargetValidator for HostValidator {
    fn validate(&self, target: &str) -> Result<(), String> {
        if target.is_empty() {
            return Err("target is empty".to_string());
        }
        if target.chars().any(char::is_whitespace) {
            return Err("target contains whitespace".to_string());
        }

        let (host, prefix) = match target.split_once('/') {
            Some((h, p)) => (h, Some(p)),
            None => (target, None),
        };

        if let Ok(ip) = host.parse::<IpAddr>() {
            return match prefix {
                None => Ok(()),
                Some(p) => validate_prefix(p, if ip.is_ipv4() { 32 } else { 128 }),
            };
        }

        if prefix.is_some() {
            return Err("CIDR prefix is only valid on an IP address".to_string());
        }
        validate_hostname(host)
    }
}

fn validate_prefix(prefix: &str, max: u8) -> Result<(), String> {
    match prefix.parse::<u8>() {
        Ok(bits) if bits <= max => Ok(()),
        _ => Err(format!("invalid CIDR prefix '/{prefix}' (expected 0-{max})")),
    }
}

fn validate_hostname(host: &str) -> Result<(), String> {
    if host.len() > 253 {
        return Err("host name longer than 253 characters".to_string());
    }
    let host = host.strip_suffix('.').unwrap_or(host);
    for label in host.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(format!("invalid host name label '{label}'"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!("host name label '{label}' starts or ends with '-'"));
        }
        if let Some(bad) = label.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '-') {
            return Err(format!("host name contains invalid character '{bad}'"));
        }
    }
    Ok(())
}
