//! Connectivity checks built on the system `ping` utility.

pub mod icmp;

pub use icmp::{ping, PingReport};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("target cannot be empty")]
    Empty,

    #[error("target cannot start with a hyphen")]
    LeadingHyphen,

    #[error("target contains invalid characters")]
    InvalidCharacters,
}

/// Accept hostnames and IPv4/IPv6 literals only, so a target can never be
/// read as an option by the external tool.
pub fn validate_target(target: &str) -> Result<(), TargetError> {
    if target.is_empty() {
        return Err(TargetError::Empty);
    }
    if target.starts_with('-') {
        return Err(TargetError::LeadingHyphen);
    }
    if target
        .chars()
        .any(|c| !c.is_ascii_alphanumeric() && c != '.' && c != '-' && c != ':')
    {
        return Err(TargetError::InvalidCharacters);
    }
    Ok(())
}
