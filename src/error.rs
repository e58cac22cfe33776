//! Error types for the mapping and voice engine
//!
//! Only structurally invalid configuration is an error. Missing fields,
//! unknown entities and a full voice pool are handled in place.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The rule's input range has zero width, so normalization is undefined
    #[error("mapping rule '{rule}' has a zero-width input range")]
    ZeroWidthInputRange { rule: String },

    #[error("mapping rule '{rule}' is invalid: {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("unknown scale '{0}'")]
    UnknownScale(String),

    #[error("unknown synth parameter '{0}'")]
    UnknownParameter(String),

    #[error("max polyphony must be at least 1, got {0}")]
    InvalidPolyphony(usize),

    #[error("{name} must be between 0.0 and 1.0, got {value}")]
    InvalidGain { name: &'static str, value: f64 },

    #[error("invalid voice parameters: {0}")]
    InvalidVoiceParams(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Check a 0..1 gain level
pub(crate) fn check_gain(name: &'static str, value: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(Error::InvalidGain { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::ZeroWidthInputRange { rule: "alt".to_string() };
        assert_eq!(err.to_string(), "mapping rule 'alt' has a zero-width input range");

        let err = Error::InvalidPolyphony(0);
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_check_gain() {
        assert_eq!(check_gain("master gain", 0.5), Ok(0.5));
        assert!(check_gain("master gain", 1.5).is_err());
        assert!(check_gain("reverb send", -0.1).is_err());
        assert!(check_gain("delay send", f64::NAN).is_err());
    }
}
