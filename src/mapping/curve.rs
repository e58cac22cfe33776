//! Response curves applied to normalized values
//!
//! All curves are monotonic and map 0 to 0 and 1 to 1. They are cheap
//! shaping functions, not perceptual calibrations.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Curve {
    /// Identity (default)
    #[default]
    Linear,
    /// `log10(1 + 9x)`: fast rise, slow finish
    Log,
    /// `x²`: slow start, fast finish
    Exp,
}

impl Curve {
    /// Shape a normalized value
    pub fn apply(&self, normalized: f64) -> f64 {
        match self {
            Curve::Linear => normalized,
            Curve::Log => (1.0 + 9.0 * normalized).log10(),
            Curve::Exp => normalized * normalized,
        }
    }
}
