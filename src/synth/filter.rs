//! Per-voice biquad filter
//!
//! RBJ cookbook responses in transposed direct form II. Cutoff and Q are
//! pushed in at control rate by the voice, so coefficients are only
//! recomputed when either one moves.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Lowest cutoff the filter accepts
pub const MIN_CUTOFF: f64 = 20.0;
/// Highest cutoff as a fraction of the sample rate
const MAX_CUTOFF_RATIO: f64 = 0.45;
const MIN_Q: f64 = 0.1;
const MAX_Q: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    #[default]
    LowPass,
    HighPass,
    BandPass,
    Notch,
}

/// Normalized coefficients (a0 = 1)
#[derive(Debug, Clone, Copy, PartialEq)]
struct Biquad {
    b: [f64; 3],
    a: [f64; 2],
}

impl Biquad {
    fn design(filter_type: FilterType, cutoff: f64, q: f64, sample_rate: f64) -> Self {
        let w0 = 2.0 * PI * cutoff / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);

        let b = match filter_type {
            FilterType::LowPass => {
                let edge = (1.0 - cos) / 2.0;
                [edge, 1.0 - cos, edge]
            }
            FilterType::HighPass => {
                let edge = (1.0 + cos) / 2.0;
                [edge, -(1.0 + cos), edge]
            }
            FilterType::BandPass => [alpha, 0.0, -alpha],
            FilterType::Notch => [1.0, -2.0 * cos, 1.0],
        };
        // Every response shares the same denominator
        let a0 = 1.0 + alpha;

        Self {
            b: b.map(|coeff| coeff / a0),
            a: [-2.0 * cos / a0, (1.0 - alpha) / a0],
        }
    }
}

pub struct Filter {
    filter_type: FilterType,
    sample_rate: f64,
    cutoff: f64,
    q: f64,
    coeffs: Biquad,
    state: [f64; 2],
}

impl Filter {
    pub fn new(sample_rate: f64, filter_type: FilterType, cutoff: f64, q: f64) -> Self {
        let cutoff = clamp_cutoff(cutoff, sample_rate);
        let q = q.clamp(MIN_Q, MAX_Q);
        Self {
            filter_type,
            sample_rate,
            cutoff,
            q,
            coeffs: Biquad::design(filter_type, cutoff, q, sample_rate),
            state: [0.0; 2],
        }
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    pub fn q(&self) -> f64 {
        self.q
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    /// Move cutoff and Q, clamped to a stable range
    pub fn set_params(&mut self, cutoff: f64, q: f64) {
        let cutoff = clamp_cutoff(cutoff, self.sample_rate);
        let q = q.clamp(MIN_Q, MAX_Q);
        if cutoff == self.cutoff && q == self.q {
            return;
        }
        self.cutoff = cutoff;
        self.q = q;
        self.redesign();
    }

    /// Switch response; the signal history is kept
    pub fn set_type(&mut self, filter_type: FilterType) {
        if filter_type != self.filter_type {
            self.filter_type = filter_type;
            self.redesign();
        }
    }

    pub fn reset(&mut self) {
        self.state = [0.0; 2];
    }

    pub fn process(&mut self, input: f64) -> f64 {
        let Biquad { b, a } = self.coeffs;
        let output = b[0] * input + self.state[0];
        self.state[0] = b[1] * input - a[0] * output + self.state[1];
        self.state[1] = b[2] * input - a[1] * output;
        output
    }

    fn redesign(&mut self) {
        self.coeffs = Biquad::design(self.filter_type, self.cutoff, self.q, self.sample_rate);
    }
}

fn clamp_cutoff(cutoff: f64, sample_rate: f64) -> f64 {
    cutoff.clamp(MIN_CUTOFF, sample_rate * MAX_CUTOFF_RATIO)
}
