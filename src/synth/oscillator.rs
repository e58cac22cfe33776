//! Basic oscillator implementation

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Waveform types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Triangle,
    #[serde(alias = "saw")]
    Sawtooth,
    Square,
}

/// A phase-accumulating oscillator with a fixed detune offset
pub struct Oscillator {
    waveform: Waveform,
    phase: f64,
    frequency: f64,
    /// Frequency ratio from the detune in cents
    detune_ratio: f64,
    sample_rate: f64,
    running: bool,
}

impl Oscillator {
    /// Create a new (stopped) oscillator
    pub fn new(waveform: Waveform, frequency: f64, sample_rate: f64) -> Self {
        Self {
            waveform,
            phase: 0.0,
            frequency,
            detune_ratio: 1.0,
            sample_rate,
            running: false,
        }
    }

    /// Set the detune in cents
    pub fn with_detune(mut self, cents: f64) -> Self {
        self.set_detune(cents);
        self
    }

    /// Set the base frequency (before detune)
    pub fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
    }

    /// Get the base frequency
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Frequency actually produced, detune included
    pub fn effective_frequency(&self) -> f64 {
        self.frequency * self.detune_ratio
    }

    pub fn set_detune(&mut self, cents: f64) {
        self.detune_ratio = 2.0_f64.powf(cents / 1200.0);
    }

    /// Set the waveform
    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.waveform = waveform;
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    /// Stop and reset the phase
    pub fn stop(&mut self) {
        self.running = false;
        self.phase = 0.0;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Generate the next sample; silent while stopped
    pub fn generate(&mut self) -> f64 {
        if !self.running {
            return 0.0;
        }

        let sample = match self.waveform {
            Waveform::Sine => self.sine(),
            Waveform::Triangle => self.triangle(),
            Waveform::Sawtooth => self.saw(),
            Waveform::Square => self.square(),
        };

        self.phase += self.effective_frequency() / self.sample_rate;
        self.phase -= self.phase.floor();

        sample
    }

    fn sine(&self) -> f64 {
        (self.phase * 2.0 * PI).sin()
    }

    fn triangle(&self) -> f64 {
        let p = self.phase;
        if p < 0.25 {
            4.0 * p
        } else if p < 0.75 {
            2.0 - 4.0 * p
        } else {
            4.0 * p - 4.0
        }
    }

    fn saw(&self) -> f64 {
        2.0 * self.phase - 1.0
    }

    fn square(&self) -> f64 {
        if self.phase < 0.5 { 1.0 } else { -1.0 }
    }
}
