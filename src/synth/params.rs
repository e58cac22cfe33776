//! Voice parameter sets
//!
//! Plain data, deserializable from the `voice:` section of the config.

use super::filter::FilterType;
use super::oscillator::Waveform;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Number of oscillator slots per voice
pub const OSCILLATOR_COUNT: usize = 3;

/// Highest frequency the filter envelope can open to
pub const FILTER_ENVELOPE_CEILING: f64 = 20_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OscillatorParams {
    pub waveform: Waveform,
    #[serde(default)]
    pub detune_cents: f64,
    pub mix_gain: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub frequency: f64,
    pub q: f64,
    /// How far the filter envelope opens toward the ceiling (0..1)
    pub envelope_amount: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            filter_type: FilterType::LowPass,
            frequency: 2000.0,
            q: 1.0,
            envelope_amount: 0.3,
        }
    }
}

/// ADSR times in seconds, sustain as a ratio of the peak
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeParams {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl EnvelopeParams {
    pub fn new(attack: f64, decay: f64, sustain: f64, release: f64) -> Self {
        Self { attack, decay, sustain, release }
    }

    fn validate(&self, name: &str) -> Result<()> {
        for (field, value) in [
            ("attack", self.attack),
            ("decay", self.decay),
            ("release", self.release),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidVoiceParams(format!(
                    "{} {} must be a non-negative number of seconds, got {}",
                    name, field, value
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.sustain) {
            return Err(Error::InvalidVoiceParams(format!(
                "{} sustain must be between 0.0 and 1.0, got {}",
                name, self.sustain
            )));
        }
        Ok(())
    }
}

/// Everything a voice needs to know at construction time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceParams {
    pub oscillators: [OscillatorParams; OSCILLATOR_COUNT],
    pub filter: FilterParams,
    pub amp_envelope: EnvelopeParams,
    pub filter_envelope: EnvelopeParams,
    pub gain: f64,
    pub pan: f64,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            oscillators: [
                OscillatorParams {
                    waveform: Waveform::Sawtooth,
                    detune_cents: 0.0,
                    mix_gain: 0.5,
                    enabled: true,
                },
                OscillatorParams {
                    waveform: Waveform::Triangle,
                    detune_cents: -5.0,
                    mix_gain: 0.3,
                    enabled: true,
                },
                OscillatorParams {
                    waveform: Waveform::Sine,
                    detune_cents: 0.0,
                    mix_gain: 0.2,
                    enabled: false,
                },
            ],
            filter: FilterParams::default(),
            amp_envelope: EnvelopeParams::new(2.0, 0.5, 0.7, 4.0),
            filter_envelope: EnvelopeParams::new(1.0, 1.0, 0.5, 3.0),
            gain: 0.6,
            pan: 0.0,
        }
    }
}

impl VoiceParams {
    /// Reject values no voice could render sensibly
    pub fn validate(&self) -> Result<()> {
        self.amp_envelope.validate("amp envelope")?;
        self.filter_envelope.validate("filter envelope")?;

        for (i, osc) in self.oscillators.iter().enumerate() {
            if !osc.detune_cents.is_finite() || !(0.0..=1.0).contains(&osc.mix_gain) {
                return Err(Error::InvalidVoiceParams(format!(
                    "oscillator {} needs finite detune and a mix gain in 0.0..=1.0",
                    i
                )));
            }
        }

        if !(self.filter.frequency > 0.0 && self.filter.frequency.is_finite()) {
            return Err(Error::InvalidVoiceParams(format!(
                "filter frequency must be positive, got {}",
                self.filter.frequency
            )));
        }
        if !(self.filter.q > 0.0 && self.filter.q.is_finite()) {
            return Err(Error::InvalidVoiceParams(format!(
                "filter Q must be positive, got {}",
                self.filter.q
            )));
        }
        if !(0.0..=1.0).contains(&self.filter.envelope_amount) {
            return Err(Error::InvalidVoiceParams(format!(
                "filter envelope amount must be between 0.0 and 1.0, got {}",
                self.filter.envelope_amount
            )));
        }
        if !(0.0..=1.0).contains(&self.gain) {
            return Err(Error::InvalidVoiceParams(format!(
                "gain must be between 0.0 and 1.0, got {}",
                self.gain
            )));
        }
        if !(-1.0..=1.0).contains(&self.pan) {
            return Err(Error::InvalidVoiceParams(format!(
                "pan must be between -1.0 and 1.0, got {}",
                self.pan
            )));
        }
        Ok(())
    }

    /// Peak the filter envelope opens to from the base frequency
    pub fn filter_peak(&self) -> f64 {
        let base = self.filter.frequency;
        base + (FILTER_ENVELOPE_CEILING - base) * self.filter.envelope_amount
    }

    /// Filter frequency held once the filter envelope has decayed
    pub fn filter_sustain(&self) -> f64 {
        let base = self.filter.frequency;
        base + (self.filter_peak() - base) * self.filter_envelope.sustain
    }
}
