//! A single polyphonic voice bound to one tracked entity
//!
//! Signal path: three oscillators → biquad filter → amplitude envelope →
//! equal-power pan. Every setter takes a ramp time and schedules a linear
//! ramp on the voice's own clock, which only moves forward in
//! [`Voice::render`].

use super::filter::Filter;
use super::frame::Frame;
use super::oscillator::Oscillator;
use super::param::Param;
use super::params::{VoiceParams, OSCILLATOR_COUNT};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

/// Oscillators are silenced this long after the release ramp ends
pub const STOP_MARGIN: f64 = 0.1;

/// Filter coefficients are recomputed every this many samples
const CONTROL_BLOCK: u32 = 32;

/// Ramp time for parameter-set updates that don't come with one
const UPDATE_RAMP: f64 = 0.05;

const INITIAL_PITCH: f64 = 220.0;

/// Lifecycle stage, derived from the gate and the envelope clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceState {
    /// Constructed, gate never opened
    Idle,
    Attacking,
    Decaying,
    Sustaining,
    Releasing,
    Disposed,
}

pub struct Voice {
    id: String,
    entity_id: String,
    params: VoiceParams,
    sample_rate: f64,
    now: f64,

    oscillators: [Oscillator; OSCILLATOR_COUNT],
    osc_gains: [Param; OSCILLATOR_COUNT],
    pitch: Param,
    filter: Filter,
    cutoff: Param,
    resonance: Param,
    amp: Param,
    pan: Param,

    gate_open: bool,
    active: bool,
    disposed: bool,
    gate_opened_at: Option<f64>,
    /// Bumped by every gate-on; lets schedulers spot a re-gate
    gate_epoch: u64,
    amp_settles_at: f64,
    filter_settles_at: f64,
    stop_at: Option<f64>,

    current_pitch: f64,
    current_filter_freq: f64,
    control_counter: u32,
}

impl Voice {
    /// Create an idle voice. `now` is the audio clock in seconds.
    pub fn new(id: impl Into<String>, entity_id: impl Into<String>, params: VoiceParams, sample_rate: f64, now: f64) -> Self {
        let oscillators = params.oscillators.map(|osc| {
            Oscillator::new(osc.waveform, INITIAL_PITCH, sample_rate).with_detune(osc.detune_cents)
        });
        let osc_gains = params.oscillators.map(|osc| Param::new(osc.mix_gain));

        let filter = Filter::new(sample_rate, params.filter.filter_type, params.filter.frequency, params.filter.q);

        Self {
            id: id.into(),
            entity_id: entity_id.into(),
            sample_rate,
            now,
            oscillators,
            osc_gains,
            pitch: Param::new(INITIAL_PITCH),
            filter,
            cutoff: Param::new(params.filter.frequency),
            resonance: Param::new(params.filter.q),
            amp: Param::new(0.0),
            pan: Param::new(params.pan),
            gate_open: false,
            active: false,
            disposed: false,
            gate_opened_at: None,
            gate_epoch: 0,
            amp_settles_at: now,
            filter_settles_at: now,
            stop_at: None,
            current_pitch: INITIAL_PITCH,
            current_filter_freq: params.filter.frequency,
            control_counter: 0,
            params,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn params(&self) -> &VoiceParams {
        &self.params
    }

    /// Whether the oscillators are running
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_gate_open(&self) -> bool {
        self.gate_open
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn gate_epoch(&self) -> u64 {
        self.gate_epoch
    }

    /// Voice clock in seconds
    pub fn now(&self) -> f64 {
        self.now
    }

    /// Last pitch target in Hz
    pub fn current_pitch(&self) -> f64 {
        self.current_pitch
    }

    /// Last filter frequency target in Hz
    pub fn current_filter_freq(&self) -> f64 {
        self.current_filter_freq
    }

    /// Amplitude envelope level right now
    pub fn current_gain(&self) -> f64 {
        self.amp.value()
    }

    pub fn current_pan(&self) -> f64 {
        self.pan.value()
    }

    /// Time the current release finishes, oscillators included
    pub fn stop_at(&self) -> Option<f64> {
        self.stop_at
    }

    pub fn state(&self) -> VoiceState {
        if self.disposed {
            return VoiceState::Disposed;
        }
        let Some(opened_at) = self.gate_opened_at else {
            return VoiceState::Idle;
        };
        if !self.gate_open {
            return VoiceState::Releasing;
        }

        let elapsed = self.now - opened_at;
        let env = &self.params.amp_envelope;
        if elapsed < env.attack {
            VoiceState::Attacking
        } else if elapsed < env.attack + env.decay {
            VoiceState::Decaying
        } else {
            VoiceState::Sustaining
        }
    }

    /// Open the gate: start the oscillators and run attack then decay on
    /// both envelopes. No-op while already open or after disposal.
    pub fn gate_on(&mut self) {
        if self.gate_open || self.disposed {
            return;
        }
        let now = self.now;
        self.gate_open = true;
        self.active = true;
        self.gate_opened_at = Some(now);
        self.gate_epoch += 1;
        self.stop_at = None;

        for (osc, params) in self.oscillators.iter_mut().zip(&self.params.oscillators) {
            if params.enabled && !osc.is_running() {
                osc.start();
            }
        }

        let amp_env = self.params.amp_envelope;
        let peak = self.params.gain;
        self.amp.cancel_and_hold(now);
        self.amp.linear_ramp_to(peak, now + amp_env.attack);
        self.amp.linear_ramp_to(peak * amp_env.sustain, now + amp_env.attack + amp_env.decay);
        self.amp_settles_at = now + amp_env.attack + amp_env.decay;

        let filter_env = self.params.filter_envelope;
        self.cutoff.cancel_and_hold(now);
        self.cutoff.set_value_at(self.params.filter.frequency, now);
        self.cutoff.linear_ramp_to(self.params.filter_peak(), now + filter_env.attack);
        self.cutoff
            .linear_ramp_to(self.params.filter_sustain(), now + filter_env.attack + filter_env.decay);
        self.filter_settles_at = now + filter_env.attack + filter_env.decay;
    }

    /// Close the gate: ramp amplitude to silence and the filter back to its
    /// base over the release times. No-op while already closed.
    pub fn gate_off(&mut self) {
        if !self.gate_open {
            return;
        }
        let now = self.now;
        self.gate_open = false;

        let release = self.params.amp_envelope.release;
        self.amp.cancel_and_hold(now);
        self.amp.linear_ramp_to(0.0, now + release);
        self.amp_settles_at = now + release;

        let filter_release = self.params.filter_envelope.release;
        self.cutoff.cancel_and_hold(now);
        self.cutoff.linear_ramp_to(self.params.filter.frequency, now + filter_release);
        self.filter_settles_at = now + filter_release;

        self.stop_at = Some(now + release + STOP_MARGIN);
    }

    pub fn set_pitch(&mut self, hz: f64, smooth_time: f64) {
        if !hz.is_finite() || hz <= 0.0 {
            return;
        }
        self.current_pitch = hz;
        self.pitch.ramp_to(hz, self.now, self.now + smooth_time);
    }

    /// Gated: ignored while the gate is closed, deferred until the filter
    /// envelope has settled while it is open
    pub fn set_filter_freq(&mut self, hz: f64, smooth_time: f64) {
        if !self.gate_open || !hz.is_finite() {
            return;
        }
        self.current_filter_freq = hz;
        let start = self.now.max(self.filter_settles_at);
        self.cutoff.ramp_to(hz, self.now, start + smooth_time);
    }

    pub fn set_filter_q(&mut self, q: f64, smooth_time: f64) {
        if !q.is_finite() {
            return;
        }
        self.resonance.ramp_to(q, self.now, self.now + smooth_time);
    }

    /// Gated the same way as [`Voice::set_filter_freq`]
    pub fn set_gain(&mut self, gain: f64, smooth_time: f64) {
        if !self.gate_open || !gain.is_finite() {
            return;
        }
        let start = self.now.max(self.amp_settles_at);
        self.amp.ramp_to(gain.max(0.0), self.now, start + smooth_time);
    }

    pub fn set_pan(&mut self, pan: f64, smooth_time: f64) {
        if !pan.is_finite() {
            return;
        }
        self.pan.ramp_to(pan.clamp(-1.0, 1.0), self.now, self.now + smooth_time);
    }

    /// Mix level of oscillator slot `index` (0..3). Out-of-range slots are ignored.
    pub fn set_osc_gain(&mut self, index: usize, gain: f64, smooth_time: f64) {
        if !gain.is_finite() {
            return;
        }
        if let Some(param) = self.osc_gains.get_mut(index) {
            param.ramp_to(gain.max(0.0), self.now, self.now + smooth_time);
        }
    }

    /// Apply a new parameter set live: waveforms, detune, enabled slots,
    /// mix levels, filter type and Q. Envelope changes take effect at the
    /// next gate transition.
    pub fn update_params(&mut self, params: VoiceParams) {
        let now = self.now;
        for (i, osc_params) in params.oscillators.iter().enumerate() {
            let osc = &mut self.oscillators[i];
            osc.set_waveform(osc_params.waveform);
            osc.set_detune(osc_params.detune_cents);
            if !osc_params.enabled {
                osc.stop();
            } else if self.active && !osc.is_running() {
                osc.start();
            }
            self.osc_gains[i].ramp_to(osc_params.mix_gain, now, now + UPDATE_RAMP);
        }

        self.filter.set_type(params.filter.filter_type);
        self.resonance.ramp_to(params.filter.q, now, now + UPDATE_RAMP);
        self.params = params;
    }

    /// Stop everything. The voice is dead afterwards.
    pub fn dispose(&mut self) {
        for osc in &mut self.oscillators {
            osc.stop();
        }
        self.gate_open = false;
        self.active = false;
        self.disposed = true;
        self.stop_at = None;
        self.amp.reset(0.0, self.now);
    }

    /// Render one stereo frame and advance the voice clock by one sample
    pub fn render(&mut self) -> Frame {
        let now = self.now;
        self.now += 1.0 / self.sample_rate;

        if let Some(stop_at) = self.stop_at {
            if now >= stop_at {
                for osc in &mut self.oscillators {
                    osc.stop();
                }
                self.active = false;
                self.stop_at = None;
            }
        }

        let amp = self.amp.advance(now);
        let pitch = self.pitch.advance(now);
        let pan = self.pan.advance(now);
        let cutoff = self.cutoff.advance(now);
        let q = self.resonance.advance(now);

        if self.control_counter == 0 {
            self.filter.set_params(cutoff, q);
        }
        self.control_counter = (self.control_counter + 1) % CONTROL_BLOCK;

        if !self.active {
            return Frame::SILENT;
        }

        let mut mix = 0.0;
        for (osc, gain) in self.oscillators.iter_mut().zip(self.osc_gains.iter_mut()) {
            osc.set_frequency(pitch);
            let level = gain.advance(now);
            mix += osc.generate() * level;
        }

        let sample = self.filter.process(mix) * amp;

        let angle = (pan + 1.0) * 0.5 * FRAC_PI_2;
        Frame::new(sample * angle.cos(), sample * angle.sin())
    }
}
