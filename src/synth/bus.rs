//! Shared output busses
//!
//! ```text
//! voices ──┬──────────────────────────┐
//!          ├──→ [reverb send] → reverb ┼──→ (+) → [master gain] → limiter → out
//!          └──→ [delay send]  → delay  ┘
//! ```
//!
//! Sends are linear, so scaling the summed voice signal once is the same as
//! sending each voice separately. Voices never own any of these nodes.

use super::frame::Frame;
use super::param::Param;

/// Feedback delay time in seconds
pub const DELAY_TIME: f64 = 0.4;
pub const DELAY_FEEDBACK: f64 = 0.3;

/// Output ceiling, -1 dBFS
pub const LIMITER_CEILING: f64 = 0.891_250_938_133_745_5;

/// Level changes glide over this long
const LEVEL_RAMP: f64 = 0.05;

/// Comb delays in ms, mutually prime ratios
const COMB_DELAYS_MS: [f64; 4] = [29.7, 37.1, 41.1, 43.7];
const ALLPASS_DELAYS_MS: [f64; 2] = [5.0, 1.7];
/// Right-channel offset in samples for stereo width
const STEREO_SPREAD: usize = 23;

fn ms_to_samples(ms: f64, sample_rate: f64) -> usize {
    ((ms * sample_rate / 1000.0) as usize).max(1)
}

struct Comb {
    buffer: Vec<f64>,
    pos: usize,
    feedback: f64,
    damp: f64,
    filter_state: f64,
}

impl Comb {
    fn new(delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            pos: 0,
            feedback: 0.84,
            damp: 0.2,
            filter_state: 0.0,
        }
    }

    fn process(&mut self, input: f64) -> f64 {
        let output = self.buffer[self.pos];
        // One-pole lowpass in the loop absorbs highs
        self.filter_state = output * (1.0 - self.damp) + self.filter_state * self.damp;
        self.buffer[self.pos] = input + self.filter_state * self.feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }
}

struct Allpass {
    buffer: Vec<f64>,
    pos: usize,
    feedback: f64,
}

impl Allpass {
    fn new(delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            pos: 0,
            feedback: 0.5,
        }
    }

    fn process(&mut self, input: f64) -> f64 {
        let delayed = self.buffer[self.pos];
        let output = -self.feedback * input + delayed;
        self.buffer[self.pos] = input + self.feedback * output;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }
}

/// Schroeder reverb: four parallel combs into two series allpasses
struct ReverbChannel {
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
}

impl ReverbChannel {
    fn new(sample_rate: f64, spread: usize) -> Self {
        Self {
            combs: COMB_DELAYS_MS
                .iter()
                .map(|&ms| Comb::new(ms_to_samples(ms, sample_rate) + spread))
                .collect(),
            allpasses: ALLPASS_DELAYS_MS
                .iter()
                .map(|&ms| Allpass::new(ms_to_samples(ms, sample_rate) + spread))
                .collect(),
        }
    }

    fn process(&mut self, input: f64) -> f64 {
        let mut sum = 0.0;
        for comb in &mut self.combs {
            sum += comb.process(input);
        }
        let mut out = sum / self.combs.len() as f64;
        for allpass in &mut self.allpasses {
            out = allpass.process(out);
        }
        out
    }
}

pub struct Reverb {
    left: ReverbChannel,
    right: ReverbChannel,
}

impl Reverb {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            left: ReverbChannel::new(sample_rate, 0),
            right: ReverbChannel::new(sample_rate, STEREO_SPREAD),
        }
    }

    /// Fully wet output
    pub fn process(&mut self, input: Frame) -> Frame {
        let mono = (input.left + input.right) * 0.5;
        Frame::new(self.left.process(mono), self.right.process(mono))
    }
}

/// Stereo feedback delay
pub struct FeedbackDelay {
    left: Vec<f64>,
    right: Vec<f64>,
    pos: usize,
    feedback: f64,
}

impl FeedbackDelay {
    pub fn new(sample_rate: f64, seconds: f64, feedback: f64) -> Self {
        let len = ((seconds * sample_rate) as usize).max(1);
        Self {
            left: vec![0.0; len],
            right: vec![0.0; len],
            pos: 0,
            feedback: feedback.clamp(0.0, 0.95),
        }
    }

    /// Fully wet output
    pub fn process(&mut self, input: Frame) -> Frame {
        let out = Frame::new(self.left[self.pos], self.right[self.pos]);
        self.left[self.pos] = input.left + out.left * self.feedback;
        self.right[self.pos] = input.right + out.right * self.feedback;
        self.pos = (self.pos + 1) % self.left.len();
        out
    }
}

/// Peak limiter with instant attack and exponential recovery
pub struct Limiter {
    ceiling: f64,
    gain: f64,
    release_coeff: f64,
}

impl Limiter {
    pub fn new(sample_rate: f64, ceiling: f64) -> Self {
        // ~100ms recovery
        let release_coeff = (-1.0 / (0.1 * sample_rate)).exp();
        Self {
            ceiling,
            gain: 1.0,
            release_coeff,
        }
    }

    pub fn process(&mut self, input: Frame) -> Frame {
        let peak = input.peak();
        let wanted = if peak > self.ceiling { self.ceiling / peak } else { 1.0 };

        if wanted < self.gain {
            self.gain = wanted;
        } else {
            self.gain = wanted + (self.gain - wanted) * self.release_coeff;
        }

        let out = input * self.gain;
        // Recovery lag can still overshoot by a hair
        Frame::new(
            out.left.clamp(-self.ceiling, self.ceiling),
            out.right.clamp(-self.ceiling, self.ceiling),
        )
    }
}

/// The shared signal chain every voice feeds into
pub struct SendBus {
    master_gain: Param,
    reverb_send: Param,
    delay_send: Param,
    reverb: Reverb,
    delay: FeedbackDelay,
    limiter: Limiter,
}

impl SendBus {
    pub fn new(sample_rate: f64, master_gain: f64, reverb_send: f64, delay_send: f64) -> Self {
        Self {
            master_gain: Param::new(master_gain),
            reverb_send: Param::new(reverb_send),
            delay_send: Param::new(delay_send),
            reverb: Reverb::new(sample_rate),
            delay: FeedbackDelay::new(sample_rate, DELAY_TIME, DELAY_FEEDBACK),
            limiter: Limiter::new(sample_rate, LIMITER_CEILING),
        }
    }

    pub fn master_gain(&self) -> f64 {
        self.master_gain.target()
    }

    pub fn reverb_send(&self) -> f64 {
        self.reverb_send.target()
    }

    pub fn delay_send(&self) -> f64 {
        self.delay_send.target()
    }

    pub fn set_master_gain(&mut self, gain: f64, now: f64) {
        self.master_gain.ramp_to(gain, now, now + LEVEL_RAMP);
    }

    pub fn set_reverb_send(&mut self, level: f64, now: f64) {
        self.reverb_send.ramp_to(level, now, now + LEVEL_RAMP);
    }

    pub fn set_delay_send(&mut self, level: f64, now: f64) {
        self.delay_send.ramp_to(level, now, now + LEVEL_RAMP);
    }

    /// Mix the summed dry voices with both returns and limit the result
    pub fn process(&mut self, dry: Frame, now: f64) -> Frame {
        let reverb_in = dry * self.reverb_send.advance(now);
        let delay_in = dry * self.delay_send.advance(now);
        let wet = self.reverb.process(reverb_in) + self.delay.process(delay_in);

        let master = self.master_gain.advance(now);
        self.limiter.process((dry + wet) * master)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SR: f64 = 8000.0;

    #[test]
    fn test_delay_echoes_after_delay_time() {
        let mut delay = FeedbackDelay::new(SR, 0.5, 0.5);
        let len = 4000;

        assert_eq!(delay.process(Frame::mono(1.0)), Frame::SILENT);
        for _ in 1..len {
            assert_eq!(delay.process(Frame::SILENT), Frame::SILENT);
        }
        // First echo, then the feedback echo at half level
        assert_eq!(delay.process(Frame::SILENT), Frame::mono(1.0));
        for _ in 1..len {
            delay.process(Frame::SILENT);
        }
        assert_eq!(delay.process(Frame::SILENT), Frame::mono(0.5));
    }

    #[test]
    fn test_reverb_tail_decays() {
        let mut reverb = Reverb::new(SR);
        reverb.process(Frame::mono(1.0));

        let mut early = 0.0f64;
        for _ in 0..(SR as usize / 10) {
            early = early.max(reverb.process(Frame::SILENT).peak());
        }
        let mut late = 0.0f64;
        for _ in 0..(SR as usize * 3) {
            late = reverb.process(Frame::SILENT).peak();
        }
        assert!(early > 0.0);
        assert!(late < early * 0.01, "tail did not decay: {} vs {}", late, early);
    }

    #[test]
    fn test_limiter_holds_ceiling() {
        let mut limiter = Limiter::new(SR, LIMITER_CEILING);
        for i in 0..1000 {
            let level = if i % 2 == 0 { 4.0 } else { -3.0 };
            let out = limiter.process(Frame::new(level, -level));
            assert!(out.peak() <= LIMITER_CEILING + 1e-12);
        }
    }

    #[test]
    fn test_limiter_passes_quiet_signal() {
        let mut limiter = Limiter::new(SR, LIMITER_CEILING);
        let out = limiter.process(Frame::new(0.3, -0.2));
        assert_eq!(out, Frame::new(0.3, -0.2));
    }

    #[test]
    fn test_dry_path_through_master() {
        let mut bus = SendBus::new(SR, 0.5, 0.0, 0.0);
        let out = bus.process(Frame::mono(0.4), 0.0);
        assert_abs_diff_eq!(out.left, 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(out.right, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_level_changes_glide() {
        let mut bus = SendBus::new(SR, 1.0, 0.0, 0.0);
        bus.set_master_gain(0.0, 0.0);
        assert_eq!(bus.master_gain(), 0.0);

        let mid = bus.process(Frame::mono(0.5), LEVEL_RAMP / 2.0);
        assert_abs_diff_eq!(mid.left, 0.25, epsilon = 1e-9);
        let end = bus.process(Frame::mono(0.5), LEVEL_RAMP);
        assert_eq!(end.left, 0.0);
    }
}
