//! Synthesis engine for generating audio
//!
//! Contains oscillators, filters, scheduled parameters, voices and the
//! shared output busses.

mod bus;
mod filter;
mod frame;
mod oscillator;
mod param;
mod params;
mod stem;
mod voice;

pub use bus::{FeedbackDelay, Limiter, Reverb, SendBus, DELAY_FEEDBACK, DELAY_TIME, LIMITER_CEILING};
pub use filter::{Filter, FilterType};
pub use frame::Frame;
pub use oscillator::{Oscillator, Waveform};
pub use param::Param;
pub use params::{
    EnvelopeParams, FilterParams, OscillatorParams, VoiceParams, FILTER_ENVELOPE_CEILING, OSCILLATOR_COUNT,
};
pub use stem::StemTap;
pub use voice::{Voice, VoiceState, STOP_MARGIN};
