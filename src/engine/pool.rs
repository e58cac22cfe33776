//! The voice pool
//!
//! Owns every live voice, keyed by entity, plus the shared busses they feed.
//! Voices are kept in allocation order so the oldest one is first in line to
//! be stolen. Disposal after a release is a deferred task on the audio clock;
//! a gate epoch recorded at release time cancels it if the voice is re-gated.

use crate::error::{check_gain, Error, Result};
use crate::synth::{Frame, SendBus, StemTap, Voice, VoiceParams};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Extra time after the amp release before a voice is freed
pub const DISPOSAL_MARGIN: f64 = 0.2;

pub const DEFAULT_MAX_POLYPHONY: usize = 32;
pub const DEFAULT_MASTER_GAIN: f64 = 0.8;
pub const DEFAULT_REVERB_SEND: f64 = 0.2;
pub const DEFAULT_DELAY_SEND: f64 = 0.15;

/// Lifecycle changes the control side may want to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// Evicted to make room; no release ramp
    Stolen(String),
    /// Freed after its release finished
    Disposed(String),
}

struct Slot {
    voice: Voice,
    tap: StemTap,
}

#[derive(Debug, Clone, Copy)]
struct PendingDisposal {
    key: u64,
    due: f64,
    gate_epoch: u64,
}

/// Bounded polyphonic voice pool with shared send busses
pub struct SynthEngine {
    sample_rate: f64,
    frames: u64,
    now: f64,
    max_polyphony: usize,
    voice_params: VoiceParams,

    slots: BTreeMap<u64, Slot>,
    by_entity: HashMap<String, u64>,
    disposals: HashMap<String, PendingDisposal>,
    next_due: Option<f64>,
    next_key: u64,

    bus: SendBus,
    events: Vec<PoolEvent>,
}

impl SynthEngine {
    /// Create an empty pool with default bus levels
    pub fn new(sample_rate: f64, max_polyphony: usize) -> Result<Self> {
        if max_polyphony == 0 {
            return Err(Error::InvalidPolyphony(max_polyphony));
        }
        Ok(Self {
            sample_rate,
            frames: 0,
            now: 0.0,
            max_polyphony,
            voice_params: VoiceParams::default(),
            slots: BTreeMap::new(),
            by_entity: HashMap::new(),
            disposals: HashMap::new(),
            next_due: None,
            next_key: 1,
            bus: SendBus::new(sample_rate, DEFAULT_MASTER_GAIN, DEFAULT_REVERB_SEND, DEFAULT_DELAY_SEND),
            events: Vec::new(),
        })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Audio clock in seconds
    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn max_polyphony(&self) -> usize {
        self.max_polyphony
    }

    /// Parameters new voices are built with
    pub fn voice_params(&self) -> &VoiceParams {
        &self.voice_params
    }

    /// Return the entity's voice, creating one if needed.
    ///
    /// A full pool evicts its oldest voice first. New voices start with the
    /// gate closed.
    pub fn allocate_voice(&mut self, entity_id: &str) -> &mut Voice {
        let key = match self.by_entity.get(entity_id).copied() {
            Some(key) => key,
            None => self.reserve_slot(entity_id),
        };

        let (sample_rate, now) = (self.sample_rate, self.now);
        let params = &self.voice_params;
        let slot = self.slots.entry(key).or_insert_with(|| Slot {
            voice: Voice::new(voice_id(key), entity_id, params.clone(), sample_rate, now),
            tap: StemTap::new(entity_id),
        });
        &mut slot.voice
    }

    fn reserve_slot(&mut self, entity_id: &str) -> u64 {
        while self.slots.len() >= self.max_polyphony {
            if !self.steal_oldest() {
                break;
            }
        }

        let key = self.next_key;
        self.next_key += 1;
        self.by_entity.insert(entity_id.to_string(), key);
        debug!(entity = entity_id, voice = %voice_id(key), "voice allocated");
        key
    }

    /// Close the entity's gate and schedule disposal once the release has
    /// played out. Unknown entities are ignored.
    pub fn release_voice(&mut self, entity_id: &str) {
        let Some(&key) = self.by_entity.get(entity_id) else {
            debug!(entity = entity_id, "release for unknown entity ignored");
            return;
        };
        let Some(slot) = self.slots.get_mut(&key) else {
            return;
        };

        slot.voice.gate_off();
        let gate_epoch = slot.voice.gate_epoch();
        let due = self.now + slot.voice.params().amp_envelope.release + DISPOSAL_MARGIN;

        // A repeated release keeps the original deadline
        if let Some(existing) = self.disposals.get(entity_id) {
            if existing.key == key && existing.gate_epoch == gate_epoch {
                return;
            }
        }

        self.disposals
            .insert(entity_id.to_string(), PendingDisposal { key, due, gate_epoch });
        self.next_due = Some(self.next_due.map_or(due, |d| d.min(due)));
        debug!(entity = entity_id, due, "voice released");
    }

    /// Release every voice
    pub fn release_all(&mut self) {
        let entities: Vec<String> = self.by_entity.keys().cloned().collect();
        for entity in entities {
            self.release_voice(&entity);
        }
    }

    /// Whether a disposal is scheduled and still valid (not cancelled by a re-gate)
    pub fn is_pending_disposal(&self, entity_id: &str) -> bool {
        let Some(pending) = self.disposals.get(entity_id) else {
            return false;
        };
        self.slots
            .get(&pending.key)
            .is_some_and(|slot| !slot.voice.is_gate_open() && slot.voice.gate_epoch() == pending.gate_epoch)
    }

    pub fn voice(&self, entity_id: &str) -> Option<&Voice> {
        let key = self.by_entity.get(entity_id)?;
        self.slots.get(key).map(|slot| &slot.voice)
    }

    pub fn voice_mut(&mut self, entity_id: &str) -> Option<&mut Voice> {
        let key = self.by_entity.get(entity_id)?;
        self.slots.get_mut(key).map(|slot| &mut slot.voice)
    }

    pub fn has_voice(&self, entity_id: &str) -> bool {
        self.by_entity.contains_key(entity_id)
    }

    /// Live voices, releasing ones included
    pub fn active_voice_count(&self) -> usize {
        self.slots.len()
    }

    /// Voice ids, oldest first
    pub fn voice_ids(&self) -> Vec<String> {
        self.slots.values().map(|slot| slot.voice.id().to_string()).collect()
    }

    /// Every live voice, oldest first
    pub fn voices(&self) -> impl Iterator<Item = &Voice> {
        self.slots.values().map(|slot| &slot.voice)
    }

    /// The entity's isolated output tap
    pub fn get_stem_bus(&self, entity_id: &str) -> Option<StemTap> {
        let key = self.by_entity.get(entity_id)?;
        self.slots.get(key).map(|slot| slot.tap.clone())
    }

    /// Every tap, keyed by entity, oldest voice first
    pub fn get_all_stem_buses(&self) -> Vec<(String, StemTap)> {
        self.slots
            .values()
            .map(|slot| (slot.voice.entity_id().to_string(), slot.tap.clone()))
            .collect()
    }

    /// Lifecycle events since the last call
    pub fn drain_events(&mut self) -> Vec<PoolEvent> {
        std::mem::take(&mut self.events)
    }

    /// Parameters for voices allocated from now on
    pub fn set_voice_params(&mut self, params: VoiceParams) -> Result<()> {
        params.validate()?;
        self.voice_params = params;
        Ok(())
    }

    /// Change the pool size. Shrinking evicts the oldest voices at once.
    pub fn set_max_polyphony(&mut self, max_polyphony: usize) -> Result<()> {
        if max_polyphony == 0 {
            return Err(Error::InvalidPolyphony(max_polyphony));
        }
        self.max_polyphony = max_polyphony;
        while self.slots.len() > max_polyphony {
            if !self.steal_oldest() {
                break;
            }
        }
        Ok(())
    }

    pub fn set_master_gain(&mut self, gain: f64) -> Result<()> {
        let gain = check_gain("master gain", gain)?;
        self.bus.set_master_gain(gain, self.now);
        Ok(())
    }

    pub fn set_reverb_send(&mut self, level: f64) -> Result<()> {
        let level = check_gain("reverb send", level)?;
        self.bus.set_reverb_send(level, self.now);
        Ok(())
    }

    pub fn set_delay_send(&mut self, level: f64) -> Result<()> {
        let level = check_gain("delay send", level)?;
        self.bus.set_delay_send(level, self.now);
        Ok(())
    }

    pub fn master_gain(&self) -> f64 {
        self.bus.master_gain()
    }

    pub fn reverb_send(&self) -> f64 {
        self.bus.reverb_send()
    }

    pub fn delay_send(&self) -> f64 {
        self.bus.delay_send()
    }

    /// Render one output frame and advance the clock
    pub fn process_frame(&mut self) -> Frame {
        let now = self.now;
        if self.next_due.is_some_and(|due| now >= due) {
            self.run_disposals(now);
        }

        let mut dry = Frame::SILENT;
        for slot in self.slots.values_mut() {
            let frame = slot.voice.render();
            slot.tap.push(frame);
            dry += frame;
        }
        let out = self.bus.process(dry, now);

        self.frames += 1;
        self.now = self.frames as f64 / self.sample_rate;
        out
    }

    /// Fill an interleaved buffer. Mono devices get the channel average,
    /// channels past the second are left silent.
    pub fn fill_buffer(&mut self, buffer: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        for chunk in buffer.chunks_mut(channels) {
            let frame = self.process_frame();
            match chunk {
                [mono] => *mono = ((frame.left + frame.right) * 0.5) as f32,
                [left, right, rest @ ..] => {
                    *left = frame.left as f32;
                    *right = frame.right as f32;
                    rest.fill(0.0);
                }
                [] => {}
            }
        }
    }

    /// Render and discard `seconds` of audio
    pub fn advance(&mut self, seconds: f64) {
        let frames = (seconds * self.sample_rate).round() as u64;
        for _ in 0..frames {
            self.process_frame();
        }
    }

    fn run_disposals(&mut self, now: f64) {
        let due: Vec<String> = self
            .disposals
            .iter()
            .filter(|(_, pending)| pending.due <= now)
            .map(|(entity, _)| entity.clone())
            .collect();

        for entity in due {
            let Some(pending) = self.disposals.remove(&entity) else {
                continue;
            };
            let still_released = self
                .slots
                .get(&pending.key)
                .is_some_and(|slot| !slot.voice.is_gate_open() && slot.voice.gate_epoch() == pending.gate_epoch);
            if still_released {
                self.dispose_slot(pending.key);
                self.events.push(PoolEvent::Disposed(entity));
            }
        }

        self.next_due = self.disposals.values().map(|p| p.due).reduce(f64::min);
    }

    /// Hard-stop the oldest voice. Returns false on an empty pool.
    fn steal_oldest(&mut self) -> bool {
        let Some(&key) = self.slots.keys().next() else {
            return false;
        };
        if let Some(entity) = self.dispose_slot(key) {
            self.disposals.remove(&entity);
            debug!(entity = %entity, voice = %voice_id(key), "voice stolen");
            self.events.push(PoolEvent::Stolen(entity));
        }
        true
    }

    fn dispose_slot(&mut self, key: u64) -> Option<String> {
        let mut slot = self.slots.remove(&key)?;
        slot.voice.dispose();
        slot.tap.close();

        let entity = slot.voice.entity_id().to_string();
        if self.by_entity.get(&entity) == Some(&key) {
            self.by_entity.remove(&entity);
        }
        debug!(entity = %entity, voice = slot.voice.id(), "voice disposed");
        Some(entity)
    }
}

fn voice_id(key: u64) -> String {
    format!("v_{}", key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{EnvelopeParams, VoiceState, LIMITER_CEILING};

    const SR: f64 = 1000.0;

    /// Short envelopes so tests don't render minutes of audio
    fn quick_params() -> VoiceParams {
        VoiceParams {
            amp_envelope: EnvelopeParams::new(0.1, 0.1, 0.7, 0.5),
            filter_envelope: EnvelopeParams::new(0.1, 0.1, 0.5, 0.3),
            ..VoiceParams::default()
        }
    }

    fn pool(max: usize) -> SynthEngine {
        let mut pool = SynthEngine::new(SR, max).unwrap();
        pool.set_voice_params(quick_params()).unwrap();
        pool
    }

    #[test]
    fn test_zero_polyphony_rejected() {
        assert!(matches!(SynthEngine::new(SR, 0), Err(Error::InvalidPolyphony(0))));
        let mut pool = pool(2);
        assert!(pool.set_max_polyphony(0).is_err());
        assert_eq!(pool.max_polyphony(), 2);
    }

    #[test]
    fn test_allocate_is_idempotent() {
        let mut pool = pool(4);
        let first = pool.allocate_voice("a").id().to_string();
        let second = pool.allocate_voice("a").id().to_string();
        assert_eq!(first, second);
        assert_eq!(first, "v_1");
        assert_eq!(pool.active_voice_count(), 1);
    }

    #[test]
    fn test_new_voice_is_not_gated() {
        let mut pool = pool(4);
        let voice = pool.allocate_voice("a");
        assert!(!voice.is_gate_open());
        assert_eq!(voice.state(), VoiceState::Idle);
        assert_eq!(voice.entity_id(), "a");
    }

    #[test]
    fn test_stealing_evicts_exactly_the_oldest() {
        let mut pool = pool(2);
        pool.allocate_voice("a").gate_on();
        pool.allocate_voice("b").gate_on();
        let tap_a = pool.get_stem_bus("a").unwrap();

        pool.allocate_voice("c");
        assert_eq!(pool.active_voice_count(), 2);
        assert!(!pool.has_voice("a"));
        assert!(pool.has_voice("b"));
        assert!(pool.has_voice("c"));
        assert_eq!(pool.voice_ids(), vec!["v_2", "v_3"]);
        assert!(tap_a.is_closed());
        assert_eq!(pool.drain_events(), vec![PoolEvent::Stolen("a".to_string())]);
    }

    #[test]
    fn test_occupancy_never_exceeds_max() {
        let mut pool = pool(3);
        for i in 0..20 {
            pool.allocate_voice(&format!("e{}", i)).gate_on();
            assert!(pool.active_voice_count() <= 3);
        }
        assert_eq!(pool.active_voice_count(), 3);
    }

    #[test]
    fn test_release_then_dispose() {
        let mut pool = pool(4);
        pool.allocate_voice("a").gate_on();
        pool.advance(0.5);
        let tap = pool.get_stem_bus("a").unwrap();

        pool.release_voice("a");
        assert!(pool.is_pending_disposal("a"));
        assert_eq!(pool.voice("a").map(Voice::state), Some(VoiceState::Releasing));

        // Still there until release + margin has elapsed
        pool.advance(0.6);
        assert!(pool.has_voice("a"));
        assert!(!tap.is_closed());

        pool.advance(0.2);
        assert!(!pool.has_voice("a"));
        assert!(pool.get_stem_bus("a").is_none());
        assert!(tap.is_closed());
        assert_eq!(pool.drain_events(), vec![PoolEvent::Disposed("a".to_string())]);
    }

    #[test]
    fn test_regate_cancels_disposal() {
        let mut pool = pool(4);
        pool.allocate_voice("a").gate_on();
        pool.advance(0.5);
        pool.release_voice("a");
        pool.advance(0.1);

        let voice = pool.allocate_voice("a");
        voice.gate_on();
        assert_eq!(voice.state(), VoiceState::Attacking);
        assert!(!pool.is_pending_disposal("a"));

        pool.advance(2.0);
        assert_eq!(pool.voice("a").map(Voice::state), Some(VoiceState::Sustaining));
        assert!(pool.drain_events().is_empty());
    }

    #[test]
    fn test_release_again_after_regate_reschedules() {
        let mut pool = pool(4);
        pool.allocate_voice("a").gate_on();
        pool.release_voice("a");
        pool.allocate_voice("a").gate_on();
        pool.advance(0.3);
        pool.release_voice("a");
        assert!(pool.is_pending_disposal("a"));

        pool.advance(0.8);
        assert!(!pool.has_voice("a"));
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let mut pool = pool(4);
        pool.release_voice("ghost");
        pool.release_voice("ghost");
        assert!(!pool.is_pending_disposal("ghost"));
        assert_eq!(pool.active_voice_count(), 0);
    }

    #[test]
    fn test_duplicate_release_keeps_deadline() {
        let mut pool = pool(4);
        pool.allocate_voice("a").gate_on();
        pool.release_voice("a");
        pool.advance(0.4);
        pool.release_voice("a");
        pool.advance(0.4);
        assert!(!pool.has_voice("a"));
    }

    #[test]
    fn test_steal_cancels_pending_disposal() {
        let mut pool = pool(1);
        pool.allocate_voice("a").gate_on();
        pool.release_voice("a");
        pool.allocate_voice("b").gate_on();
        assert!(!pool.is_pending_disposal("a"));

        // The stale deadline must not touch anything
        pool.advance(1.0);
        assert!(pool.has_voice("b"));
        assert_eq!(pool.drain_events(), vec![PoolEvent::Stolen("a".to_string())]);
    }

    #[test]
    fn test_shrinking_polyphony_evicts_oldest() {
        let mut pool = pool(4);
        for entity in ["a", "b", "c", "d"] {
            pool.allocate_voice(entity);
        }
        pool.set_max_polyphony(2).unwrap();
        assert_eq!(pool.active_voice_count(), 2);
        assert!(pool.has_voice("c"));
        assert!(pool.has_voice("d"));
    }

    #[test]
    fn test_stem_taps_follow_voices() {
        let mut pool = pool(4);
        pool.allocate_voice("a").gate_on();
        pool.allocate_voice("b");
        let taps = pool.get_all_stem_buses();
        assert_eq!(taps.len(), 2);
        assert_eq!(taps[0].0, "a");

        let tap = pool.get_stem_bus("a").unwrap();
        tap.arm();
        pool.advance(0.3);
        let frames = tap.drain();
        assert_eq!(frames.len(), 300);
        assert!(frames.iter().any(|f| f.peak() > 0.0));
    }

    #[test]
    fn test_gain_validation() {
        let mut pool = pool(4);
        assert!(pool.set_master_gain(0.5).is_ok());
        assert_eq!(pool.master_gain(), 0.5);
        assert!(pool.set_reverb_send(1.5).is_err());
        assert!(pool.set_delay_send(-0.2).is_err());
        assert_eq!(pool.delay_send(), DEFAULT_DELAY_SEND);
    }

    #[test]
    fn test_invalid_voice_params_rejected() {
        let mut pool = pool(4);
        let mut params = quick_params();
        params.gain = 3.0;
        assert!(pool.set_voice_params(params).is_err());
        assert_eq!(pool.voice_params(), &quick_params());
    }

    #[test]
    fn test_output_is_limited() {
        let mut pool = pool(16);
        pool.set_master_gain(1.0).unwrap();
        for i in 0..16 {
            let voice = pool.allocate_voice(&format!("e{}", i));
            voice.gate_on();
            voice.set_pitch(55.0 * (i + 1) as f64, 0.0);
        }
        let mut buffer = vec![0.0f32; 2 * 2000];
        pool.fill_buffer(&mut buffer, 2);
        assert!(buffer.iter().any(|s| *s != 0.0));
        assert!(buffer.iter().all(|s| (s.abs() as f64) <= LIMITER_CEILING + 1e-6));
    }

    #[test]
    fn test_fill_buffer_mono_and_surround() {
        let mut pool = pool(4);
        pool.allocate_voice("a").gate_on();

        let mut mono = vec![0.0f32; 256];
        pool.fill_buffer(&mut mono, 1);
        assert!(mono.iter().any(|s| *s != 0.0));

        let mut quad = vec![1.0f32; 4 * 64];
        pool.fill_buffer(&mut quad, 4);
        assert!(quad.chunks(4).all(|c| c[2] == 0.0 && c[3] == 0.0));
    }

    #[test]
    fn test_release_all() {
        let mut pool = pool(4);
        pool.allocate_voice("a").gate_on();
        pool.allocate_voice("b").gate_on();
        pool.release_all();
        assert!(pool.is_pending_disposal("a"));
        assert!(pool.is_pending_disposal("b"));
        pool.advance(1.0);
        assert_eq!(pool.active_voice_count(), 0);
    }
}
