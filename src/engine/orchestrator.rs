//! The control loop
//!
//! Routes packets from data sources through the mapping engine into the
//! voice pool, one message at a time. The pool sits behind a mutex shared
//! with the audio callback; UI readers get a lock-free snapshot instead.

use super::pool::{PoolEvent, SynthEngine};
use super::recorder::{PacketLog, PacketRecorder, StemRecorder, WavStemRecorder};
use crate::config::ContrailConfig;
use crate::error::Result;
use crate::mapping::{MappingEngine, MappingRule};
use crate::sources::{DataEvent, DataPacket, DataSource, SourceInfo, SourceMessage};
use crate::synth::VoiceState;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

/// How often `run` drains the sources
const PUMP_INTERVAL: Duration = Duration::from_millis(10);

/// A discrete event lifted off a packet for listeners
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfacedEvent {
    pub entity_id: String,
    pub source_type: String,
    pub timestamp: u64,
    pub event: DataEvent,
}

/// One voice as seen from outside the control loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceSnapshot {
    pub id: String,
    pub entity_id: String,
    pub state: VoiceState,
    pub pitch: f64,
    pub filter_freq: f64,
    pub gain: f64,
    pub pan: f64,
}

/// Point-in-time view of the engine; may lag the control loop slightly
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub voices: Vec<VoiceSnapshot>,
    pub sources: Vec<SourceInfo>,
    pub max_polyphony: usize,
    pub recording: bool,
    pub packets_processed: u64,
}

struct AttachedSource {
    source: Box<dyn DataSource>,
    receiver: broadcast::Receiver<SourceMessage>,
    info: SourceInfo,
}

pub struct Orchestrator {
    synth: Arc<Mutex<SynthEngine>>,
    mapping: MappingEngine,
    smooth_time: f64,
    packet_recorder: Box<dyn PacketRecorder>,
    stem_recorder: Box<dyn StemRecorder>,
    sources: Vec<AttachedSource>,
    events: broadcast::Sender<SurfacedEvent>,
    snapshot: Arc<ArcSwap<EngineSnapshot>>,
    packets_processed: u64,
}

fn lock(synth: &Mutex<SynthEngine>) -> MutexGuard<'_, SynthEngine> {
    // A panic on the audio thread must not take the control loop down with it
    synth.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Orchestrator {
    /// Build the pool and mapping engine from a configuration. Records
    /// packets into a [`PacketLog`] and stems into the configured directory.
    pub fn new(config: &ContrailConfig) -> Result<Self> {
        let sample_rate = config.audio.sample_rate as f64;
        let mut synth = SynthEngine::new(sample_rate, config.engine.max_polyphony)?;
        synth.set_voice_params(config.voice.clone())?;
        synth.set_master_gain(config.engine.master_gain)?;
        synth.set_reverb_send(config.engine.reverb_send)?;
        synth.set_delay_send(config.engine.delay_send)?;

        let mapping = MappingEngine::with_rules(config.rules())?;
        let (events, _) = broadcast::channel(256);

        let mut orchestrator = Self {
            synth: Arc::new(Mutex::new(synth)),
            mapping,
            smooth_time: config.engine.smooth_time.max(0.0),
            packet_recorder: Box::new(PacketLog::new()),
            stem_recorder: Box::new(WavStemRecorder::new(
                config.recording.stem_dir.clone(),
                config.audio.sample_rate,
            )),
            sources: Vec::new(),
            events,
            snapshot: Arc::new(ArcSwap::from_pointee(EngineSnapshot::default())),
            packets_processed: 0,
        };
        orchestrator.publish_snapshot();
        Ok(orchestrator)
    }

    /// Swap in other recorder collaborators
    pub fn with_recorders(
        mut self,
        packet_recorder: Box<dyn PacketRecorder>,
        stem_recorder: Box<dyn StemRecorder>,
    ) -> Self {
        self.packet_recorder = packet_recorder;
        self.stem_recorder = stem_recorder;
        self
    }

    /// Shared handle to the voice pool, for the audio callback or an offline renderer
    pub fn synth(&self) -> Arc<Mutex<SynthEngine>> {
        Arc::clone(&self.synth)
    }

    pub fn mapping(&self) -> &MappingEngine {
        &self.mapping
    }

    pub fn smooth_time(&self) -> f64 {
        self.smooth_time
    }

    /// Subscribe to a source. Nothing is received until it is started.
    pub fn add_source(&mut self, source: Box<dyn DataSource>) {
        let receiver = source.subscribe();
        let info = source.info();
        info!(source = %info.name, kind = %info.kind, "source added");
        self.sources.push(AttachedSource { source, receiver, info });
        self.publish_snapshot();
    }

    pub fn start_sources(&mut self) -> anyhow::Result<()> {
        for attached in &mut self.sources {
            attached.source.start()?;
            attached.info = attached.source.info();
        }
        self.publish_snapshot();
        Ok(())
    }

    pub fn stop_sources(&mut self) {
        for attached in &mut self.sources {
            attached.source.stop();
            attached.info = attached.source.info();
        }
        self.publish_snapshot();
    }

    /// Last known status of every source
    pub fn source_info(&self) -> Vec<SourceInfo> {
        self.sources.iter().map(|s| s.info.clone()).collect()
    }

    /// Drain every message already waiting on the sources without blocking.
    /// Returns the number handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        for index in 0..self.sources.len() {
            loop {
                let message = match self.sources[index].receiver.try_recv() {
                    Ok(message) => message,
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!(source = %self.sources[index].info.name, skipped, "control loop fell behind source");
                        continue;
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                };
                self.dispatch(message);
                handled += 1;
            }
        }
        if handled > 0 {
            self.publish_snapshot();
        }
        handled
    }

    /// Pump the sources until `shutdown` resolves
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(PUMP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.pump();
                    if self.stem_recorder.is_recording() {
                        if let Err(e) = self.stem_recorder.flush() {
                            warn!(error = %e, "failed to flush stems");
                        }
                    }
                }
            }
        }
        debug!("control loop stopped");
    }

    /// Handle a single source message
    pub fn dispatch(&mut self, message: SourceMessage) {
        match message {
            SourceMessage::Data(packet) => self.handle_data(&packet),
            SourceMessage::EntityRemoved(entity_id) => self.handle_entity_removed(&entity_id),
            SourceMessage::Status(info) => self.handle_status(info),
        }
    }

    /// Route one packet to its entity's voice
    pub fn handle_data(&mut self, packet: &DataPacket) {
        self.packet_recorder.record_packet(packet);
        self.packets_processed += 1;

        let entity_id = packet.source_id.as_str();
        let (new_tap, pool_events) = {
            let mut synth = lock(&self.synth);
            let is_new = !synth.has_voice(entity_id);

            let voice = synth.allocate_voice(entity_id);
            // Also re-opens a voice that is still releasing
            let regated = !voice.is_gate_open();
            if regated {
                voice.gate_on();
            }
            let values = self.mapping.process(packet);
            values.apply_to_voice(voice, self.smooth_time);

            // A re-gated voice lost its stem when the entity was removed
            let new_tap = if is_new || regated { synth.get_stem_bus(entity_id) } else { None };
            (new_tap, synth.drain_events())
        };

        self.handle_pool_events(pool_events);
        if let Some(tap) = new_tap.filter(|_| self.stem_recorder.is_recording()) {
            self.stem_recorder.add_stem(entity_id, tap);
        }
        self.surface_events(packet);
    }

    /// The entity is gone: release its voice and forget it
    pub fn handle_entity_removed(&mut self, entity_id: &str) {
        let pool_events = {
            let mut synth = lock(&self.synth);
            synth.release_voice(entity_id);
            synth.drain_events()
        };
        self.handle_pool_events(pool_events);
        self.mapping.clear_entity(entity_id);
        self.stem_recorder.remove_stem(entity_id);
        debug!(entity = entity_id, "entity removed");
    }

    pub fn handle_status(&mut self, info: SourceInfo) {
        let Some(attached) = self.sources.iter_mut().find(|s| s.info.id == info.id) else {
            debug!(source = %info.id, "status from unknown source ignored");
            return;
        };
        if attached.info.status != info.status {
            info!(source = %info.name, status = ?info.status, "source status changed");
        }
        attached.info = info;
    }

    fn handle_pool_events(&mut self, events: Vec<PoolEvent>) {
        for event in events {
            match event {
                PoolEvent::Stolen(entity_id) => {
                    debug!(entity = %entity_id, "voice stolen");
                    self.stem_recorder.remove_stem(&entity_id);
                }
                PoolEvent::Disposed(entity_id) => {
                    self.stem_recorder.remove_stem(&entity_id);
                }
            }
        }
    }

    fn surface_events(&self, packet: &DataPacket) {
        for event in &packet.events {
            if event.kind == "emergency" {
                warn!(entity = %packet.source_id, severity = event.severity, "emergency reported");
            } else {
                debug!(entity = %packet.source_id, kind = %event.kind, "event");
            }
            // No listeners is fine
            let _ = self.events.send(SurfacedEvent {
                entity_id: packet.source_id.clone(),
                source_type: packet.source_type.clone(),
                timestamp: packet.timestamp,
                event: event.clone(),
            });
        }
    }

    /// Discrete events carried by incoming packets
    pub fn subscribe_events(&self) -> broadcast::Receiver<SurfacedEvent> {
        self.events.subscribe()
    }

    /// Start capturing packets and one stem per live voice
    pub fn start_recording(&mut self) -> anyhow::Result<()> {
        self.packet_recorder.start();
        self.stem_recorder.start_all()?;
        let taps = lock(&self.synth).get_all_stem_buses();
        for (entity_id, tap) in taps {
            self.stem_recorder.add_stem(&entity_id, tap);
        }
        info!("recording started");
        self.publish_snapshot();
        Ok(())
    }

    pub fn stop_recording(&mut self) -> anyhow::Result<()> {
        self.packet_recorder.stop();
        self.stem_recorder.flush()?;
        self.stem_recorder.stop_all()?;
        info!("recording stopped");
        self.publish_snapshot();
        Ok(())
    }

    /// Move captured stem audio to disk
    pub fn flush_stems(&mut self) -> anyhow::Result<()> {
        self.stem_recorder.flush()
    }

    pub fn is_recording(&self) -> bool {
        self.stem_recorder.is_recording()
    }

    /// Replace the rule list. Invalid lists leave the current rules in place.
    pub fn set_mappings(&mut self, rules: Vec<MappingRule>) -> Result<()> {
        self.mapping.set_mappings(rules)
    }

    /// Re-apply polyphony, bus levels, voice defaults, rules and smoothing
    /// time without rebuilding anything
    pub fn apply_config(&mut self, config: &ContrailConfig) -> Result<()> {
        config.voice.validate()?;
        self.mapping.set_mappings(config.rules())?;

        let pool_events = {
            let mut synth = lock(&self.synth);
            synth.set_master_gain(config.engine.master_gain)?;
            synth.set_reverb_send(config.engine.reverb_send)?;
            synth.set_delay_send(config.engine.delay_send)?;
            synth.set_voice_params(config.voice.clone())?;
            synth.set_max_polyphony(config.engine.max_polyphony)?;
            synth.drain_events()
        };
        self.handle_pool_events(pool_events);
        self.smooth_time = config.engine.smooth_time.max(0.0);
        self.publish_snapshot();
        Ok(())
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        self.snapshot.load_full()
    }

    /// Handle for readers on other threads
    pub fn snapshot_handle(&self) -> Arc<ArcSwap<EngineSnapshot>> {
        Arc::clone(&self.snapshot)
    }

    /// Rebuild and publish the snapshot
    pub fn publish_snapshot(&self) {
        let (voices, max_polyphony) = {
            let synth = lock(&self.synth);
            let voices = synth
                .voices()
                .map(|voice| VoiceSnapshot {
                    id: voice.id().to_string(),
                    entity_id: voice.entity_id().to_string(),
                    state: voice.state(),
                    pitch: voice.current_pitch(),
                    filter_freq: voice.current_filter_freq(),
                    gain: voice.current_gain(),
                    pan: voice.current_pan(),
                })
                .collect();
            (voices, synth.max_polyphony())
        };

        self.snapshot.store(Arc::new(EngineSnapshot {
            voices,
            sources: self.source_info(),
            max_polyphony,
            recording: self.stem_recorder.is_recording(),
            packets_processed: self.packets_processed,
        }));
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop_sources();
    }
}
