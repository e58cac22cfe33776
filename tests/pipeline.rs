//! End-to-end: simulated traffic through the orchestrator into rendered audio

use contrail::config::ContrailConfig;
use contrail::engine::{Orchestrator, WavRecorder};
use contrail::mapping::Preset;
use contrail::sources::{DataPacket, FlightSimulator, FlightTraffic, SimulatorConfig, SourceMessage};
use contrail::synth::{EnvelopeParams, Frame, VoiceParams, VoiceState, LIMITER_CEILING};
use std::time::Duration;
use tempfile::tempdir;

const SAMPLE_RATE: u32 = 8000;

fn config(aircraft: usize, churn: f64) -> ContrailConfig {
    let mut config = ContrailConfig::default();
    config.audio.sample_rate = SAMPLE_RATE;
    config.engine.max_polyphony = 4;
    config.engine.smooth_time = 0.05;
    config.voice = VoiceParams {
        amp_envelope: EnvelopeParams::new(0.05, 0.05, 0.7, 0.2),
        filter_envelope: EnvelopeParams::new(0.05, 0.05, 0.5, 0.2),
        ..VoiceParams::default()
    };
    config.preset = Some(Preset::FlightDrone);
    config.simulation = SimulatorConfig {
        aircraft,
        interval_ms: 100,
        churn,
        seed: 11,
    };
    config
}

fn render(orchestrator: &Orchestrator, seconds: f64) -> Vec<Frame> {
    let synth = orchestrator.synth();
    let mut synth = synth.lock().unwrap();
    let frames = (seconds * SAMPLE_RATE as f64) as usize;
    (0..frames).map(|_| synth.process_frame()).collect()
}

#[test]
fn traffic_becomes_audible_voices() {
    let config = config(3, 0.0);
    let mut orchestrator = Orchestrator::new(&config).unwrap();
    let mut traffic = FlightTraffic::new(config.simulation.clone());

    let mut peak: f64 = 0.0;
    for _ in 0..10 {
        for message in traffic.step() {
            orchestrator.dispatch(message);
        }
        for frame in render(&orchestrator, 0.1) {
            assert!(frame.left.is_finite() && frame.right.is_finite());
            peak = peak.max(frame.peak());
        }
    }

    assert!(peak > 0.01, "expected audible output, peak {}", peak);
    assert!(peak <= LIMITER_CEILING + 1e-9);

    orchestrator.publish_snapshot();
    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.voices.len(), 3);
    for voice in &snapshot.voices {
        assert_eq!(voice.state, VoiceState::Sustaining);
        // Snapped to the nearest scale note around 80..800 Hz
        assert!((75.0..=850.0).contains(&voice.pitch), "pitch {}", voice.pitch);
        assert!(voice.pan >= -1.0 && voice.pan <= 1.0);
    }
}

#[test]
fn polyphony_is_never_exceeded() {
    let config = config(8, 0.3);
    let mut orchestrator = Orchestrator::new(&config).unwrap();
    let mut traffic = FlightTraffic::new(config.simulation.clone());
    let synth = orchestrator.synth();

    for _ in 0..30 {
        for message in traffic.step() {
            orchestrator.dispatch(message);
            assert!(synth.lock().unwrap().active_voice_count() <= 4);
        }
        render(&orchestrator, 0.1);
    }
}

#[test]
fn departed_entities_are_released_then_disposed() {
    let config = config(2, 0.0);
    let mut orchestrator = Orchestrator::new(&config).unwrap();
    let mut traffic = FlightTraffic::new(config.simulation.clone());

    for message in traffic.step() {
        orchestrator.dispatch(message);
    }
    render(&orchestrator, 0.2);

    for message in traffic.clear() {
        orchestrator.dispatch(message);
    }
    let synth = orchestrator.synth();
    assert_eq!(synth.lock().unwrap().active_voice_count(), 2);
    assert!(synth.lock().unwrap().voices().all(|v| v.state() == VoiceState::Releasing));

    // Release 0.2 plus the disposal margin
    render(&orchestrator, 0.5);
    assert_eq!(synth.lock().unwrap().active_voice_count(), 0);
    assert_eq!(orchestrator.mapping().smoother().entity_count(), 0);

    // Fully decayed once the voices are gone and the effect tails die out
    let tail = render(&orchestrator, 3.0);
    assert!(tail.last().unwrap().peak() < 1e-3);
}

#[test]
fn packets_outside_the_rules_still_get_voices() {
    let config = config(1, 0.0);
    let mut orchestrator = Orchestrator::new(&config).unwrap();

    // No mapped fields: the voice sounds at its defaults
    orchestrator.dispatch(SourceMessage::Data(DataPacket::new("ship", "mmsi-1")));
    let synth = orchestrator.synth();
    let synth = synth.lock().unwrap();
    let voice = synth.voice("mmsi-1").unwrap();
    assert!(voice.is_gate_open());
}

#[test]
fn offline_render_with_stems() {
    let dir = tempdir().unwrap();
    let mut config = config(2, 0.0);
    config.recording.stem_dir = dir.path().join("stems");

    let mut orchestrator = Orchestrator::new(&config).unwrap();
    orchestrator.start_recording().unwrap();
    let mut traffic = FlightTraffic::new(config.simulation.clone());

    let mix_path = dir.path().join("mix.wav");
    let mut mix = WavRecorder::new(&mix_path, SAMPLE_RATE).unwrap();
    for _ in 0..5 {
        for message in traffic.step() {
            orchestrator.dispatch(message);
        }
        mix.write_frames(&render(&orchestrator, 0.1)).unwrap();
        orchestrator.flush_stems().unwrap();
    }
    orchestrator.stop_recording().unwrap();
    mix.finalize().unwrap();

    let reader = hound::WavReader::open(&mix_path).unwrap();
    assert_eq!(reader.len(), 2 * 4000);

    let mut stems: Vec<_> = std::fs::read_dir(dir.path().join("stems"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    stems.sort();
    assert_eq!(stems.len(), 2);
    for stem in stems {
        let reader = hound::WavReader::open(&stem).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.len(), 2 * 4000);
    }
}

#[tokio::test]
async fn live_simulator_feeds_the_pool() {
    let config = config(3, 0.0);
    let mut orchestrator = Orchestrator::new(&config).unwrap();
    let simulator = FlightSimulator::new(
        "test",
        SimulatorConfig {
            interval_ms: 20,
            ..config.simulation.clone()
        },
    );
    orchestrator.add_source(Box::new(simulator));
    orchestrator.start_sources().unwrap();

    orchestrator
        .run(tokio::time::sleep(Duration::from_millis(150)))
        .await;
    orchestrator.stop_sources();

    let snapshot = orchestrator.snapshot();
    assert!(snapshot.packets_processed >= 3);
    assert_eq!(snapshot.voices.len(), 3);
    assert_eq!(snapshot.sources.len(), 1);
}
