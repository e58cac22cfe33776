//! Contrail - polyphonic sonification of live telemetry

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use contrail::config::{self, ContrailConfig, EXAMPLE_CONFIG};
use contrail::engine::{
    default_device_name, list_output_devices, Orchestrator, Player, SynthEngine, WavRecorder, DISPOSAL_MARGIN,
};
use contrail::sources::{FlightSimulator, FlightTraffic};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("contrail=info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play { config: config_path, duration, record } => {
            let cfg = load_or_default(&config_path)?;
            play(cfg, duration, record)?;
        }

        Commands::Render {
            config: config_path,
            output,
            duration,
            stems,
        } => {
            let cfg = load_or_default(&config_path)?;
            render(cfg, &output, duration, stems)?;
        }

        Commands::Devices => {
            println!("Available audio devices:\n");

            if let Some(name) = default_device_name() {
                println!("Default output: {}\n", name);
            }

            println!("Output devices:");
            let devices = list_output_devices();
            if devices.is_empty() {
                println!("  (none found)");
            }
            for (name, config) in devices {
                println!("  - {} ({} Hz, {} ch)", name, config.sample_rate.0, config.channels);
            }
        }

        Commands::Check { config: config_path } => {
            println!("Checking configuration at {:?}...", config_path);

            match config::load_config(&config_path) {
                Ok(cfg) => {
                    println!("Configuration is valid!");
                    println!("  Sample rate: {} Hz", cfg.audio.sample_rate);
                    println!("  Buffer size: {}", cfg.audio.buffer_size);
                    println!("  Max polyphony: {}", cfg.engine.max_polyphony);
                    println!("  Master gain: {:.0}%", cfg.engine.master_gain * 100.0);
                    println!(
                        "  Sends: reverb {:.0}%, delay {:.0}%",
                        cfg.engine.reverb_send * 100.0,
                        cfg.engine.delay_send * 100.0
                    );
                    if cfg.mappings.is_empty() {
                        println!("  Preset: {}", cfg.preset.unwrap_or_default());
                    }
                    let rules = cfg.rules();
                    println!("  Mappings: {}", rules.len());
                    for rule in &rules {
                        println!(
                            "    - {}: {}.{} -> {} {}",
                            rule.id,
                            rule.source.data_source_type,
                            rule.source.field,
                            rule.parameter(),
                            if rule.enabled { "[enabled]" } else { "[disabled]" }
                        );
                    }
                }
                Err(e) => {
                    println!("Configuration is invalid: {:#}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Init => {
            let path = "contrail.yaml";
            if Path::new(path).exists() {
                println!("contrail.yaml already exists. Not overwriting.");
            } else {
                std::fs::write(path, EXAMPLE_CONFIG)?;
                println!("Created contrail.yaml with example configuration.");
            }
        }
    }

    Ok(())
}

fn load_or_default(path: &Path) -> Result<ContrailConfig> {
    if path.exists() {
        info!(path = ?path, "loading configuration");
        config::load_config(path)
    } else {
        info!(path = ?path, "no configuration file, using defaults");
        Ok(ContrailConfig::default())
    }
}

fn play(cfg: ContrailConfig, duration: Option<u64>, record: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let mut orchestrator = Orchestrator::new(&cfg)?;
        orchestrator.add_source(Box::new(FlightSimulator::new("simulator", cfg.simulation.clone())));

        let synth = orchestrator.synth();
        let mut player = Player::new();
        player.start(Arc::clone(&synth), cfg.audio.device.as_deref())?;

        if record {
            orchestrator.start_recording()?;
            println!("Recording stems to {:?}", cfg.recording.stem_dir);
        }
        orchestrator.start_sources()?;

        let stop = Arc::new(Notify::new());
        {
            let stop = Arc::clone(&stop);
            ctrlc::set_handler(move || stop.notify_one()).context("failed to install Ctrl-C handler")?;
        }

        let snapshots = orchestrator.snapshot_handle();
        let status = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                let snapshot = snapshots.load();
                info!(
                    voices = snapshot.voices.len(),
                    max = snapshot.max_polyphony,
                    packets = snapshot.packets_processed,
                    "status"
                );
            }
        });

        println!("Playing. Press Ctrl-C to stop.");
        let shutdown = async {
            match duration {
                Some(secs) => {
                    tokio::select! {
                        _ = stop.notified() => {}
                        _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                    }
                }
                None => stop.notified().await,
            }
        };
        orchestrator.run(shutdown).await;
        status.abort();

        orchestrator.stop_sources();
        if record {
            orchestrator.stop_recording()?;
        }

        // Short fade so the stream doesn't stop on a click
        lock(&synth)?.set_master_gain(0.0)?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        player.stop();

        println!("Stopped.");
        Ok::<(), anyhow::Error>(())
    })
}

fn render(mut cfg: ContrailConfig, output: &Path, duration: u64, stems: Option<PathBuf>) -> Result<()> {
    if let Some(dir) = &stems {
        cfg.recording.stem_dir = dir.clone();
    }

    let mut orchestrator = Orchestrator::new(&cfg)?;
    if stems.is_some() {
        orchestrator.start_recording()?;
    }
    let synth = orchestrator.synth();

    let sample_rate = cfg.audio.sample_rate;
    let total_frames = sample_rate as u64 * duration;
    let step_frames = ((cfg.simulation.interval().as_secs_f64() * sample_rate as f64).round() as u64).max(1);

    println!("Rendering {} seconds to {:?}...", duration, output);
    let mut recorder = WavRecorder::new(output, sample_rate)?;
    let mut traffic = FlightTraffic::new(cfg.simulation.clone());

    let mut rendered = 0;
    while rendered < total_frames {
        for message in traffic.step() {
            orchestrator.dispatch(message);
        }
        let frames = step_frames.min(total_frames - rendered);
        render_frames(&synth, &mut recorder, frames)?;
        orchestrator.flush_stems()?;

        let before = rendered / sample_rate as u64;
        rendered += frames;
        if rendered / sample_rate as u64 != before {
            print!("\r  Progress: {}s / {}s", rendered / sample_rate as u64, duration);
            std::io::stdout().flush()?;
        }
    }

    // Let every voice play its release out
    for message in traffic.clear() {
        orchestrator.dispatch(message);
    }
    let tail = cfg.voice.amp_envelope.release + DISPOSAL_MARGIN;
    render_frames(&synth, &mut recorder, (tail * sample_rate as f64).ceil() as u64)?;

    if stems.is_some() {
        orchestrator.stop_recording()?;
    }
    let seconds = recorder.duration_secs();
    recorder.finalize()?;

    println!("\nRendered {:.1}s to {:?}", seconds, output);
    if let Some(dir) = stems {
        println!("Stems written to {:?}", dir);
    }
    Ok(())
}

fn render_frames(synth: &Mutex<SynthEngine>, recorder: &mut WavRecorder, frames: u64) -> Result<()> {
    let mut synth = lock(synth)?;
    for _ in 0..frames {
        recorder.write_frame(synth.process_frame())?;
    }
    Ok(())
}

fn lock(synth: &Mutex<SynthEngine>) -> Result<std::sync::MutexGuard<'_, SynthEngine>> {
    synth.lock().map_err(|_| anyhow!("synth engine lock poisoned"))
}
