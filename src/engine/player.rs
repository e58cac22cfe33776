//! Real-time audio playback using cpal

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use super::SynthEngine;

/// Real-time audio player
pub struct Player {
    stream: Option<Stream>,
    running: Arc<AtomicBool>,
}

impl Player {
    pub fn new() -> Self {
        Self {
            stream: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start playing the pool's output on the named device, or the default one
    pub fn start(&mut self, synth: Arc<Mutex<SynthEngine>>, device_name: Option<&str>) -> Result<()> {
        let device = find_device(device_name)?;
        let config = device
            .default_output_config()
            .context("output device has no default config")?;
        let sample_format = config.sample_format();
        let mut stream_config: StreamConfig = config.into();

        let sample_rate = match synth.lock() {
            Ok(synth) => synth.sample_rate(),
            Err(poisoned) => poisoned.into_inner().sample_rate(),
        };
        stream_config.sample_rate = SampleRate(sample_rate as u32);

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, synth, running)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, synth, running)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, synth, running)?,
            other => return Err(anyhow!("Unsupported sample format: {:?}", other)),
        };

        stream.play().context("failed to start output stream")?;
        self.stream = Some(stream);
        info!(
            device = %device.name().unwrap_or_default(),
            sample_rate,
            channels = stream_config.channels,
            "playback started"
        );

        Ok(())
    }

    /// Stop playback
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.stream = None;
    }

    /// Check if currently playing
    pub fn is_playing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new()
    }
}

fn find_device(name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow!("No output device available")),
        Some(name) => host
            .output_devices()
            .context("failed to enumerate output devices")?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow!("Output device not found: {}", name)),
    }
}

fn build_stream<T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>>(
    device: &Device,
    config: &StreamConfig,
    synth: Arc<Mutex<SynthEngine>>,
    running: Arc<AtomicBool>,
) -> Result<Stream> {
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            if scratch.len() < data.len() {
                scratch.resize(data.len(), 0.0);
            }
            let buffer = &mut scratch[..data.len()];

            // Stopped or the control side holds the lock: silence
            let rendered = running.load(Ordering::SeqCst)
                && match synth.try_lock() {
                    Ok(mut synth) => {
                        synth.fill_buffer(buffer, channels);
                        true
                    }
                    Err(_) => false,
                };
            if !rendered {
                buffer.fill(0.0);
            }

            for (out, &sample) in data.iter_mut().zip(buffer.iter()) {
                *out = T::from_sample(sample);
            }
        },
        |err| {
            warn!(error = %err, "audio stream error");
        },
        None,
    )?;

    Ok(stream)
}

/// Get the default output device name
pub fn default_device_name() -> Option<String> {
    let host = cpal::default_host();
    host.default_output_device()
        .and_then(|d| d.name().ok())
}

/// List all available output devices
pub fn list_output_devices() -> Vec<(String, StreamConfig)> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let (Ok(name), Ok(config)) = (device.name(), device.default_output_config()) {
                devices.push((name, config.into()));
            }
        }
    }

    devices
}
