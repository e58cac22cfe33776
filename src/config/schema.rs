//! Configuration schema definitions

use crate::engine::{DEFAULT_DELAY_SEND, DEFAULT_MASTER_GAIN, DEFAULT_MAX_POLYPHONY, DEFAULT_REVERB_SEND};
use crate::mapping::{MappingRule, Preset};
use crate::sources::SimulatorConfig;
use crate::synth::VoiceParams;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Main configuration for Contrail
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContrailConfig {
    /// Audio output settings
    #[serde(default)]
    pub audio: AudioConfig,

    /// Voice pool and shared bus settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Parameters for newly allocated voices
    #[serde(default)]
    pub voice: VoiceParams,

    /// Built-in rule set, used when `mappings` is empty
    #[serde(default)]
    pub preset: Option<Preset>,

    /// Explicit mapping rules, evaluated in order
    #[serde(default)]
    pub mappings: Vec<MappingRule>,

    /// Simulated traffic
    #[serde(default)]
    pub simulation: SimulatorConfig,

    #[serde(default)]
    pub recording: RecordingConfig,
}

impl ContrailConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate < 8000 || self.audio.sample_rate > 192000 {
            bail!("Sample rate must be between 8000 and 192000");
        }
        if self.audio.buffer_size < 64 || self.audio.buffer_size > 8192 {
            bail!("Buffer size must be between 64 and 8192");
        }

        if self.engine.max_polyphony == 0 {
            bail!("Max polyphony must be at least 1");
        }
        for (name, value) in [
            ("Master gain", self.engine.master_gain),
            ("Reverb send", self.engine.reverb_send),
            ("Delay send", self.engine.delay_send),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be between 0.0 and 1.0", name);
            }
        }
        if !self.engine.smooth_time.is_finite() || self.engine.smooth_time < 0.0 {
            bail!("Smooth time must be a non-negative number of seconds");
        }

        self.voice.validate().context("invalid voice section")?;

        let mut ids = HashSet::new();
        for rule in &self.mappings {
            rule.validate()?;
            if !ids.insert(rule.id.as_str()) {
                bail!("Mapping '{}' is defined more than once", rule.id);
            }
        }

        if self.simulation.aircraft == 0 {
            bail!("Simulation needs at least one aircraft");
        }
        if !(0.0..=1.0).contains(&self.simulation.churn) {
            bail!("Simulation churn must be between 0.0 and 1.0");
        }

        Ok(())
    }

    /// The rules to run: explicit mappings, else the preset, else the default preset
    pub fn rules(&self) -> Vec<MappingRule> {
        if !self.mappings.is_empty() {
            return self.mappings.clone();
        }
        self.preset.unwrap_or_default().rules()
    }
}

/// Audio output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate in Hz (default: 44100)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Buffer size in frames (default: 512)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Output device name (None = default device)
    #[serde(default)]
    pub device: Option<String>,
}

fn default_sample_rate() -> u32 { 44100 }
fn default_buffer_size() -> usize { 512 }

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            buffer_size: default_buffer_size(),
            device: None,
        }
    }
}

/// Voice pool and bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_polyphony")]
    pub max_polyphony: usize,

    /// Master volume 0.0-1.0 (default: 0.8)
    #[serde(default = "default_master_gain")]
    pub master_gain: f64,

    #[serde(default = "default_reverb_send")]
    pub reverb_send: f64,

    #[serde(default = "default_delay_send")]
    pub delay_send: f64,

    /// Ramp time in seconds for every mapped parameter change
    #[serde(default = "default_smooth_time")]
    pub smooth_time: f64,
}

fn default_max_polyphony() -> usize { DEFAULT_MAX_POLYPHONY }
fn default_master_gain() -> f64 { DEFAULT_MASTER_GAIN }
fn default_reverb_send() -> f64 { DEFAULT_REVERB_SEND }
fn default_delay_send() -> f64 { DEFAULT_DELAY_SEND }
fn default_smooth_time() -> f64 { 0.5 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_polyphony: default_max_polyphony(),
            master_gain: default_master_gain(),
            reverb_send: default_reverb_send(),
            delay_send: default_delay_send(),
            smooth_time: default_smooth_time(),
        }
    }
}

/// Where stems are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingConfig {
    #[serde(default = "default_stem_dir")]
    pub stem_dir: PathBuf,
}

fn default_stem_dir() -> PathBuf { PathBuf::from("stems") }

impl Default for RecordingConfig {
    fn default() -> Self {
        Self { stem_dir: default_stem_dir() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{TargetParameter, Transform};

    #[test]
    fn test_default_audio_config() {
        let yaml = "sample_rate: 48000";
        let config: AudioConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.buffer_size, 512); // default
    }

    #[test]
    fn test_default_engine_config() {
        let config: EngineConfig = serde_yaml::from_str("max_polyphony: 8").unwrap();
        assert_eq!(config.max_polyphony, 8);
        assert_eq!(config.master_gain, 0.8);
        assert_eq!(config.smooth_time, 0.5);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ContrailConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rules().len(), 4);
    }

    #[test]
    fn test_mapping_section() {
        let yaml = r#"
mappings:
  - id: speed-to-cutoff
    source:
      data_source_type: flight
      field: velocity
    target:
      parameter: filterFreq
    transform:
      input_range: [0, 280]
      output_range: [200, 8000]
      curve: log
      smoothing: 0.8
"#;
        let config: ContrailConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());

        let rules = config.rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].parameter(), TargetParameter::FilterFreq);
        assert!(rules[0].transform.clamp);
    }

    #[test]
    fn test_preset_used_without_mappings() {
        let config: ContrailConfig = serde_yaml::from_str("preset: flight_ambient").unwrap();
        assert_eq!(config.rules(), Preset::FlightAmbient.rules());
    }

    #[test]
    fn test_invalid_gain() {
        let mut config = ContrailConfig::default();
        config.engine.reverb_send = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Reverb send"));
    }

    #[test]
    fn test_zero_polyphony() {
        let mut config = ContrailConfig::default();
        config.engine.max_polyphony = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_width_rule_rejected() {
        let mut config = ContrailConfig::default();
        let mut rule = MappingRule::new("flat", "flight", "altitude", TargetParameter::Pitch);
        rule.transform = Transform {
            input_range: [5.0, 5.0],
            ..Transform::default()
        };
        config.mappings.push(rule);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_rule_ids() {
        let mut config = ContrailConfig::default();
        let rule = MappingRule::new("pan", "flight", "heading", TargetParameter::Pan).with_input_range(0.0, 360.0);
        config.mappings = vec![rule.clone(), rule];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }
}
