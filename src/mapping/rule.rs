//! Declarative mapping rules
//!
//! A rule routes one telemetry field of one source type to one synth
//! parameter through a normalize / clamp / invert / curve / rescale chain.

use super::scale::{build_scale_notes, Scale, MAX_OCTAVE, MIN_OCTAVE};
use super::Curve;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Synth parameters a rule can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetParameter {
    /// Oscillator frequency in Hz
    Pitch,
    /// Filter cutoff in Hz
    #[serde(alias = "filterFreq")]
    FilterFreq,
    /// Filter resonance
    #[serde(alias = "filterQ")]
    FilterQ,
    /// Voice gain 0-1
    Amplitude,
    /// Stereo position -1..1
    Pan,
    #[serde(alias = "oscAGain")]
    OscAGain,
    #[serde(alias = "oscBGain")]
    OscBGain,
    #[serde(alias = "oscCGain")]
    OscCGain,
}

impl TargetParameter {
    pub const COUNT: usize = 8;

    pub const ALL: [TargetParameter; Self::COUNT] = [
        TargetParameter::Pitch,
        TargetParameter::FilterFreq,
        TargetParameter::FilterQ,
        TargetParameter::Amplitude,
        TargetParameter::Pan,
        TargetParameter::OscAGain,
        TargetParameter::OscBGain,
        TargetParameter::OscCGain,
    ];

    /// Dense index for table lookups
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            TargetParameter::Pitch => "pitch",
            TargetParameter::FilterFreq => "filter_freq",
            TargetParameter::FilterQ => "filter_q",
            TargetParameter::Amplitude => "amplitude",
            TargetParameter::Pan => "pan",
            TargetParameter::OscAGain => "osc_a_gain",
            TargetParameter::OscBGain => "osc_b_gain",
            TargetParameter::OscCGain => "osc_c_gain",
        }
    }
}

impl fmt::Display for TargetParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TargetParameter {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "pitch" => Ok(TargetParameter::Pitch),
            "filter_freq" | "filterFreq" => Ok(TargetParameter::FilterFreq),
            "filter_q" | "filterQ" => Ok(TargetParameter::FilterQ),
            "amplitude" => Ok(TargetParameter::Amplitude),
            "pan" => Ok(TargetParameter::Pan),
            "osc_a_gain" | "oscAGain" => Ok(TargetParameter::OscAGain),
            "osc_b_gain" | "oscBGain" => Ok(TargetParameter::OscBGain),
            "osc_c_gain" | "oscCGain" => Ok(TargetParameter::OscCGain),
            _ => Err(Error::UnknownParameter(name.to_string())),
        }
    }
}

/// Pitch quantization settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizeSpec {
    pub scale: Scale,
    /// MIDI note number (60 = C4); only its pitch class is used
    pub root_note: i32,
    pub octave_low: i32,
    pub octave_high: i32,
}

impl QuantizeSpec {
    pub fn new(scale: Scale, root_note: i32, octave_low: i32, octave_high: i32) -> Self {
        Self {
            scale,
            root_note,
            octave_low,
            octave_high,
        }
    }

    /// Materialize the candidate notes
    pub fn notes(&self) -> Vec<u8> {
        build_scale_notes(self.scale, self.root_note, self.octave_low, self.octave_high)
    }
}

/// Which field of which packets a rule reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSelector {
    pub data_source_type: String,
    pub field: String,
    /// Only match this entity
    #[serde(default)]
    pub entity_filter: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub parameter: TargetParameter,
}

/// The numeric transform of a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub input_range: [f64; 2],
    pub output_range: [f64; 2],

    #[serde(default)]
    pub curve: Curve,

    /// EMA coefficient 0-1; 0 disables smoothing
    #[serde(default)]
    pub smoothing: f64,

    #[serde(default = "default_clamp")]
    pub clamp: bool,

    #[serde(default)]
    pub invert: bool,

    #[serde(default)]
    pub quantize: Option<QuantizeSpec>,
}

fn default_clamp() -> bool { true }

impl Default for Transform {
    fn default() -> Self {
        Self {
            input_range: [0.0, 1.0],
            output_range: [0.0, 1.0],
            curve: Curve::Linear,
            smoothing: 0.0,
            clamp: true,
            invert: false,
            quantize: None,
        }
    }
}

impl Transform {
    /// Normalize, clamp, invert, shape and rescale a raw value.
    ///
    /// Smoothing and quantization are applied by the engine afterwards.
    pub fn map(&self, value: f64) -> f64 {
        let [in_lo, in_hi] = self.input_range;
        let [out_lo, out_hi] = self.output_range;

        let mut normalized = (value - in_lo) / (in_hi - in_lo);
        if self.clamp {
            normalized = normalized.clamp(0.0, 1.0);
        }
        if self.invert {
            normalized = 1.0 - normalized;
        }
        normalized = self.curve.apply(normalized);

        out_lo + normalized * (out_hi - out_lo)
    }
}

/// A complete mapping rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRule {
    pub id: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub source: SourceSelector,
    pub target: Target,

    #[serde(default)]
    pub transform: Transform,
}

fn default_enabled() -> bool { true }

impl MappingRule {
    /// Create an enabled rule with an identity 0..1 transform
    pub fn new(
        id: impl Into<String>,
        data_source_type: impl Into<String>,
        field: impl Into<String>,
        parameter: TargetParameter,
    ) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            source: SourceSelector {
                data_source_type: data_source_type.into(),
                field: field.into(),
                entity_filter: None,
            },
            target: Target { parameter },
            transform: Transform::default(),
        }
    }

    pub fn with_input_range(mut self, lo: f64, hi: f64) -> Self {
        self.transform.input_range = [lo, hi];
        self
    }

    pub fn with_output_range(mut self, lo: f64, hi: f64) -> Self {
        self.transform.output_range = [lo, hi];
        self
    }

    pub fn with_curve(mut self, curve: Curve) -> Self {
        self.transform.curve = curve;
        self
    }

    pub fn with_smoothing(mut self, smoothing: f64) -> Self {
        self.transform.smoothing = smoothing;
        self
    }

    pub fn with_clamp(mut self, clamp: bool) -> Self {
        self.transform.clamp = clamp;
        self
    }

    pub fn with_invert(mut self, invert: bool) -> Self {
        self.transform.invert = invert;
        self
    }

    pub fn with_quantize(mut self, quantize: QuantizeSpec) -> Self {
        self.transform.quantize = Some(quantize);
        self
    }

    pub fn with_entity_filter(mut self, entity_id: impl Into<String>) -> Self {
        self.source.entity_filter = Some(entity_id.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn parameter(&self) -> TargetParameter {
        self.target.parameter
    }

    /// Check the rule is structurally valid
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(self.invalid("id must not be empty"));
        }
        if self.source.data_source_type.is_empty() || self.source.field.is_empty() {
            return Err(self.invalid("source type and field must not be empty"));
        }

        let t = &self.transform;
        if t.input_range.iter().chain(&t.output_range).any(|v| !v.is_finite()) {
            return Err(self.invalid("ranges must be finite"));
        }
        if t.input_range[1] - t.input_range[0] == 0.0 {
            return Err(Error::ZeroWidthInputRange { rule: self.id.clone() });
        }
        if !(0.0..=1.0).contains(&t.smoothing) {
            return Err(self.invalid(format!("smoothing must be between 0 and 1, got {}", t.smoothing)));
        }
        if let Some(q) = &t.quantize {
            for octave in [q.octave_low, q.octave_high] {
                if !(MIN_OCTAVE..=MAX_OCTAVE).contains(&octave) {
                    return Err(self.invalid(format!(
                        "octave {} is outside {}..={}",
                        octave, MIN_OCTAVE, MAX_OCTAVE
                    )));
                }
            }
            if q.octave_low > q.octave_high {
                return Err(self.invalid(format!(
                    "octave_low {} is above octave_high {}",
                    q.octave_low, q.octave_high
                )));
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::InvalidRule {
            rule: self.id.clone(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn altitude_rule() -> MappingRule {
        MappingRule::new("altitude-to-pitch", "flight", "altitude", TargetParameter::Pitch)
            .with_input_range(0.0, 13_716.0)
            .with_output_range(80.0, 800.0)
            .with_curve(Curve::Log)
    }

    #[test]
    fn test_transform_log_midpoint() {
        let rule = altitude_rule();
        let expected = 80.0 + 5.5_f64.log10() * 720.0;
        assert_abs_diff_eq!(rule.transform.map(6858.0), expected, epsilon = 1e-9);
        assert_abs_diff_eq!(rule.transform.map(6858.0), 613.06, epsilon = 0.01);
    }

    #[test]
    fn test_transform_linear() {
        let rule = MappingRule::new("t", "weather", "temp", TargetParameter::Pitch)
            .with_input_range(-20.0, 40.0)
            .with_output_range(100.0, 400.0);

        assert_eq!(rule.transform.map(-20.0), 100.0);
        assert_eq!(rule.transform.map(10.0), 250.0);
        assert_eq!(rule.transform.map(40.0), 400.0);
    }

    #[test]
    fn test_transform_clamped_output_stays_in_range() {
        for curve in [Curve::Linear, Curve::Log, Curve::Exp] {
            for invert in [false, true] {
                let rule = altitude_rule().with_curve(curve).with_invert(invert);
                for value in [-1e12, -5.0, 0.0, 6858.0, 13_716.0, 1e6, 1e300] {
                    let out = rule.transform.map(value);
                    assert!((80.0..=800.0).contains(&out), "{:?} {} -> {}", curve, value, out);
                }
            }
        }
    }

    #[test]
    fn test_transform_clamp_with_descending_output() {
        let rule = MappingRule::new("t", "flight", "speed", TargetParameter::FilterFreq)
            .with_input_range(0.0, 100.0)
            .with_output_range(8000.0, 200.0);
        assert_eq!(rule.transform.map(-50.0), 8000.0);
        assert_eq!(rule.transform.map(500.0), 200.0);
    }

    #[test]
    fn test_transform_unclamped_extrapolates() {
        let rule = MappingRule::new("t", "s", "f", TargetParameter::Pan)
            .with_input_range(0.0, 100.0)
            .with_output_range(0.0, 1.0)
            .with_clamp(false);
        assert_eq!(rule.transform.map(150.0), 1.5);
        assert_eq!(rule.transform.map(-50.0), -0.5);
    }

    #[test]
    fn test_transform_invert() {
        let rule = MappingRule::new("t", "s", "f", TargetParameter::Pan)
            .with_input_range(0.0, 360.0)
            .with_output_range(-1.0, 1.0)
            .with_invert(true);
        assert_eq!(rule.transform.map(0.0), 1.0);
        assert_eq!(rule.transform.map(360.0), -1.0);
    }

    #[test]
    fn test_transform_descending_input_range() {
        let rule = MappingRule::new("t", "s", "f", TargetParameter::Amplitude)
            .with_input_range(100.0, 0.0);
        assert_eq!(rule.transform.map(100.0), 0.0);
        assert_eq!(rule.transform.map(0.0), 1.0);
    }

    #[test]
    fn test_validate_rejects_zero_width_input() {
        let rule = altitude_rule().with_input_range(5.0, 5.0);
        assert_eq!(
            rule.validate(),
            Err(Error::ZeroWidthInputRange { rule: "altitude-to-pitch".to_string() })
        );
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        assert!(altitude_rule().validate().is_ok());
        assert!(altitude_rule().with_smoothing(1.5).validate().is_err());
        assert!(altitude_rule().with_smoothing(f64::NAN).validate().is_err());
        assert!(altitude_rule().with_output_range(0.0, f64::INFINITY).validate().is_err());
        assert!(altitude_rule()
            .with_quantize(QuantizeSpec::new(Scale::Major, 60, 5, 1))
            .validate()
            .is_err());

        let mut rule = altitude_rule();
        rule.id = "  ".to_string();
        assert!(matches!(rule.validate(), Err(Error::InvalidRule { .. })));
    }

    #[test]
    fn test_validate_rejects_out_of_range_octaves() {
        for (low, high) in [(i32::MAX - 1, i32::MAX), (-2, 4), (0, 10), (i32::MIN, 5)] {
            let rule = altitude_rule().with_quantize(QuantizeSpec::new(Scale::Major, 60, low, high));
            assert!(
                matches!(rule.validate(), Err(Error::InvalidRule { .. })),
                "octaves {}..={} accepted",
                low,
                high
            );
        }
        let widest = altitude_rule().with_quantize(QuantizeSpec::new(Scale::Major, 60, MIN_OCTAVE, MAX_OCTAVE));
        assert!(widest.validate().is_ok());
    }

    #[test]
    fn test_target_parameter_parsing() {
        assert_eq!("filterFreq".parse::<TargetParameter>(), Ok(TargetParameter::FilterFreq));
        assert_eq!("osc_b_gain".parse::<TargetParameter>(), Ok(TargetParameter::OscBGain));
        assert!("volume".parse::<TargetParameter>().is_err());

        for (i, param) in TargetParameter::ALL.iter().enumerate() {
            assert_eq!(param.index(), i);
            assert_eq!(param.name().parse::<TargetParameter>(), Ok(*param));
        }
    }

    #[test]
    fn test_rule_from_yaml() {
        let yaml = r#"
id: altitude-to-pitch
source:
  data_source_type: flight
  field: altitude
target:
  parameter: pitch
transform:
  input_range: [0, 13716]
  output_range: [80, 800]
  curve: log
  smoothing: 0.85
  quantize:
    scale: pentatonic_minor
    root_note: 60
    octave_low: 1
    octave_high: 5
"#;
        let rule: MappingRule = serde_yaml::from_str(yaml).unwrap();
        assert!(rule.enabled);
        assert!(rule.transform.clamp);
        assert!(!rule.transform.invert);
        assert_eq!(rule.transform.curve, Curve::Log);
        assert_eq!(rule.parameter(), TargetParameter::Pitch);
        assert_eq!(rule.transform.quantize.as_ref().map(|q| q.scale), Some(Scale::PentatonicMinor));
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_target_accepts_camel_case_alias() {
        let target: Target = serde_yaml::from_str("parameter: filterQ").unwrap();
        assert_eq!(target.parameter, TargetParameter::FilterQ);
    }
}
