//! Built-in rule sets for flight telemetry

use super::rule::{MappingRule, QuantizeSpec, TargetParameter};
use super::scale::Scale;
use super::Curve;
use crate::sources::FLIGHT_SOURCE_TYPE;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named preset, selectable from config when no explicit mappings are given
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    #[default]
    FlightDrone,
    FlightAmbient,
}

impl Preset {
    pub fn rules(&self) -> Vec<MappingRule> {
        match self {
            Preset::FlightDrone => flight_drone(),
            Preset::FlightAmbient => flight_ambient(),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::FlightDrone => f.write_str("flight_drone"),
            Preset::FlightAmbient => f.write_str("flight_ambient"),
        }
    }
}

/// Altitude drives a pentatonic drone, speed opens the filter, heading pans
/// and climb rate adds resonance.
pub fn flight_drone() -> Vec<MappingRule> {
    vec![
        // 0 to ~45000 ft in meters
        MappingRule::new("altitude-to-pitch", FLIGHT_SOURCE_TYPE, "altitude", TargetParameter::Pitch)
            .with_input_range(0.0, 13716.0)
            .with_output_range(80.0, 800.0)
            .with_curve(Curve::Log)
            .with_smoothing(0.85)
            .with_quantize(QuantizeSpec::new(Scale::PentatonicMinor, 60, 1, 5)),
        // 0 to ~544 knots in m/s
        MappingRule::new("velocity-to-filter", FLIGHT_SOURCE_TYPE, "velocity", TargetParameter::FilterFreq)
            .with_input_range(0.0, 280.0)
            .with_output_range(200.0, 8000.0)
            .with_smoothing(0.8),
        MappingRule::new("heading-to-pan", FLIGHT_SOURCE_TYPE, "heading", TargetParameter::Pan)
            .with_input_range(0.0, 360.0)
            .with_output_range(-1.0, 1.0)
            .with_smoothing(0.7),
        MappingRule::new("verticalrate-to-filterq", FLIGHT_SOURCE_TYPE, "verticalRate", TargetParameter::FilterQ)
            .with_input_range(-15.0, 15.0)
            .with_output_range(0.5, 8.0)
            .with_curve(Curve::Exp)
            .with_smoothing(0.6),
    ]
}

/// Lower, slower and darker than [`flight_drone`]
pub fn flight_ambient() -> Vec<MappingRule> {
    vec![
        MappingRule::new("altitude-to-pitch", FLIGHT_SOURCE_TYPE, "altitude", TargetParameter::Pitch)
            .with_input_range(0.0, 13716.0)
            .with_output_range(40.0, 400.0)
            .with_curve(Curve::Log)
            .with_smoothing(0.95)
            .with_quantize(QuantizeSpec::new(Scale::NaturalMinor, 57, 0, 4)),
        MappingRule::new("velocity-to-filter", FLIGHT_SOURCE_TYPE, "velocity", TargetParameter::FilterFreq)
            .with_input_range(0.0, 280.0)
            .with_output_range(100.0, 3000.0)
            .with_curve(Curve::Log)
            .with_smoothing(0.9),
        MappingRule::new("longitude-to-pan", FLIGHT_SOURCE_TYPE, "longitude", TargetParameter::Pan)
            .with_input_range(-180.0, 180.0)
            .with_output_range(-0.8, 0.8)
            .with_smoothing(0.9),
        MappingRule::new(
            "verticalrate-to-amplitude",
            FLIGHT_SOURCE_TYPE,
            "verticalRate",
            TargetParameter::Amplitude,
        )
        .with_input_range(-15.0, 15.0)
        .with_output_range(0.3, 0.8)
        .with_smoothing(0.7),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for preset in [Preset::FlightDrone, Preset::FlightAmbient] {
            let rules = preset.rules();
            assert_eq!(rules.len(), 4);
            for rule in &rules {
                assert!(rule.validate().is_ok(), "{} in {}", rule.id, preset);
                assert!(rule.enabled);
                assert!(rule.transform.clamp);
            }
        }
    }

    #[test]
    fn test_drone_pitch_is_quantized() {
        let rules = flight_drone();
        let pitch = &rules[0];
        assert_eq!(pitch.parameter(), TargetParameter::Pitch);
        assert_eq!(
            pitch.transform.quantize,
            Some(QuantizeSpec::new(Scale::PentatonicMinor, 60, 1, 5))
        );
    }

    #[test]
    fn test_preset_from_yaml() {
        let preset: Preset = serde_yaml::from_str("flight_ambient").unwrap();
        assert_eq!(preset, Preset::FlightAmbient);
        assert_eq!(Preset::default(), Preset::FlightDrone);
    }
}
