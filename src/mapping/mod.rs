//! Mapping system for transforming telemetry into synth parameters
//!
//! Rules normalize a field, shape it with a curve, rescale it, smooth it per
//! entity and optionally snap pitches to a scale.

mod curve;
mod engine;
mod presets;
mod rule;
pub mod scale;
mod smoothing;

pub use curve::Curve;
pub use engine::{apply_parameter, MappedValues, MappingEngine};
pub use presets::{flight_ambient, flight_drone, Preset};
pub use rule::{MappingRule, QuantizeSpec, SourceSelector, Target, TargetParameter, Transform};
pub use scale::Scale;
pub use smoothing::Smoother;
