//! Contrail - polyphonic sonification of live telemetry
//!
//! Every tracked entity (an aircraft, say) gets its own synth voice. Its
//! telemetry fields are mapped onto pitch, filter, gain and pan; entities
//! that appear allocate voices and entities that leave release them.

pub mod config;
pub mod engine;
pub mod error;
pub mod mapping;
pub mod sources;
pub mod synth;

pub use config::ContrailConfig;
pub use engine::{Orchestrator, SynthEngine};
pub use error::{Error, Result};
pub use mapping::MappingEngine;
