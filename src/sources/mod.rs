//! Data sources for Contrail
//!
//! Sources own polling and connection management and emit telemetry packets
//! and entity-removal notices for the orchestrator.

mod packet;
mod simulator;
mod source;

pub use packet::{ContinuousValue, DataEvent, DataPacket};
pub(crate) use packet::now_millis;
pub use simulator::{FlightSimulator, FlightTraffic, SimulatorConfig, FLIGHT_SOURCE_TYPE};
pub use source::{DataSource, SourceInfo, SourceMessage, SourceStatus};
