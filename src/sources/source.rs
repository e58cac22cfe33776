//! Data source contract

use super::DataPacket;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Connection state reported by a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Descriptive status of a data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    /// Packet `source_type` this source emits
    pub kind: String,
    pub status: SourceStatus,
    pub entity_count: usize,
    /// Milliseconds since the Unix epoch, 0 if never updated
    pub last_update: u64,
    pub error_message: Option<String>,
}

impl SourceInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            status: SourceStatus::Disconnected,
            entity_count: 0,
            last_update: 0,
            error_message: None,
        }
    }
}

/// Everything a source can tell the orchestrator
#[derive(Debug, Clone)]
pub enum SourceMessage {
    Data(DataPacket),
    /// The entity is confirmed gone
    EntityRemoved(String),
    Status(SourceInfo),
}

/// Trait for telemetry sources.
///
/// Sources own their connection management and cadence; the orchestrator
/// only subscribes.
pub trait DataSource: Send + Sync {
    /// Current status snapshot
    fn info(&self) -> SourceInfo;

    /// Start producing messages
    fn start(&mut self) -> anyhow::Result<()>;

    /// Stop producing messages
    fn stop(&mut self);

    /// Check if the source is running
    fn is_running(&self) -> bool;

    /// Subscribe to this source's messages
    fn subscribe(&self) -> broadcast::Receiver<SourceMessage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_info_defaults() {
        let info = SourceInfo::new("sim", "Simulated traffic", "flight");
        assert_eq!(info.status, SourceStatus::Disconnected);
        assert_eq!(info.entity_count, 0);
        assert!(info.error_message.is_none());
    }

    #[test]
    fn test_status_serialization() {
        let yaml = serde_yaml::to_string(&SourceStatus::Connected).unwrap();
        assert_eq!(yaml.trim(), "connected");
    }
}
