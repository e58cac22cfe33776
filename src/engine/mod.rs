//! Voice pool, control loop, recorders and audio output

mod orchestrator;
mod player;
mod pool;
mod recorder;

pub use orchestrator::{EngineSnapshot, Orchestrator, SurfacedEvent, VoiceSnapshot};
pub use player::{default_device_name, list_output_devices, Player};
pub use pool::{
    PoolEvent, SynthEngine, DEFAULT_DELAY_SEND, DEFAULT_MASTER_GAIN, DEFAULT_MAX_POLYPHONY, DEFAULT_REVERB_SEND,
    DISPOSAL_MARGIN,
};
pub use recorder::{PacketLog, PacketRecorder, RecordedPacket, StemRecorder, WavRecorder, WavStemRecorder};
