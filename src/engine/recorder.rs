//! Recording collaborators
//!
//! Packets are captured into an in-memory log that can be exported as JSON.
//! Per-entity stems are written as stereo 32-bit float WAV files.

use crate::sources::DataPacket;
use crate::synth::{Frame, StemTap};
use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

const PACKET_LOG_VERSION: u32 = 1;

/// Receives every packet the orchestrator accepts
pub trait PacketRecorder: Send {
    /// Called for every packet; implementations decide whether to keep it
    fn record_packet(&mut self, packet: &DataPacket);

    fn start(&mut self);

    fn stop(&mut self);

    fn is_recording(&self) -> bool;
}

/// Receives stem taps in lockstep with voice allocation and removal
pub trait StemRecorder: Send {
    fn add_stem(&mut self, entity_id: &str, tap: StemTap);

    fn remove_stem(&mut self, entity_id: &str);

    fn start_all(&mut self) -> Result<()>;

    fn stop_all(&mut self) -> Result<()>;

    fn is_recording(&self) -> bool;

    /// Move captured audio out of the taps
    fn flush(&mut self) -> Result<()>;
}

/// One captured packet with its offset from the start of the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedPacket {
    pub offset_ms: u64,
    pub packet: DataPacket,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PacketLogFile {
    version: u32,
    recorded_at: u64,
    duration_ms: u64,
    frame_count: usize,
    frames: Vec<RecordedPacket>,
}

/// In-memory packet capture
#[derive(Debug, Default)]
pub struct PacketLog {
    frames: Vec<RecordedPacket>,
    recording: bool,
    started_at: Option<Instant>,
}

impl PacketLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Span between the first and last captured packet
    pub fn duration_ms(&self) -> u64 {
        match (self.frames.first(), self.frames.last()) {
            (Some(first), Some(last)) => last.offset_ms - first.offset_ms,
            _ => 0,
        }
    }

    pub fn frames(&self) -> &[RecordedPacket] {
        &self.frames
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.recording = false;
        self.started_at = None;
    }

    pub fn to_json(&self) -> Result<String> {
        let file = PacketLogFile {
            version: PACKET_LOG_VERSION,
            recorded_at: crate::sources::now_millis(),
            duration_ms: self.duration_ms(),
            frame_count: self.frames.len(),
            frames: self.frames.clone(),
        };
        serde_json::to_string_pretty(&file).context("failed to serialize packet log")
    }

    /// Load a log previously written by [`PacketLog::to_json`]
    pub fn from_json(json: &str) -> Result<Self> {
        let file: PacketLogFile = serde_json::from_str(json).context("failed to parse packet log")?;
        if file.version != PACKET_LOG_VERSION {
            bail!("unknown packet log version: {}", file.version);
        }
        Ok(Self {
            frames: file.frames,
            recording: false,
            started_at: None,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("failed to write packet log: {:?}", path))
    }
}

impl PacketRecorder for PacketLog {
    fn record_packet(&mut self, packet: &DataPacket) {
        let Some(started_at) = self.started_at.filter(|_| self.recording) else {
            return;
        };
        self.frames.push(RecordedPacket {
            offset_ms: started_at.elapsed().as_millis() as u64,
            packet: packet.clone(),
        });
    }

    fn start(&mut self) {
        self.frames.clear();
        self.recording = true;
        self.started_at = Some(Instant::now());
    }

    fn stop(&mut self) {
        self.recording = false;
    }

    fn is_recording(&self) -> bool {
        self.recording
    }
}

/// Stereo WAV file writer
pub struct WavRecorder {
    writer: WavWriter<BufWriter<File>>,
    sample_rate: u32,
    frames_written: u64,
}

impl WavRecorder {
    /// Create a new recorder
    ///
    /// # Arguments
    /// * `path` - Output file path
    /// * `sample_rate` - Sample rate in Hz
    pub fn new(path: &Path, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };

        let writer = WavWriter::create(path, spec)
            .with_context(|| format!("failed to create WAV file: {:?}", path))?;

        Ok(Self {
            writer,
            sample_rate,
            frames_written: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Get the duration recorded in seconds
    pub fn duration_secs(&self) -> f64 {
        self.frames_written as f64 / self.sample_rate as f64
    }

    pub fn write_frame(&mut self, frame: Frame) -> Result<()> {
        self.writer
            .write_sample(frame.left as f32)
            .context("failed to write sample")?;
        self.writer
            .write_sample(frame.right as f32)
            .context("failed to write sample")?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn write_frames(&mut self, frames: &[Frame]) -> Result<()> {
        for &frame in frames {
            self.write_frame(frame)?;
        }
        Ok(())
    }

    /// Finalize the WAV file
    ///
    /// This must be called to properly close the file and write the header.
    pub fn finalize(self) -> Result<()> {
        self.writer.finalize().context("failed to finalize WAV file")
    }
}

struct Stem {
    tap: StemTap,
    writer: Option<(WavRecorder, PathBuf)>,
}

/// Writes each entity's tap to its own WAV file in a directory
pub struct WavStemRecorder {
    dir: PathBuf,
    sample_rate: u32,
    stems: HashMap<String, Stem>,
    recording: bool,
    session: u32,
    /// Every file handed out, so a returning entity never truncates one
    issued: HashSet<PathBuf>,
    finished: Vec<PathBuf>,
}

impl WavStemRecorder {
    pub fn new(dir: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            dir: dir.into(),
            sample_rate,
            stems: HashMap::new(),
            recording: false,
            session: 0,
            issued: HashSet::new(),
            finished: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Entities with an attached tap
    pub fn active_stems(&self) -> Vec<String> {
        let mut stems: Vec<String> = self.stems.keys().cloned().collect();
        stems.sort();
        stems
    }

    /// Files closed so far
    pub fn finished_files(&self) -> &[PathBuf] {
        &self.finished
    }

    /// Next unused file for an entity in this session. Later visits and ids
    /// that sanitize to the same name get a `_<n>` suffix.
    fn next_stem_path(&mut self, entity_id: &str) -> PathBuf {
        let name: String = entity_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let base = format!("stem_{}_{:03}", name, self.session);

        let mut path = self.dir.join(format!("{}.wav", base));
        let mut n = 1;
        while self.issued.contains(&path) {
            n += 1;
            path = self.dir.join(format!("{}_{}.wav", base, n));
        }
        self.issued.insert(path.clone());
        path
    }

    fn open(&mut self, entity_id: &str, stem: &mut Stem) -> Result<()> {
        if stem.writer.is_some() {
            return Ok(());
        }
        let path = self.next_stem_path(entity_id);
        stem.writer = Some((WavRecorder::new(&path, self.sample_rate)?, path.clone()));
        stem.tap.drain();
        stem.tap.arm();
        debug!(entity = entity_id, path = ?path, "stem opened");
        Ok(())
    }

    fn close(&mut self, entity_id: &str, mut stem: Stem) -> Result<()> {
        stem.tap.disarm();
        if let Some((mut writer, path)) = stem.writer.take() {
            writer.write_frames(&stem.tap.drain())?;
            writer.finalize()?;
            debug!(entity = entity_id, path = ?path, "stem closed");
            self.finished.push(path);
        }
        Ok(())
    }
}

impl StemRecorder for WavStemRecorder {
    fn add_stem(&mut self, entity_id: &str, tap: StemTap) {
        if self.stems.contains_key(entity_id) {
            return;
        }
        let mut stem = Stem { tap, writer: None };
        if self.recording {
            if let Err(e) = self.open(entity_id, &mut stem) {
                warn!(entity = entity_id, error = %e, "failed to open stem");
            }
        }
        self.stems.insert(entity_id.to_string(), stem);
    }

    fn remove_stem(&mut self, entity_id: &str) {
        let Some(stem) = self.stems.remove(entity_id) else {
            return;
        };
        if let Err(e) = self.close(entity_id, stem) {
            warn!(entity = entity_id, error = %e, "failed to close stem");
        }
    }

    fn start_all(&mut self) -> Result<()> {
        if self.recording {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create stem directory: {:?}", self.dir))?;
        self.recording = true;
        self.session += 1;

        let mut stems = std::mem::take(&mut self.stems);
        let result = stems
            .iter_mut()
            .try_for_each(|(entity_id, stem)| self.open(entity_id, stem));
        self.stems = stems;
        result
    }

    fn stop_all(&mut self) -> Result<()> {
        self.recording = false;
        let mut first_error = None;
        for (entity_id, stem) in std::mem::take(&mut self.stems) {
            let tap = stem.tap.clone();
            if let Err(e) = self.close(&entity_id, stem) {
                first_error.get_or_insert(e);
            }
            // Still-live voices stay attached for the next session
            if !tap.is_closed() {
                self.stems.insert(entity_id, Stem { tap, writer: None });
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn flush(&mut self) -> Result<()> {
        let mut gone = Vec::new();
        for (entity_id, stem) in self.stems.iter_mut() {
            if let Some((writer, _)) = stem.writer.as_mut() {
                writer.write_frames(&stem.tap.drain())?;
            }
            if stem.tap.is_closed() {
                gone.push(entity_id.clone());
            }
        }
        for entity_id in gone {
            if let Some(stem) = self.stems.remove(&entity_id) {
                self.close(&entity_id, stem)?;
            }
        }
        Ok(())
    }
}
