//! Simulated flight traffic
//!
//! Generates `flight` packets for a handful of synthetic aircraft with
//! random arrivals and departures. Stands in for a live ADS-B feed in demos,
//! offline renders and tests.

use super::{DataEvent, DataPacket, DataSource, SourceInfo, SourceMessage, SourceStatus};
use super::packet::now_millis;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Packet `source_type` emitted by the simulator
pub const FLIGHT_SOURCE_TYPE: &str = "flight";

const MAX_ALTITUDE_M: f64 = 13_716.0;
const MAX_VELOCITY_MS: f64 = 280.0;
const MAX_VERTICAL_RATE_MS: f64 = 15.0;
const EMERGENCY_PROBABILITY: f64 = 0.002;

/// Simulator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Number of aircraft kept in the air
    #[serde(default = "default_aircraft")]
    pub aircraft: usize,

    /// Milliseconds between updates
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Per-aircraft chance of leaving on each update
    #[serde(default = "default_churn")]
    pub churn: f64,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_aircraft() -> usize { 6 }
fn default_interval_ms() -> u64 { 500 }
fn default_churn() -> f64 { 0.02 }
fn default_seed() -> u64 { 7 }

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            aircraft: default_aircraft(),
            interval_ms: default_interval_ms(),
            churn: default_churn(),
            seed: default_seed(),
        }
    }
}

impl SimulatorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

#[derive(Debug, Clone)]
struct Aircraft {
    hex: String,
    altitude: f64,
    velocity: f64,
    heading: f64,
    vertical_rate: f64,
    latitude: f64,
    longitude: f64,
}

impl Aircraft {
    fn spawn(rng: &mut StdRng) -> Self {
        Self {
            hex: format!("{:06x}", rng.gen_range(0..0xFF_FFFFu32)),
            altitude: rng.gen_range(0.0..MAX_ALTITUDE_M),
            velocity: rng.gen_range(60.0..MAX_VELOCITY_MS),
            heading: rng.gen_range(0.0..360.0),
            vertical_rate: rng.gen_range(-5.0..5.0),
            latitude: rng.gen_range(30.0..50.0),
            longitude: rng.gen_range(-120.0..-70.0),
        }
    }

    fn step(&mut self, rng: &mut StdRng, dt: f64) {
        self.vertical_rate = (self.vertical_rate + rng.gen_range(-1.0..1.0))
            .clamp(-MAX_VERTICAL_RATE_MS, MAX_VERTICAL_RATE_MS);
        self.altitude = (self.altitude + self.vertical_rate * dt).clamp(0.0, MAX_ALTITUDE_M);
        self.velocity = (self.velocity + rng.gen_range(-2.0..2.0)).clamp(0.0, MAX_VELOCITY_MS);
        self.heading = (self.heading + rng.gen_range(-3.0..3.0)).rem_euclid(360.0);

        // ~111 km per degree
        let distance_deg = self.velocity * dt / 111_000.0;
        let heading_rad = self.heading.to_radians();
        self.latitude = (self.latitude + distance_deg * heading_rad.cos()).clamp(-90.0, 90.0);
        self.longitude = ((self.longitude + distance_deg * heading_rad.sin()) + 180.0)
            .rem_euclid(360.0)
            - 180.0;
    }

    fn packet(&self) -> DataPacket {
        use super::ContinuousValue as Cv;

        DataPacket::new(FLIGHT_SOURCE_TYPE, &self.hex)
            .with_continuous("altitude", Cv::new(self.altitude, 0.0, MAX_ALTITUDE_M, "m"))
            .with_continuous("velocity", Cv::new(self.velocity, 0.0, MAX_VELOCITY_MS, "m/s"))
            .with_continuous("heading", Cv::new(self.heading, 0.0, 360.0, "deg"))
            .with_continuous(
                "verticalRate",
                Cv::new(self.vertical_rate, -MAX_VERTICAL_RATE_MS, MAX_VERTICAL_RATE_MS, "m/s"),
            )
            .with_continuous("latitude", Cv::new(self.latitude, -90.0, 90.0, "deg"))
            .with_continuous("longitude", Cv::new(self.longitude, -180.0, 180.0, "deg"))
    }
}

/// Deterministic traffic model, advanced one update at a time
pub struct FlightTraffic {
    config: SimulatorConfig,
    rng: StdRng,
    aircraft: Vec<Aircraft>,
}

impl FlightTraffic {
    pub fn new(config: SimulatorConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let aircraft = (0..config.aircraft).map(|_| Aircraft::spawn(&mut rng)).collect();
        Self { config, rng, aircraft }
    }

    /// Number of aircraft currently tracked
    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    /// Advance the model by one update interval
    pub fn step(&mut self) -> Vec<SourceMessage> {
        let dt = self.config.interval().as_secs_f64();
        let mut messages = Vec::with_capacity(self.aircraft.len() + 2);

        // Departures
        let churn = self.config.churn.clamp(0.0, 1.0);
        let mut departed = Vec::new();
        let rng = &mut self.rng;
        self.aircraft.retain(|a| {
            if rng.gen_bool(churn) {
                departed.push(a.hex.clone());
                false
            } else {
                true
            }
        });
        messages.extend(departed.into_iter().map(SourceMessage::EntityRemoved));

        for aircraft in &mut self.aircraft {
            aircraft.step(&mut self.rng, dt);
            let mut packet = aircraft.packet();
            if self.rng.gen_bool(EMERGENCY_PROBABILITY) {
                packet = packet.with_event(DataEvent::new("emergency", 1.0).with_metadata("squawk", "7700"));
            }
            if aircraft.altitude <= 0.0 {
                packet = packet.with_event(DataEvent::new("on_ground", 0.2));
            }
            messages.push(SourceMessage::Data(packet));
        }

        // Arrivals keep the sky at the configured size
        while self.aircraft.len() < self.config.aircraft {
            let aircraft = Aircraft::spawn(&mut self.rng);
            let packet = aircraft
                .packet()
                .with_event(DataEvent::new("new_contact", 0.3).with_metadata("hex", aircraft.hex.clone()));
            messages.push(SourceMessage::Data(packet));
            self.aircraft.push(aircraft);
        }

        messages
    }

    /// Messages that announce the departure of every tracked aircraft
    pub fn clear(&mut self) -> Vec<SourceMessage> {
        self.aircraft
            .drain(..)
            .map(|a| SourceMessage::EntityRemoved(a.hex))
            .collect()
    }
}

/// Source that runs [`FlightTraffic`] on a tokio interval
pub struct FlightSimulator {
    config: SimulatorConfig,
    info: Arc<Mutex<SourceInfo>>,
    running: Arc<AtomicBool>,
    sender: broadcast::Sender<SourceMessage>,
    task: Option<JoinHandle<()>>,
}

impl FlightSimulator {
    pub fn new(name: impl Into<String>, config: SimulatorConfig) -> Self {
        let name = name.into();
        let (sender, _) = broadcast::channel(256);
        let info = SourceInfo::new(format!("sim-{}", name), name, FLIGHT_SOURCE_TYPE);
        Self {
            config,
            info: Arc::new(Mutex::new(info)),
            running: Arc::new(AtomicBool::new(false)),
            sender,
            task: None,
        }
    }

    fn publish_status(&self, status: SourceStatus) {
        if let Ok(mut info) = self.info.lock() {
            info.status = status;
            let _ = self.sender.send(SourceMessage::Status(info.clone()));
        }
    }
}

impl DataSource for FlightSimulator {
    fn info(&self) -> SourceInfo {
        match self.info.lock() {
            Ok(info) => info.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn start(&mut self) -> anyhow::Result<()> {
        if self.is_running() {
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);
        self.publish_status(SourceStatus::Connected);

        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let sender = self.sender.clone();
        let info = Arc::clone(&self.info);

        let task = tokio::spawn(async move {
            let mut traffic = FlightTraffic::new(config.clone());
            let mut ticker = tokio::time::interval(config.interval());

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                for message in traffic.step() {
                    // Ignore errors if no receivers
                    let _ = sender.send(message);
                }
                if let Ok(mut info) = info.lock() {
                    info.entity_count = traffic.len();
                    info.last_update = now_millis();
                }
            }

            for message in traffic.clear() {
                let _ = sender.send(message);
            }
        });

        self.task = Some(task);
        tracing::info!(source = %self.info().name, "flight simulator started");
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
            self.publish_status(SourceStatus::Disconnected);
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<SourceMessage> {
        self.sender.subscribe()
    }
}

impl Drop for FlightSimulator {
    fn drop(&mut self) {
        self.stop();
    }
}
