use baton_fc::query;
use baton_fc::{Connector, FlightMode, Inbound, MessageKind, MissionUploader, UploadReport, VehicleLink};
use baton_nav::ArrivalDetector;
use baton_proto::{MissionPlan, VehicleKind};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::SessionError;

/// Takeoff counts as done at this fraction of the commanded altitude.
const TAKEOFF_ALT_FRACTION: f32 = 0.95;

/// One `[[vehicle]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct VehicleConfig {
    pub name: String,
    /// `tcp:host:port`, `udpin:addr:port`, `serial:/dev/ttyUSB0[:baud]`, ...
    pub address: String,
    pub kind: VehicleKind,
    pub mission_file: Option<PathBuf>,
    #[serde(default = "default_takeoff_alt")]
    pub takeoff_alt_m: f32,
    pub ground_speed_m_s: Option<f32>,
}

fn default_takeoff_alt() -> f32 {
    3.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode_timeout_ms: u64,
    pub arm_timeout_ms: u64,
    pub takeoff_timeout_ms: u64,
    pub query_timeout_ms: u64,
    pub arrival_timeout_ms: u64,

    /// Wait for each MISSION_REQUEST / final ACK during upload.
    pub upload_request_timeout_ms: u64,
    pub clear_settle_ms: u64,

    /// GLOBAL_POSITION_INT rate requested right after connecting.
    pub position_rate_hz: f32,
    /// Longest wait for a single position sample before counting a gap.
    pub sample_window_ms: u64,

    pub arrival_threshold_m: f64,
    pub arrival_required: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode_timeout_ms: 10_000,
            arm_timeout_ms: 10_000,
            takeoff_timeout_ms: 30_000,
            query_timeout_ms: 5_000,
            arrival_timeout_ms: 30 * 60 * 1000,
            upload_request_timeout_ms: 30_000,
            clear_settle_ms: 200,
            position_rate_hz: 10.0,
            sample_window_ms: 1_000,
            arrival_threshold_m: 5.0,
            arrival_required: 5,
        }
    }
}

impl SessionConfig {
    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    pub fn uploader(&self) -> MissionUploader {
        MissionUploader::new(Self::ms(self.upload_request_timeout_ms), Self::ms(self.clear_settle_ms))
    }
}

/// The stages the orchestrator drives, in order. Implemented by
/// [`VehicleSession`] for real links.
pub trait Vehicle {
    fn name(&self) -> &str;
    fn kind(&self) -> VehicleKind;
    fn mission_file(&self) -> Option<&Path>;
    fn takeoff_alt_m(&self) -> f32;

    fn connect(&mut self) -> Result<(), SessionError>;
    fn upload(&mut self, plan: &MissionPlan) -> Result<UploadReport, SessionError>;
    fn arm(&mut self) -> Result<(), SessionError>;
    fn takeoff(&mut self, alt_m: f32) -> Result<(), SessionError>;
    fn start_mission(&mut self) -> Result<(), SessionError>;
    fn wait_mission_complete(&mut self) -> Result<(), SessionError>;

    /// Idempotent, never fails.
    fn close(&mut self);
}

pub struct VehicleSession<C: Connector> {
    vehicle: VehicleConfig,
    connector: C,
    cfg: SessionConfig,
    cancel: Arc<AtomicBool>,
    link: Option<C::Link>,
}

impl<C: Connector> VehicleSession<C> {
    pub fn new(vehicle: VehicleConfig, connector: C, cfg: SessionConfig, cancel: Arc<AtomicBool>) -> Self {
        Self { vehicle, connector, cfg, cancel, link: None }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Live link, for one-off operations outside the staged run.
    pub fn link_mut(&mut self) -> Result<&mut C::Link, SessionError> {
        self.link.as_mut().ok_or(SessionError::NotConnected)
    }

    fn check_cancel(&self) -> Result<(), SessionError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(SessionError::Interrupted);
        }
        Ok(())
    }

    /// Where the mission ends: the last item, or home when the last item
    /// carries no coordinates (a bare return-to-launch). The flag marks the
    /// home case, where the vehicle starts inside the threshold.
    fn final_target(&mut self, count: u16) -> Result<(f64, f64, bool), SessionError> {
        let timeout = SessionConfig::ms(self.cfg.query_timeout_ms);
        let name = self.vehicle.name.clone();
        let link = self.link_mut()?;

        let last = query::mission_item(link, count - 1, timeout)?;
        if last.x != 0 || last.y != 0 {
            info!(vehicle = %name, "final waypoint seq={} at ({:.7}, {:.7})", last.seq, last.lat_deg(), last.lon_deg());
            return Ok((last.lat_deg(), last.lon_deg(), false));
        }

        debug!(vehicle = %name, "last item {:?} has no coordinates, waiting for home instead", last.command);
        let (lat, lon) = query::home_position(link, timeout)?;
        info!(vehicle = %name, "final target is home ({:.7}, {:.7})", lat, lon);
        Ok((lat, lon, true))
    }
}

impl<C: Connector> Vehicle for VehicleSession<C> {
    fn name(&self) -> &str {
        &self.vehicle.name
    }

    fn kind(&self) -> VehicleKind {
        self.vehicle.kind
    }

    fn mission_file(&self) -> Option<&Path> {
        self.vehicle.mission_file.as_deref()
    }

    fn takeoff_alt_m(&self) -> f32 {
        self.vehicle.takeoff_alt_m
    }

    fn connect(&mut self) -> Result<(), SessionError> {
        self.check_cancel()?;
        info!(vehicle = %self.vehicle.name, "connecting to {}", self.connector.address());
        let mut link = self.connector.connect().map_err(SessionError::Connection)?;

        link.request_message_rate(MessageKind::Position, self.cfg.position_rate_hz)?;
        if let Some(speed) = self.vehicle.ground_speed_m_s {
            link.set_ground_speed(speed)?;
            debug!(vehicle = %self.vehicle.name, "ground speed set to {:.1} m/s", speed);
        }

        self.link = Some(link);
        info!(vehicle = %self.vehicle.name, "connected ({})", self.vehicle.kind);
        Ok(())
    }

    fn upload(&mut self, plan: &MissionPlan) -> Result<UploadReport, SessionError> {
        self.check_cancel()?;
        let uploader = self.cfg.uploader().with_cancel(self.cancel.clone());
        let name = self.vehicle.name.clone();
        let link = self.link_mut()?;
        info!(vehicle = %name, "uploading {} mission items", plan.len());
        Ok(uploader.upload(link, plan)?)
    }

    fn arm(&mut self) -> Result<(), SessionError> {
        self.check_cancel()?;
        let mode_timeout = SessionConfig::ms(self.cfg.mode_timeout_ms);
        let arm_timeout = SessionConfig::ms(self.cfg.arm_timeout_ms);
        let link = self.link_mut()?;

        link.set_mode(FlightMode::Guided, mode_timeout).map_err(SessionError::from_command)?;
        link.arm(arm_timeout).map_err(SessionError::from_command)?;
        info!(vehicle = %self.vehicle.name, "armed in {}", FlightMode::Guided);
        Ok(())
    }

    fn takeoff(&mut self, alt_m: f32) -> Result<(), SessionError> {
        if !self.vehicle.kind.is_airborne() {
            debug!(vehicle = %self.vehicle.name, "{} does not take off", self.vehicle.kind);
            return Ok(());
        }
        self.check_cancel()?;

        let timeout = SessionConfig::ms(self.cfg.takeoff_timeout_ms);
        let window = SessionConfig::ms(self.cfg.sample_window_ms);
        let name = self.vehicle.name.clone();
        let cancel = self.cancel.clone();
        let link = self.link_mut()?;

        link.send_takeoff(alt_m)?;
        info!(vehicle = %name, "takeoff to {:.1} m", alt_m);

        let goal = alt_m * TAKEOFF_ALT_FRACTION;
        let deadline = Instant::now() + timeout;
        let mut last_m = 0.0f32;
        while Instant::now() < deadline {
            if cancel.load(Ordering::Relaxed) {
                return Err(SessionError::Interrupted);
            }
            match link.recv(&[MessageKind::Position, MessageKind::StatusText], window)? {
                Some(Inbound::Position(p)) => {
                    if (p.relative_alt_m - last_m).abs() >= 0.5 {
                        debug!(vehicle = %name, "altitude {:.1} m", p.relative_alt_m);
                    }
                    last_m = p.relative_alt_m;
                    if last_m >= goal {
                        info!(vehicle = %name, "reached {:.1} m", last_m);
                        return Ok(());
                    }
                }
                Some(Inbound::StatusText { severity, text }) => info!(vehicle = %name, severity, "{}", text),
                _ => {}
            }
        }
        Err(SessionError::TakeoffAltitudeTimeout { target_m: alt_m, last_m, timeout })
    }

    fn start_mission(&mut self) -> Result<(), SessionError> {
        self.check_cancel()?;
        let timeout = SessionConfig::ms(self.cfg.mode_timeout_ms);
        let link = self.link_mut()?;
        link.set_mode(FlightMode::Auto, timeout).map_err(SessionError::from_command)?;
        info!(vehicle = %self.vehicle.name, "mission started");
        Ok(())
    }

    fn wait_mission_complete(&mut self) -> Result<(), SessionError> {
        self.check_cancel()?;
        let query_timeout = SessionConfig::ms(self.cfg.query_timeout_ms);
        let name = self.vehicle.name.clone();

        let count = query::mission_count(self.link_mut()?, query_timeout)?;
        info!(vehicle = %name, "mission has {} items", count);
        if count == 0 {
            warn!(vehicle = %name, "no mission on the vehicle, nothing to wait for");
            return Ok(());
        }

        let (lat, lon, home) = self.final_target(count)?;
        let mut detector = ArrivalDetector::new(lat, lon, self.cfg.arrival_threshold_m, self.cfg.arrival_required);
        if home {
            detector = detector.after_departure();
        }

        let timeout = SessionConfig::ms(self.cfg.arrival_timeout_ms);
        let window = SessionConfig::ms(self.cfg.sample_window_ms);
        let required = self.cfg.arrival_required;
        let cancel = self.cancel.clone();
        let link = self.link_mut()?;

        let deadline = Instant::now() + timeout;
        let mut last_distance_m = f64::INFINITY;
        while Instant::now() < deadline {
            if cancel.load(Ordering::Relaxed) {
                return Err(SessionError::Interrupted);
            }
            match link.recv(&[MessageKind::Position, MessageKind::StatusText], window)? {
                Some(Inbound::Position(p)) => {
                    let u = detector.observe(p.lat_deg(), p.lon_deg());
                    last_distance_m = u.distance_m;
                    if u.report {
                        if detector.has_departed() {
                            info!(vehicle = %name, "{:.1} m to final waypoint", u.distance_m);
                        } else {
                            info!(vehicle = %name, "{:.1} m from home, waiting for departure", u.distance_m);
                        }
                    }
                    if u.arrived {
                        info!(vehicle = %name, "final waypoint reached ({:.1} m, {}/{})", u.distance_m, u.confirmations, required);
                        return Ok(());
                    }
                    if u.confirmations > 0 {
                        debug!(vehicle = %name, "closing in: {:.1} m ({}/{})", u.distance_m, u.confirmations, required);
                    }
                }
                Some(Inbound::StatusText { severity, text }) => info!(vehicle = %name, severity, "{}", text),
                _ => detector.missed(),
            }
        }

        warn!(vehicle = %name, "gave up after {} samples without position", detector.missed_samples());
        Err(SessionError::ArrivalTimeout { timeout, last_distance_m })
    }

    fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
            info!(vehicle = %self.vehicle.name, "link closed");
        }
    }
}

impl<C: Connector> Drop for VehicleSession<C> {
    fn drop(&mut self) {
        self.close();
    }
}
