use baton_proto::telemetry::{RunReport, VehicleOutcome};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{SessionError, Stage};
use crate::session::Vehicle;

const PAUSE_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Pause between one vehicle finishing and the next connecting.
    pub settle_ms: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self { settle_ms: 2_000 }
    }
}

/// Runs vehicles one after another. The first failing stage ends the whole
/// run; every vehicle is closed afterwards either way.
pub struct Orchestrator<V: Vehicle> {
    vehicles: Vec<V>,
    settle: Duration,
    cancel: Arc<AtomicBool>,
}

impl<V: Vehicle> Orchestrator<V> {
    pub fn new(vehicles: Vec<V>, cfg: &FleetConfig, cancel: Arc<AtomicBool>) -> Self {
        Self { vehicles, settle: Duration::from_millis(cfg.settle_ms), cancel }
    }

    pub fn vehicles(&self) -> &[V] {
        &self.vehicles
    }

    pub fn run(&mut self) -> RunReport {
        let mut report = RunReport::default();
        let total = self.vehicles.len();

        for i in 0..total {
            if i > 0 && !pause(self.settle, &self.cancel) {
                report.interrupted = true;
                break;
            }
            if self.cancel.load(Ordering::Relaxed) {
                report.interrupted = true;
                break;
            }

            let v = &mut self.vehicles[i];
            info!(vehicle = %v.name(), "--- vehicle {}/{} ({}) ---", i + 1, total, v.kind());
            let mut outcome = VehicleOutcome {
                name: v.name().to_string(),
                kind: v.kind(),
                stage: Stage::Connect.to_string(),
                ok: false,
                error: None,
                items_uploaded: None,
                started_unix_ms: now_unix_ms(),
                finished_unix_ms: 0,
            };

            let res = drive(v, &mut outcome);
            outcome.finished_unix_ms = now_unix_ms();
            match res {
                Ok(()) => {
                    outcome.ok = true;
                    outcome.stage = Stage::Done.to_string();
                    info!(vehicle = %outcome.name, "run complete");
                    report.outcomes.push(outcome);
                }
                Err(e) => {
                    error!(vehicle = %outcome.name, stage = %outcome.stage, "{}", e);
                    report.interrupted = matches!(e, SessionError::Interrupted);
                    outcome.error = Some(e.to_string());
                    report.outcomes.push(outcome);
                    if total > i + 1 {
                        warn!("skipping {} remaining vehicle(s)", total - i - 1);
                    }
                    break;
                }
            }
        }

        self.close_all();
        report
    }

    fn close_all(&mut self) {
        for v in self.vehicles.iter_mut() {
            v.close();
        }
    }
}

fn drive<V: Vehicle>(v: &mut V, outcome: &mut VehicleOutcome) -> Result<(), SessionError> {
    enter(outcome, Stage::Connect);
    v.connect()?;

    if let Some(path) = v.mission_file().map(|p| p.to_path_buf()) {
        enter(outcome, Stage::Upload);
        let plan = baton_nav::load_plan(&path);
        if plan.is_empty() {
            warn!(vehicle = %v.name(), "no usable items in {}, flying the mission already on board", path.display());
        } else {
            outcome.items_uploaded = Some(v.upload(&plan)?.sent);
        }
    }

    enter(outcome, Stage::Arm);
    v.arm()?;

    if v.kind().is_airborne() {
        enter(outcome, Stage::Takeoff);
        let alt = v.takeoff_alt_m();
        v.takeoff(alt)?;
    }

    enter(outcome, Stage::StartMission);
    v.start_mission()?;

    enter(outcome, Stage::WaitComplete);
    v.wait_mission_complete()
}

fn enter(outcome: &mut VehicleOutcome, stage: Stage) {
    outcome.stage = stage.to_string();
}

/// Sleeps in slices so a cancel request is noticed. False when cancelled.
fn pause(d: Duration, cancel: &AtomicBool) -> bool {
    let mut left = d;
    while !left.is_zero() {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        let step = left.min(PAUSE_SLICE);
        std::thread::sleep(step);
        left -= step;
    }
    !cancel.load(Ordering::Relaxed)
}

fn now_unix_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
