use serde::{Deserialize, Serialize};

use crate::mission::e7_to_deg;
use crate::vehicle::VehicleKind;

/// One GLOBAL_POSITION_INT sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat_e7: i32,
    pub lon_e7: i32,
    pub relative_alt_m: f32,
}

impl Position {
    pub fn lat_deg(&self) -> f64 {
        e7_to_deg(self.lat_e7)
    }

    pub fn lon_deg(&self) -> f64 {
        e7_to_deg(self.lon_e7)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleOutcome {
    pub name: String,
    pub kind: VehicleKind,
    /// Last stage entered. For a failed run this is the failing stage.
    pub stage: String,
    pub ok: bool,
    pub error: Option<String>,
    pub items_uploaded: Option<usize>,
    pub started_unix_ms: i64,
    pub finished_unix_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub outcomes: Vec<VehicleOutcome>,
    pub interrupted: bool,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        !self.interrupted && self.outcomes.iter().all(|o| o.ok)
    }
}
