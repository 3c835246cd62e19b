use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleKind {
    Rover,
    Boat,
    Copter,
}

impl VehicleKind {
    /// Only airborne vehicles take off before a mission.
    pub fn is_airborne(self) -> bool {
        matches!(self, VehicleKind::Copter)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VehicleKind::Rover => "rover",
            VehicleKind::Boat => "boat",
            VehicleKind::Copter => "copter",
        }
    }
}

impl fmt::Display for VehicleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
