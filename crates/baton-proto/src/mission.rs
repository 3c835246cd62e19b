use serde::{Deserialize, Serialize};

/// Coordinate frame of a mission item, using MAV_FRAME numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissionFrame {
    Global,
    LocalNed,
    Mission,
    GlobalRelativeAlt,
    LocalEnu,
    GlobalInt,
    GlobalRelativeAltInt,
    GlobalTerrainAlt,
    GlobalTerrainAltInt,
    Other(u8),
}

impl MissionFrame {
    pub fn from_raw(v: u8) -> Self {
        match v {
            0 => Self::Global,
            1 => Self::LocalNed,
            2 => Self::Mission,
            3 => Self::GlobalRelativeAlt,
            4 => Self::LocalEnu,
            5 => Self::GlobalInt,
            6 => Self::GlobalRelativeAltInt,
            10 => Self::GlobalTerrainAlt,
            11 => Self::GlobalTerrainAltInt,
            other => Self::Other(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            Self::Global => 0,
            Self::LocalNed => 1,
            Self::Mission => 2,
            Self::GlobalRelativeAlt => 3,
            Self::LocalEnu => 4,
            Self::GlobalInt => 5,
            Self::GlobalRelativeAltInt => 6,
            Self::GlobalTerrainAlt => 10,
            Self::GlobalTerrainAltInt => 11,
            Self::Other(v) => v,
        }
    }
}

/// Mission command (MAV_CMD id). Commands the planner does not emit itself
/// travel through as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissionCommand {
    Waypoint,
    LoiterUnlimited,
    ReturnToLaunch,
    Land,
    Takeoff,
    ChangeSpeed,
    SetRoi,
    Other(u16),
}

impl MissionCommand {
    pub fn from_raw(v: u16) -> Self {
        match v {
            16 => Self::Waypoint,
            17 => Self::LoiterUnlimited,
            20 => Self::ReturnToLaunch,
            21 => Self::Land,
            22 => Self::Takeoff,
            178 => Self::ChangeSpeed,
            201 => Self::SetRoi,
            other => Self::Other(other),
        }
    }

    pub fn raw(self) -> u16 {
        match self {
            Self::Waypoint => 16,
            Self::LoiterUnlimited => 17,
            Self::ReturnToLaunch => 20,
            Self::Land => 21,
            Self::Takeoff => 22,
            Self::ChangeSpeed => 178,
            Self::SetRoi => 201,
            Self::Other(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionItem {
    pub seq: u16,
    pub frame: MissionFrame,
    pub command: MissionCommand,
    pub current: bool,
    pub autocontinue: bool,
    pub param1: f32,
    pub param2: f32,
    pub param3: f32,
    pub param4: f32,
    /// Latitude, degrees * 1e7
    pub x: i32,
    /// Longitude, degrees * 1e7
    pub y: i32,
    /// Altitude in metres, meaning depends on `frame`
    pub z: f32,
}

impl MissionItem {
    pub fn lat_deg(&self) -> f64 {
        e7_to_deg(self.x)
    }

    pub fn lon_deg(&self) -> f64 {
        e7_to_deg(self.y)
    }
}

/// Degrees to the fixed-point wire representation, rounded to nearest.
pub fn deg_to_e7(deg: f64) -> i32 {
    (deg * 1e7).round() as i32
}

pub fn e7_to_deg(v: i32) -> f64 {
    v as f64 / 1e7
}

/// Ordered command sequence. Built once, then only read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionPlan {
    items: Vec<MissionItem>,
}

impl MissionPlan {
    pub fn from_items(items: Vec<MissionItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[MissionItem] {
        &self.items
    }

    pub fn get(&self, seq: u16) -> Option<&MissionItem> {
        self.items.get(seq as usize)
    }

    pub fn last(&self) -> Option<&MissionItem> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MissionItem> {
        self.items.iter()
    }
}

impl<'a> IntoIterator for &'a MissionPlan {
    type Item = &'a MissionItem;
    type IntoIter = std::slice::Iter<'a, MissionItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
