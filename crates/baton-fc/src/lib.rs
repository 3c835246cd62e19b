pub mod link;
pub mod mav;
pub mod modes;
pub mod query;
pub mod upload;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use link::{Connector, Inbound, LinkError, MessageKind, MissionResult, VehicleLink};
pub use modes::FlightMode;
pub use upload::{MissionUploader, UploadError, UploadReport};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// MAVLink ids we use (ground side)
    pub sys_id: u8,
    pub comp_id: u8,

    /// How long `connect` waits for the first vehicle HEARTBEAT.
    pub heartbeat_timeout_ms: u64,

    /// Serial baud used when the address has none (`serial:/dev/ttyUSB0`).
    pub default_baud: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            sys_id: 1,
            comp_id: 90,
            heartbeat_timeout_ms: 10_000,
            default_baud: 57_600,
        }
    }
}
