use baton_proto::{MissionItem, Position, VehicleKind};
use std::time::Duration;
use thiserror::Error;

use crate::modes::FlightMode;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("connect {address}: {reason}")]
    Connection { address: String, reason: String },

    #[error("mode {mode} not reported within {timeout:?}")]
    ModeTimeout { mode: FlightMode, timeout: Duration },

    #[error("mode {mode} does not exist on a {kind}")]
    UnsupportedMode { mode: FlightMode, kind: VehicleKind },

    #[error("vehicle not {} within {timeout:?}", arm_word(.armed))]
    ArmTimeout { armed: bool, timeout: Duration },

    #[error("mavlink send: {0}")]
    Send(String),

    #[error("link closed")]
    Closed,
}

fn arm_word(armed: &bool) -> &'static str {
    if *armed { "armed" } else { "disarmed" }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissionResult {
    Accepted,
    Rejected(String),
}

impl MissionResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, MissionResult::Accepted)
    }
}

/// Filter tags for [`VehicleLink::recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    MissionRequest,
    MissionAck,
    MissionCount,
    MissionItem,
    Position,
    Heartbeat,
    Home,
    StatusText,
}

/// Everything the ground side consumes from a vehicle. Other traffic is
/// dropped by the link.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    MissionRequest { seq: u16 },
    MissionAck { result: MissionResult },
    MissionCount { count: u16 },
    MissionItem(MissionItem),
    Position(Position),
    Heartbeat { custom_mode: u32, armed: bool },
    Home { lat_e7: i32, lon_e7: i32, alt_m: f32 },
    StatusText { severity: u8, text: String },
}

impl Inbound {
    pub fn kind(&self) -> MessageKind {
        match self {
            Inbound::MissionRequest { .. } => MessageKind::MissionRequest,
            Inbound::MissionAck { .. } => MessageKind::MissionAck,
            Inbound::MissionCount { .. } => MessageKind::MissionCount,
            Inbound::MissionItem(_) => MessageKind::MissionItem,
            Inbound::Position(_) => MessageKind::Position,
            Inbound::Heartbeat { .. } => MessageKind::Heartbeat,
            Inbound::Home { .. } => MessageKind::Home,
            Inbound::StatusText { .. } => MessageKind::StatusText,
        }
    }
}

/// A live connection to one vehicle.
///
/// `send_*`/`request_*` calls are fire-and-forget; replies arrive through
/// [`recv`](VehicleLink::recv). `set_mode`, `arm` and `disarm` block until
/// the vehicle's heartbeat confirms the change or the timeout passes.
pub trait VehicleLink {
    fn set_mode(&mut self, mode: FlightMode, timeout: Duration) -> Result<(), LinkError>;
    fn arm(&mut self, timeout: Duration) -> Result<(), LinkError>;
    fn disarm(&mut self, timeout: Duration) -> Result<(), LinkError>;

    fn send_takeoff(&mut self, alt_m: f32) -> Result<(), LinkError>;
    fn send_clear_all(&mut self) -> Result<(), LinkError>;
    fn send_count(&mut self, count: u16) -> Result<(), LinkError>;
    fn send_item(&mut self, item: &MissionItem) -> Result<(), LinkError>;
    fn send_set_current(&mut self, seq: u16) -> Result<(), LinkError>;
    fn request_mission_count(&mut self) -> Result<(), LinkError>;
    fn request_mission_item(&mut self, seq: u16) -> Result<(), LinkError>;
    fn request_home_position(&mut self) -> Result<(), LinkError>;
    fn request_message_rate(&mut self, kind: MessageKind, hz: f32) -> Result<(), LinkError>;
    fn set_ground_speed(&mut self, speed_m_s: f32) -> Result<(), LinkError>;

    /// Next message matching `filter`, waiting at most `timeout`.
    /// `Duration::ZERO` only looks at what is already queued.
    fn recv(&mut self, filter: &[MessageKind], timeout: Duration) -> Result<Option<Inbound>, LinkError>;

    fn close(&mut self);
}

/// Opens a [`VehicleLink`]; fails when no heartbeat shows up in time.
pub trait Connector {
    type Link: VehicleLink;

    fn address(&self) -> &str;
    fn connect(&self) -> Result<Self::Link, LinkError>;
}
