//! In-memory [`VehicleLink`] that plays back scripted replies.
//!
//! Replies can be queued up front or released when the matching outbound
//! call happens (count sent, count requested, item requested). Position
//! samples come from a separate stream where `None` stands for a receive
//! window with no sample. Every outbound call is journaled.

use baton_proto::{MissionItem, Position};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::link::{Connector, Inbound, LinkError, MessageKind, VehicleLink};
use crate::modes::FlightMode;

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    SetMode(FlightMode),
    Arm,
    Disarm,
    Takeoff(f32),
    ClearAll,
    Count(u16),
    Item(u16),
    SetCurrent(u16),
    RequestCount,
    RequestItem(u16),
    RequestHome,
    MessageRate(MessageKind, f32),
    GroundSpeed(f32),
    Close,
}

pub type Journal = Arc<Mutex<Vec<Outbound>>>;

#[derive(Debug, Default)]
pub struct ScriptedLink {
    inbox: VecDeque<Inbound>,
    on_count: Vec<Inbound>,
    on_request_count: Vec<Inbound>,
    on_request_item: HashMap<u16, Inbound>,
    positions: VecDeque<Option<Position>>,
    failing_modes: Vec<FlightMode>,
    fail_arm: bool,
    closed: bool,
    journal: Journal,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message that is already waiting when the test starts.
    pub fn push(&mut self, msg: Inbound) {
        self.inbox.push_back(msg);
    }

    /// Replies released by the next `send_count`.
    pub fn on_count(&mut self, replies: Vec<Inbound>) {
        self.on_count = replies;
    }

    pub fn on_request_count(&mut self, replies: Vec<Inbound>) {
        self.on_request_count = replies;
    }

    pub fn on_request_item(&mut self, seq: u16, reply: Inbound) {
        self.on_request_item.insert(seq, reply);
    }

    pub fn positions(&mut self, samples: impl IntoIterator<Item = Option<Position>>) {
        self.positions.extend(samples);
    }

    pub fn fail_mode(&mut self, mode: FlightMode) {
        self.failing_modes.push(mode);
    }

    pub fn fail_arm(&mut self) {
        self.fail_arm = true;
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.journal.lock().map(|j| j.clone()).unwrap_or_default()
    }

    fn record(&mut self, out: Outbound) -> Result<(), LinkError> {
        if self.closed {
            return Err(LinkError::Closed);
        }
        if let Ok(mut j) = self.journal.lock() {
            j.push(out);
        }
        Ok(())
    }
}

impl VehicleLink for ScriptedLink {
    fn set_mode(&mut self, mode: FlightMode, timeout: Duration) -> Result<(), LinkError> {
        self.record(Outbound::SetMode(mode))?;
        if self.failing_modes.contains(&mode) {
            return Err(LinkError::ModeTimeout { mode, timeout });
        }
        Ok(())
    }

    fn arm(&mut self, timeout: Duration) -> Result<(), LinkError> {
        self.record(Outbound::Arm)?;
        if self.fail_arm {
            return Err(LinkError::ArmTimeout { armed: true, timeout });
        }
        Ok(())
    }

    fn disarm(&mut self, _timeout: Duration) -> Result<(), LinkError> {
        self.record(Outbound::Disarm)
    }

    fn send_takeoff(&mut self, alt_m: f32) -> Result<(), LinkError> {
        self.record(Outbound::Takeoff(alt_m))
    }

    fn send_clear_all(&mut self) -> Result<(), LinkError> {
        self.record(Outbound::ClearAll)
    }

    fn send_count(&mut self, count: u16) -> Result<(), LinkError> {
        self.record(Outbound::Count(count))?;
        let replies = std::mem::take(&mut self.on_count);
        self.inbox.extend(replies);
        Ok(())
    }

    fn send_item(&mut self, item: &MissionItem) -> Result<(), LinkError> {
        self.record(Outbound::Item(item.seq))
    }

    fn send_set_current(&mut self, seq: u16) -> Result<(), LinkError> {
        self.record(Outbound::SetCurrent(seq))
    }

    fn request_mission_count(&mut self) -> Result<(), LinkError> {
        self.record(Outbound::RequestCount)?;
        let replies = std::mem::take(&mut self.on_request_count);
        self.inbox.extend(replies);
        Ok(())
    }

    fn request_mission_item(&mut self, seq: u16) -> Result<(), LinkError> {
        self.record(Outbound::RequestItem(seq))?;
        if let Some(reply) = self.on_request_item.get(&seq) {
            self.inbox.push_back(reply.clone());
        }
        Ok(())
    }

    fn request_home_position(&mut self) -> Result<(), LinkError> {
        self.record(Outbound::RequestHome)
    }

    fn request_message_rate(&mut self, kind: MessageKind, hz: f32) -> Result<(), LinkError> {
        self.record(Outbound::MessageRate(kind, hz))
    }

    fn set_ground_speed(&mut self, speed_m_s: f32) -> Result<(), LinkError> {
        self.record(Outbound::GroundSpeed(speed_m_s))
    }

    fn recv(&mut self, filter: &[MessageKind], _timeout: Duration) -> Result<Option<Inbound>, LinkError> {
        if self.closed {
            return Err(LinkError::Closed);
        }
        if let Some(i) = self.inbox.iter().position(|m| filter.contains(&m.kind())) {
            return Ok(self.inbox.remove(i));
        }
        if filter.contains(&MessageKind::Position) {
            if let Some(Some(p)) = self.positions.pop_front() {
                return Ok(Some(Inbound::Position(p)));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        if !self.closed {
            let _ = self.record(Outbound::Close);
            self.closed = true;
        }
    }
}

/// Hands out one prepared [`ScriptedLink`], or refuses to connect.
#[derive(Debug)]
pub struct ScriptedConnector {
    address: String,
    link: Mutex<Option<ScriptedLink>>,
}

impl ScriptedConnector {
    pub fn new(link: ScriptedLink) -> Self {
        Self { address: "mock:0".into(), link: Mutex::new(Some(link)) }
    }

    /// A connector whose vehicle never sends a heartbeat.
    pub fn unreachable() -> Self {
        Self { address: "mock:unreachable".into(), link: Mutex::new(None) }
    }
}

impl Connector for ScriptedConnector {
    type Link = ScriptedLink;

    fn address(&self) -> &str {
        &self.address
    }

    fn connect(&self) -> Result<ScriptedLink, LinkError> {
        self.link
            .lock()
            .ok()
            .and_then(|mut l| l.take())
            .ok_or_else(|| LinkError::Connection { address: self.address.clone(), reason: "no heartbeat".into() })
    }
}
