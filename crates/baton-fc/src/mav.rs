use baton_proto::{MissionCommand, MissionFrame, MissionItem, Position, VehicleKind};
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavFrame, MavMessage, MavMissionResult, MavModeFlag, MavState, MavType,
        COMMAND_LONG_DATA, HEARTBEAT_DATA, MISSION_CLEAR_ALL_DATA, MISSION_COUNT_DATA, MISSION_ITEM_INT_DATA,
        MISSION_REQUEST_INT_DATA, MISSION_REQUEST_LIST_DATA, MISSION_SET_CURRENT_DATA,
    },
    error::MessageReadError,
    MavConnection, MavHeader,
};
use num_traits::FromPrimitive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::link::{Connector, Inbound, LinkError, MessageKind, MissionResult, VehicleLink};
use crate::modes::FlightMode;
use crate::LinkConfig;

const GCS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

type Conn = Arc<dyn MavConnection<MavMessage> + Send + Sync>;

/// MAVLink connection to one vehicle. A reader thread feeds a channel so
/// every receive can be bounded by a timeout.
pub struct MavLink {
    conn: Conn,
    rx: mpsc::Receiver<(MavHeader, MavMessage)>,
    stop: Arc<AtomicBool>,
    hdr: MavHeader,
    address: String,
    kind: VehicleKind,
    target_sys: u8,
    target_comp: u8,
    custom_mode: Option<u32>,
    armed: bool,
    last_hb_sent: Option<Instant>,
    closed: bool,
}

impl MavLink {
    pub fn connect(address: &str, kind: VehicleKind, cfg: &LinkConfig) -> Result<Self, LinkError> {
        let url = normalize_address(address, cfg.default_baud);
        let fail = |reason: String| LinkError::Connection { address: url.clone(), reason };

        if let Some((dev, baud)) = serial_device(&url) {
            // open and release the port once so a missing device fails by name
            drop(
                tokio_serial::new(dev, baud)
                    .open()
                    .map_err(|e| fail(format!("open serial device {}: {}", dev, e)))?,
            );
        }

        let conn: Conn = mavlink::connect::<MavMessage>(&url)
            .map(Arc::from)
            .map_err(|e| fail(format!("mavlink connect: {}", e)))?;

        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        spawn_reader(conn.clone(), tx, stop.clone(), &url).map_err(|e| fail(format!("spawn reader: {}", e)))?;

        let mut link = Self {
            conn,
            rx,
            stop,
            hdr: MavHeader { system_id: cfg.sys_id, component_id: cfg.comp_id, sequence: 0 },
            address: url.clone(),
            kind,
            target_sys: 0,
            target_comp: 0,
            custom_mode: None,
            armed: false,
            last_hb_sent: None,
            closed: false,
        };

        let timeout = Duration::from_millis(cfg.heartbeat_timeout_ms);
        let deadline = Instant::now() + timeout;
        loop {
            link.send_gcs_heartbeat_if_due();
            let left = deadline.saturating_duration_since(Instant::now());
            match link.rx.recv_timeout(left.min(GCS_HEARTBEAT_INTERVAL)) {
                Ok((hdr, MavMessage::HEARTBEAT(hb))) if hb.mavtype != MavType::MAV_TYPE_GCS => {
                    link.target_sys = hdr.system_id;
                    link.target_comp = hdr.component_id;
                    link.note_heartbeat(&hb);
                    break;
                }
                Ok(_) | Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    link.close();
                    return Err(fail("connection closed before heartbeat".into()));
                }
            }
            if Instant::now() >= deadline {
                link.close();
                return Err(fail(format!("no heartbeat within {:?}", timeout)));
            }
        }

        info!(
            "link {}: heartbeat from sys={} comp={} ({})",
            link.address, link.target_sys, link.target_comp, kind
        );
        Ok(link)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn send(&mut self, msg: MavMessage) -> Result<(), LinkError> {
        if self.closed {
            return Err(LinkError::Closed);
        }
        self.hdr.sequence = self.hdr.sequence.wrapping_add(1);
        self.conn.send(&self.hdr, &msg).map_err(|e| LinkError::Send(e.to_string()))?;
        Ok(())
    }

    fn send_gcs_heartbeat_if_due(&mut self) {
        if self.last_hb_sent.map_or(false, |t| t.elapsed() < GCS_HEARTBEAT_INTERVAL) {
            return;
        }
        let hb = HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_GCS,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        if let Err(e) = self.send(MavMessage::HEARTBEAT(hb)) {
            debug!("link {}: heartbeat send failed: {}", self.address, e);
        }
        self.last_hb_sent = Some(Instant::now());
    }

    fn note_heartbeat(&mut self, hb: &HEARTBEAT_DATA) {
        self.custom_mode = Some(hb.custom_mode);
        self.armed = hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
    }

    fn command_long(&mut self, command: MavCmd, p: [f32; 7]) -> Result<(), LinkError> {
        let cmd = COMMAND_LONG_DATA {
            target_system: self.target_sys,
            target_component: self.target_comp,
            command,
            confirmation: 0,
            param1: p[0],
            param2: p[1],
            param3: p[2],
            param4: p[3],
            param5: p[4],
            param6: p[5],
            param7: p[6],
        };
        debug!("link {}: {:?}", self.address, command);
        self.send(MavMessage::COMMAND_LONG(cmd))
    }

    /// Next message from the vehicle, already classified. Heartbeats update
    /// cached mode/armed state on the way through.
    fn poll(&mut self, timeout: Duration) -> Result<Polled, LinkError> {
        if self.closed {
            return Err(LinkError::Closed);
        }
        self.send_gcs_heartbeat_if_due();

        let res = if timeout.is_zero() {
            self.rx.try_recv().map_err(|e| match e {
                mpsc::TryRecvError::Empty => None,
                mpsc::TryRecvError::Disconnected => Some(LinkError::Closed),
            })
        } else {
            self.rx.recv_timeout(timeout).map_err(|e| match e {
                mpsc::RecvTimeoutError::Timeout => None,
                mpsc::RecvTimeoutError::Disconnected => Some(LinkError::Closed),
            })
        };

        let (hdr, msg) = match res {
            Ok(m) => m,
            Err(None) => return Ok(Polled::Empty),
            Err(Some(e)) => return Err(e),
        };
        if hdr.system_id != self.target_sys {
            return Ok(Polled::Ignored);
        }
        if let MavMessage::HEARTBEAT(hb) = &msg {
            if hdr.component_id == self.target_comp {
                self.note_heartbeat(hb);
            }
        }
        Ok(classify(&msg).map_or(Polled::Ignored, Polled::Msg))
    }

    fn wait_heartbeat_until(
        &mut self,
        timeout: Duration,
        done: impl Fn(&Self) -> bool,
    ) -> Result<bool, LinkError> {
        let deadline = Instant::now() + timeout;
        while !done(self) {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Ok(false);
            }
            self.poll(left.min(GCS_HEARTBEAT_INTERVAL))?;
        }
        Ok(true)
    }
}

enum Polled {
    Empty,
    Ignored,
    Msg(Inbound),
}

impl VehicleLink for MavLink {
    fn set_mode(&mut self, mode: FlightMode, timeout: Duration) -> Result<(), LinkError> {
        let custom = mode
            .custom_mode(self.kind)
            .ok_or(LinkError::UnsupportedMode { mode, kind: self.kind })?;
        info!("link {}: mode -> {}", self.address, mode);
        self.command_long(
            MavCmd::MAV_CMD_DO_SET_MODE,
            [MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32, custom as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
        )?;
        if self.wait_heartbeat_until(timeout, |l| l.custom_mode == Some(custom))? {
            Ok(())
        } else {
            Err(LinkError::ModeTimeout { mode, timeout })
        }
    }

    fn arm(&mut self, timeout: Duration) -> Result<(), LinkError> {
        info!("link {}: arming", self.address);
        self.command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])?;
        if self.wait_heartbeat_until(timeout, |l| l.armed)? {
            Ok(())
        } else {
            Err(LinkError::ArmTimeout { armed: true, timeout })
        }
    }

    fn disarm(&mut self, timeout: Duration) -> Result<(), LinkError> {
        info!("link {}: disarming", self.address);
        self.command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [0.0; 7])?;
        if self.wait_heartbeat_until(timeout, |l| !l.armed)? {
            Ok(())
        } else {
            Err(LinkError::ArmTimeout { armed: false, timeout })
        }
    }

    fn send_takeoff(&mut self, alt_m: f32) -> Result<(), LinkError> {
        self.command_long(MavCmd::MAV_CMD_NAV_TAKEOFF, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, alt_m])
    }

    fn send_clear_all(&mut self) -> Result<(), LinkError> {
        let msg = MISSION_CLEAR_ALL_DATA {
            target_system: self.target_sys,
            target_component: self.target_comp,
            ..Default::default()
        };
        self.send(MavMessage::MISSION_CLEAR_ALL(msg))
    }

    fn send_count(&mut self, count: u16) -> Result<(), LinkError> {
        let msg = MISSION_COUNT_DATA {
            count,
            target_system: self.target_sys,
            target_component: self.target_comp,
            ..Default::default()
        };
        self.send(MavMessage::MISSION_COUNT(msg))
    }

    fn send_item(&mut self, item: &MissionItem) -> Result<(), LinkError> {
        let msg = item_to_wire(item, self.target_sys, self.target_comp)?;
        self.send(MavMessage::MISSION_ITEM_INT(msg))
    }

    fn send_set_current(&mut self, seq: u16) -> Result<(), LinkError> {
        let msg = MISSION_SET_CURRENT_DATA {
            seq,
            target_system: self.target_sys,
            target_component: self.target_comp,
        };
        self.send(MavMessage::MISSION_SET_CURRENT(msg))
    }

    fn request_mission_count(&mut self) -> Result<(), LinkError> {
        let msg = MISSION_REQUEST_LIST_DATA {
            target_system: self.target_sys,
            target_component: self.target_comp,
            ..Default::default()
        };
        self.send(MavMessage::MISSION_REQUEST_LIST(msg))
    }

    fn request_mission_item(&mut self, seq: u16) -> Result<(), LinkError> {
        let msg = MISSION_REQUEST_INT_DATA {
            seq,
            target_system: self.target_sys,
            target_component: self.target_comp,
            ..Default::default()
        };
        self.send(MavMessage::MISSION_REQUEST_INT(msg))
    }

    fn request_home_position(&mut self) -> Result<(), LinkError> {
        self.command_long(MavCmd::MAV_CMD_GET_HOME_POSITION, [0.0; 7])
    }

    fn request_message_rate(&mut self, kind: MessageKind, hz: f32) -> Result<(), LinkError> {
        let Some(msg_id) = message_id(kind) else {
            warn!("link {}: no streamable message for {:?}", self.address, kind);
            return Ok(());
        };
        let interval_us = if hz > 0.0 { 1_000_000.0 / hz } else { -1.0 };
        self.command_long(
            MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL,
            [msg_id as f32, interval_us, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    fn set_ground_speed(&mut self, speed_m_s: f32) -> Result<(), LinkError> {
        // param1=1: ground speed, param3=-1: leave throttle alone
        self.command_long(MavCmd::MAV_CMD_DO_CHANGE_SPEED, [1.0, speed_m_s, -1.0, 0.0, 0.0, 0.0, 0.0])
    }

    fn recv(&mut self, filter: &[MessageKind], timeout: Duration) -> Result<Option<Inbound>, LinkError> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.poll(left.min(GCS_HEARTBEAT_INTERVAL))? {
                Polled::Msg(m) if filter.contains(&m.kind()) => return Ok(Some(m)),
                Polled::Msg(_) | Polled::Ignored => {}
                Polled::Empty if left.is_zero() => return Ok(None),
                Polled::Empty => {}
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stop.store(true, Ordering::Relaxed);
        info!("link {}: closed", self.address);
    }
}

impl Drop for MavLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_reader(
    conn: Conn,
    tx: mpsc::Sender<(MavHeader, MavMessage)>,
    stop: Arc<AtomicBool>,
    address: &str,
) -> std::io::Result<()> {
    let name = format!("mav-rx {}", address);
    let address = address.to_string();
    std::thread::Builder::new().name(name).spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            match conn.recv() {
                Ok(m) => {
                    if tx.send(m).is_err() {
                        break;
                    }
                }
                Err(MessageReadError::Io(e))
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
                    ) => {}
                Err(MessageReadError::Io(e)) => {
                    warn!("link {}: read failed, reader stopping: {}", address, e);
                    break;
                }
                Err(e) => debug!("link {}: dropping unparseable frame: {:?}", address, e),
            }
        }
    })?;
    Ok(())
}

fn classify(msg: &MavMessage) -> Option<Inbound> {
    Some(match msg {
        MavMessage::MISSION_REQUEST_INT(d) => Inbound::MissionRequest { seq: d.seq },
        MavMessage::MISSION_REQUEST(d) => Inbound::MissionRequest { seq: d.seq },
        MavMessage::MISSION_ACK(d) => Inbound::MissionAck {
            result: if d.mavtype == MavMissionResult::MAV_MISSION_ACCEPTED {
                MissionResult::Accepted
            } else {
                MissionResult::Rejected(format!("{:?}", d.mavtype))
            },
        },
        MavMessage::MISSION_COUNT(d) => Inbound::MissionCount { count: d.count },
        MavMessage::MISSION_ITEM_INT(d) => Inbound::MissionItem(item_from_wire(d)),
        MavMessage::GLOBAL_POSITION_INT(d) => Inbound::Position(Position {
            lat_e7: d.lat,
            lon_e7: d.lon,
            // mm
            relative_alt_m: d.relative_alt as f32 / 1000.0,
        }),
        MavMessage::HEARTBEAT(d) => Inbound::Heartbeat {
            custom_mode: d.custom_mode,
            armed: d.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED),
        },
        MavMessage::HOME_POSITION(d) => Inbound::Home {
            lat_e7: d.latitude,
            lon_e7: d.longitude,
            alt_m: d.altitude as f32 / 1000.0,
        },
        MavMessage::STATUSTEXT(d) => {
            let end = d.text.iter().position(|&b| b == 0).unwrap_or(d.text.len());
            Inbound::StatusText {
                severity: d.severity as u8,
                text: String::from_utf8_lossy(&d.text[..end]).into_owned(),
            }
        }
        _ => return None,
    })
}

fn item_to_wire(item: &MissionItem, target_system: u8, target_component: u8) -> Result<MISSION_ITEM_INT_DATA, LinkError> {
    let raw_cmd = item.command.raw();
    let command = MavCmd::from_u16(raw_cmd)
        .ok_or_else(|| LinkError::Send(format!("MAV_CMD {} not in the common dialect", raw_cmd)))?;
    let raw_frame = item.frame.raw();
    let frame = MavFrame::from_u8(raw_frame)
        .ok_or_else(|| LinkError::Send(format!("MAV_FRAME {} not in the common dialect", raw_frame)))?;

    Ok(MISSION_ITEM_INT_DATA {
        param1: item.param1,
        param2: item.param2,
        param3: item.param3,
        param4: item.param4,
        x: item.x,
        y: item.y,
        z: item.z,
        seq: item.seq,
        command,
        target_system,
        target_component,
        frame,
        current: item.current as u8,
        autocontinue: item.autocontinue as u8,
        ..Default::default()
    })
}

fn item_from_wire(d: &MISSION_ITEM_INT_DATA) -> MissionItem {
    MissionItem {
        seq: d.seq,
        frame: MissionFrame::from_raw(d.frame as u8),
        command: MissionCommand::from_raw(d.command as u16),
        current: d.current != 0,
        autocontinue: d.autocontinue != 0,
        param1: d.param1,
        param2: d.param2,
        param3: d.param3,
        param4: d.param4,
        x: d.x,
        y: d.y,
        z: d.z,
    }
}

fn message_id(kind: MessageKind) -> Option<u32> {
    match kind {
        MessageKind::Heartbeat => Some(0),
        MessageKind::Position => Some(33),
        MessageKind::Home => Some(242),
        MessageKind::StatusText => Some(253),
        _ => None,
    }
}

/// Accept the short `tcp:`/`udp:` spellings common in ground-station
/// scripts, and fill in a baud rate for bare serial devices.
pub fn normalize_address(address: &str, default_baud: u32) -> String {
    if let Some(rest) = address.strip_prefix("tcp:") {
        return format!("tcpout:{}", rest);
    }
    if let Some(rest) = address.strip_prefix("udp:") {
        return format!("udpin:{}", rest);
    }
    if let Some(rest) = address.strip_prefix("serial:") {
        let has_baud = rest.rsplit_once(':').map_or(false, |(_, b)| b.parse::<u32>().is_ok());
        if !has_baud {
            return format!("serial:{}:{}", rest, default_baud);
        }
    }
    address.to_string()
}

fn serial_device(url: &str) -> Option<(&str, u32)> {
    let rest = url.strip_prefix("serial:")?;
    let (dev, baud) = rest.rsplit_once(':')?;
    Some((dev, baud.parse().ok()?))
}

/// Opens [`MavLink`]s for one configured vehicle.
#[derive(Debug, Clone)]
pub struct MavConnector {
    address: String,
    kind: VehicleKind,
    cfg: LinkConfig,
}

impl MavConnector {
    pub fn new(address: impl Into<String>, kind: VehicleKind, cfg: LinkConfig) -> Self {
        Self { address: address.into(), kind, cfg }
    }
}

impl Connector for MavConnector {
    type Link = MavLink;

    fn address(&self) -> &str {
        &self.address
    }

    fn connect(&self) -> Result<MavLink, LinkError> {
        MavLink::connect(&self.address, self.kind, &self.cfg)
    }
}
