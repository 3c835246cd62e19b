use baton_proto::mission::e7_to_deg;
use baton_proto::{MissionItem, MissionPlan, Position};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::link::{Inbound, LinkError, MessageKind, VehicleLink};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no {what} within {timeout:?}")]
    Timeout { what: String, timeout: Duration },

    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Number of items in the vehicle's active mission (MISSION_REQUEST_LIST).
pub fn mission_count<L: VehicleLink + ?Sized>(link: &mut L, timeout: Duration) -> Result<u16, QueryError> {
    link.request_mission_count()?;
    match link.recv(&[MessageKind::MissionCount], timeout)? {
        Some(Inbound::MissionCount { count }) => Ok(count),
        _ => Err(QueryError::Timeout { what: "MISSION_COUNT".into(), timeout }),
    }
}

/// One stored item (MISSION_REQUEST_INT). Items for other sequence numbers
/// are skipped until the deadline.
pub fn mission_item<L: VehicleLink + ?Sized>(link: &mut L, seq: u16, timeout: Duration) -> Result<MissionItem, QueryError> {
    link.request_mission_item(seq)?;
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let left = deadline.saturating_duration_since(std::time::Instant::now());
        match link.recv(&[MessageKind::MissionItem], left)? {
            Some(Inbound::MissionItem(item)) if item.seq == seq => return Ok(item),
            Some(other) => debug!("mission query: skipping {:?} while waiting for seq {}", other, seq),
            None => {
                return Err(QueryError::Timeout { what: format!("MISSION_ITEM_INT seq={}", seq), timeout });
            }
        }
        if left.is_zero() {
            return Err(QueryError::Timeout { what: format!("MISSION_ITEM_INT seq={}", seq), timeout });
        }
    }
}

/// Read back the whole active mission, item by item.
pub fn download_mission<L: VehicleLink + ?Sized>(link: &mut L, timeout: Duration) -> Result<MissionPlan, QueryError> {
    let count = mission_count(link, timeout)?;
    let mut items = Vec::with_capacity(count as usize);
    for seq in 0..count {
        items.push(mission_item(link, seq, timeout)?);
    }
    info!("mission download: {} items", items.len());
    Ok(MissionPlan::from_items(items))
}

/// Home location in degrees (MAV_CMD_GET_HOME_POSITION).
pub fn home_position<L: VehicleLink + ?Sized>(link: &mut L, timeout: Duration) -> Result<(f64, f64), QueryError> {
    link.request_home_position()?;
    match link.recv(&[MessageKind::Home], timeout)? {
        Some(Inbound::Home { lat_e7, lon_e7, .. }) => Ok((e7_to_deg(lat_e7), e7_to_deg(lon_e7))),
        _ => Err(QueryError::Timeout { what: "HOME_POSITION".into(), timeout }),
    }
}

/// Next GLOBAL_POSITION_INT sample.
pub fn current_position<L: VehicleLink + ?Sized>(link: &mut L, timeout: Duration) -> Result<Position, QueryError> {
    match link.recv(&[MessageKind::Position], timeout)? {
        Some(Inbound::Position(p)) => Ok(p),
        _ => Err(QueryError::Timeout { what: "GLOBAL_POSITION_INT".into(), timeout }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Outbound, ScriptedLink};
    use baton_proto::{MissionCommand, MissionFrame};

    fn wp(seq: u16) -> MissionItem {
        MissionItem {
            seq,
            frame: MissionFrame::GlobalRelativeAltInt,
            command: MissionCommand::Waypoint,
            current: false,
            autocontinue: true,
            param1: 0.0,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            x: 358_797_665,
            y: 1_403_483_999,
            z: 0.0,
        }
    }

    const T: Duration = Duration::from_secs(1);

    #[test]
    fn count_and_last_item() {
        let mut link = ScriptedLink::new();
        link.on_request_count(vec![Inbound::MissionCount { count: 4 }]);
        link.on_request_item(3, Inbound::MissionItem(wp(3)));

        assert_eq!(mission_count(&mut link, T).unwrap(), 4);
        let last = mission_item(&mut link, 3, T).unwrap();
        assert_eq!(last.x, 358_797_665);
        assert_eq!(link.sent(), vec![Outbound::RequestCount, Outbound::RequestItem(3)]);
    }

    #[test]
    fn silent_vehicle_is_a_timeout() {
        let mut link = ScriptedLink::new();
        assert!(matches!(mission_count(&mut link, T), Err(QueryError::Timeout { .. })));
        assert!(matches!(mission_item(&mut link, 0, T), Err(QueryError::Timeout { .. })));
    }

    #[test]
    fn wrong_seq_is_skipped() {
        let mut link = ScriptedLink::new();
        link.push(Inbound::MissionItem(wp(1)));
        link.on_request_item(2, Inbound::MissionItem(wp(2)));
        assert_eq!(mission_item(&mut link, 2, T).unwrap().seq, 2);
    }

    #[test]
    fn download_reads_every_item() {
        let mut link = ScriptedLink::new();
        link.on_request_count(vec![Inbound::MissionCount { count: 3 }]);
        for seq in 0..3 {
            link.on_request_item(seq, Inbound::MissionItem(wp(seq)));
        }
        let plan = download_mission(&mut link, T).unwrap();
        assert_eq!(plan.iter().map(|i| i.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn home_and_position() {
        let mut link = ScriptedLink::new();
        link.push(Inbound::Home { lat_e7: 358_797_665, lon_e7: 1_403_483_999, alt_m: 12.0 });
        link.positions([Some(Position { lat_e7: 1, lon_e7: 2, relative_alt_m: 0.5 })]);

        let (lat, lon) = home_position(&mut link, T).unwrap();
        assert!((lat - 35.8797665).abs() < 1e-9);
        assert!((lon - 140.3483999).abs() < 1e-9);
        assert_eq!(current_position(&mut link, T).unwrap().lat_e7, 1);
        assert!(matches!(current_position(&mut link, T), Err(QueryError::Timeout { .. })));
        assert!(link.sent().contains(&Outbound::RequestHome));
    }
}
