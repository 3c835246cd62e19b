use baton_proto::MissionPlan;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::link::{Inbound, LinkError, MessageKind, MissionResult, VehicleLink};

const HANDSHAKE: &[MessageKind] = &[MessageKind::MissionRequest, MessageKind::MissionAck];

/// Longest single receive while waiting on the vehicle, so cancellation is
/// seen even when the request timeout is long.
const WAIT_SLICE: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("vehicle requested seq {seq} of a {count}-item mission")]
    ProtocolViolation { seq: u16, count: u16 },

    #[error("vehicle rejected mission: {result}")]
    Rejected { result: String },

    #[error("no mission request/ack within {timeout:?} ({sent}/{total} items sent)")]
    Timeout { sent: usize, total: usize, timeout: Duration },

    #[error("mission has {0} items, more than a MAVLink mission can hold")]
    TooLarge(usize),

    #[error("mission upload cancelled ({sent}/{total} items sent)")]
    Cancelled { sent: usize, total: usize },

    #[error(transparent)]
    Link(#[from] LinkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    CountSent,
    AwaitingItem(u16),
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    pub sent: usize,
}

/// Pushes a plan with the MISSION_COUNT / MISSION_REQUEST_INT / MISSION_ACK
/// handshake. All or nothing: any timeout or protocol error fails the whole
/// upload and the caller decides whether to start over.
#[derive(Debug, Clone)]
pub struct MissionUploader {
    request_timeout: Duration,
    clear_settle: Duration,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for MissionUploader {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_millis(200))
    }
}

impl MissionUploader {
    pub fn new(request_timeout: Duration, clear_settle: Duration) -> Self {
        Self { request_timeout, clear_settle, cancel: None }
    }

    /// Abort the handshake once `cancel` is set.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Next handshake message, or None once `request_timeout` passes quietly.
    fn next_reply<L: VehicleLink + ?Sized>(
        &self,
        link: &mut L,
        sent: usize,
        total: usize,
    ) -> Result<Option<Inbound>, UploadError> {
        let deadline = Instant::now() + self.request_timeout;
        loop {
            if self.cancelled() {
                return Err(UploadError::Cancelled { sent, total });
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if let Some(msg) = link.recv(HANDSHAKE, left.min(WAIT_SLICE))? {
                return Ok(Some(msg));
            }
            if left.is_zero() {
                return Ok(None);
            }
        }
    }

    pub fn upload<L: VehicleLink + ?Sized>(&self, link: &mut L, plan: &MissionPlan) -> Result<UploadReport, UploadError> {
        let total = plan.len();
        if total == 0 {
            info!("mission upload: empty plan, nothing to send");
            return Ok(UploadReport { sent: 0 });
        }
        let count = u16::try_from(total).map_err(|_| UploadError::TooLarge(total))?;

        let mut state = UploadState::Idle;
        let res = self.run(link, plan, count, &mut state);
        if res.is_err() {
            transition(&mut state, UploadState::Failed);
        }
        res
    }

    fn run<L: VehicleLink + ?Sized>(
        &self,
        link: &mut L,
        plan: &MissionPlan,
        count: u16,
        state: &mut UploadState,
    ) -> Result<UploadReport, UploadError> {
        // Requests/acks left over from an earlier exchange would be taken
        // as answers to this one.
        let mut stale = 0;
        while link.recv(HANDSHAKE, Duration::ZERO)?.is_some() {
            stale += 1;
        }
        if stale > 0 {
            debug!("mission upload: dropped {} stale messages", stale);
        }

        link.send_clear_all()?;
        if !self.clear_settle.is_zero() {
            std::thread::sleep(self.clear_settle);
        }

        link.send_count(count)?;
        transition(state, UploadState::CountSent);
        info!("mission upload: count={} sent, waiting for requests", count);

        let total = count as usize;
        let mut sent = 0usize;
        loop {
            let Some(msg) = self.next_reply(link, sent, total)? else {
                return Err(UploadError::Timeout { sent, total, timeout: self.request_timeout });
            };

            match msg {
                Inbound::MissionRequest { seq } => {
                    let Some(item) = plan.get(seq) else {
                        warn!("mission upload: vehicle asked for seq {} of {}", seq, count);
                        return Err(UploadError::ProtocolViolation { seq, count });
                    };
                    transition(state, UploadState::AwaitingItem(seq));
                    if item.seq != seq {
                        debug!("mission upload: item at index {} carries seq {}, sending as {}", seq, item.seq, seq);
                        let mut item = item.clone();
                        item.seq = seq;
                        link.send_item(&item)?;
                    } else {
                        link.send_item(item)?;
                    }
                    sent += 1;
                }
                Inbound::MissionAck { result } if sent < total => {
                    // usually the answer to the clear-all
                    debug!("mission upload: early ack {:?} at {}/{}, ignored", result, sent, total);
                }
                Inbound::MissionAck { result: MissionResult::Accepted } => {
                    transition(state, UploadState::Complete);
                    break;
                }
                Inbound::MissionAck { result: MissionResult::Rejected(result) } => {
                    return Err(UploadError::Rejected { result });
                }
                other => debug!("mission upload: ignoring {:?}", other.kind()),
            }
        }

        link.send_set_current(0)?;
        info!("mission upload: {}/{} items accepted, current seq reset to 0", sent, total);
        Ok(UploadReport { sent })
    }
}

fn transition(state: &mut UploadState, next: UploadState) {
    debug!("mission upload: {:?} -> {:?}", state, next);
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Outbound, ScriptedLink};
    use baton_proto::{MissionCommand, MissionFrame, MissionItem};

    fn plan(n: u16) -> MissionPlan {
        MissionPlan::from_items(
            (0..n)
                .map(|seq| MissionItem {
                    seq,
                    frame: MissionFrame::GlobalRelativeAltInt,
                    command: MissionCommand::Waypoint,
                    current: seq == 0,
                    autocontinue: true,
                    param1: 0.0,
                    param2: 0.0,
                    param3: 0.0,
                    param4: 0.0,
                    x: 358_770_000 + seq as i32,
                    y: 1_403_480_000,
                    z: 10.0,
                })
                .collect(),
        )
    }

    fn uploader() -> MissionUploader {
        MissionUploader::new(Duration::from_millis(10), Duration::ZERO)
    }

    fn requests(seqs: &[u16]) -> Vec<Inbound> {
        seqs.iter().map(|&seq| Inbound::MissionRequest { seq }).collect()
    }

    fn accepted() -> Inbound {
        Inbound::MissionAck { result: MissionResult::Accepted }
    }

    #[test]
    fn three_items_in_order() {
        let mut link = ScriptedLink::new();
        let mut replies = requests(&[0, 1, 2]);
        replies.push(accepted());
        link.on_count(replies);

        let report = uploader().upload(&mut link, &plan(3)).unwrap();
        assert_eq!(report.sent, 3);
        assert_eq!(
            link.sent(),
            &[
                Outbound::ClearAll,
                Outbound::Count(3),
                Outbound::Item(0),
                Outbound::Item(1),
                Outbound::Item(2),
                Outbound::SetCurrent(0),
            ]
        );
    }

    #[test]
    fn out_of_range_request_fails() {
        let mut link = ScriptedLink::new();
        link.on_count(requests(&[0, 5]));

        let err = uploader().upload(&mut link, &plan(3)).unwrap_err();
        assert!(matches!(err, UploadError::ProtocolViolation { seq: 5, count: 3 }), "{err}");
        assert!(!link.sent().contains(&Outbound::SetCurrent(0)));
    }

    #[test]
    fn silence_times_out() {
        let mut link = ScriptedLink::new();
        let err = uploader().upload(&mut link, &plan(3)).unwrap_err();
        assert!(matches!(err, UploadError::Timeout { sent: 0, total: 3, .. }), "{err}");
    }

    #[test]
    fn timeout_mid_transfer_reports_progress() {
        let mut link = ScriptedLink::new();
        link.on_count(requests(&[0, 1]));
        let err = uploader().upload(&mut link, &plan(3)).unwrap_err();
        assert!(matches!(err, UploadError::Timeout { sent: 2, total: 3, .. }), "{err}");
    }

    #[test]
    fn empty_plan_sends_nothing() {
        let mut link = ScriptedLink::new();
        let report = uploader().upload(&mut link, &MissionPlan::default()).unwrap();
        assert_eq!(report.sent, 0);
        assert!(link.sent().is_empty());
    }

    #[test]
    fn ack_from_clear_is_ignored() {
        let mut link = ScriptedLink::new();
        let mut replies = vec![accepted()];
        replies.extend(requests(&[0, 1]));
        replies.push(accepted());
        link.on_count(replies);

        assert_eq!(uploader().upload(&mut link, &plan(2)).unwrap().sent, 2);
    }

    #[test]
    fn stale_messages_are_drained_first() {
        let mut link = ScriptedLink::new();
        // left over from a previous, aborted upload
        link.push(Inbound::MissionRequest { seq: 7 });
        link.push(accepted());
        let mut replies = requests(&[0]);
        replies.push(accepted());
        link.on_count(replies);

        assert_eq!(uploader().upload(&mut link, &plan(1)).unwrap().sent, 1);
    }

    #[test]
    fn cancel_stops_a_vehicle_that_keeps_asking() {
        let mut link = ScriptedLink::new();
        link.on_count(requests(&[0, 0, 0, 0]));
        let cancel = Arc::new(AtomicBool::new(true));
        let up = MissionUploader::new(Duration::from_secs(30), Duration::ZERO).with_cancel(cancel);

        let err = up.upload(&mut link, &plan(2)).unwrap_err();
        assert!(matches!(err, UploadError::Cancelled { sent: 0, total: 2 }), "{err}");
        assert!(link.sent().contains(&Outbound::Count(2)));
        assert!(!link.sent().contains(&Outbound::Item(0)));
    }

    #[test]
    fn rejecting_ack_fails() {
        let mut link = ScriptedLink::new();
        let mut replies = requests(&[0]);
        replies.push(Inbound::MissionAck { result: MissionResult::Rejected("MAV_MISSION_NO_SPACE".into()) });
        link.on_count(replies);

        let err = uploader().upload(&mut link, &plan(1)).unwrap_err();
        assert!(matches!(err, UploadError::Rejected { ref result } if result == "MAV_MISSION_NO_SPACE"));
    }
}
