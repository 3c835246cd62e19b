use baton_fc::query::QueryError;
use baton_fc::{FlightMode, LinkError, UploadError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stage of a vehicle run, in the order the orchestrator drives them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    Upload,
    Arm,
    Takeoff,
    StartMission,
    WaitComplete,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Connect => "connect",
            Stage::Upload => "upload",
            Stage::Arm => "arm",
            Stage::Takeoff => "takeoff",
            Stage::StartMission => "start_mission",
            Stage::WaitComplete => "wait_complete",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    Connection(#[source] LinkError),

    #[error("mode {mode} not confirmed within {timeout:?}")]
    ModeChangeTimeout { mode: FlightMode, timeout: Duration },

    #[error("vehicle did not arm within {0:?}")]
    ArmTimeout(Duration),

    #[error("mission upload protocol violation: {0}")]
    UploadProtocolViolation(String),

    #[error("mission upload timed out: {0}")]
    UploadTimeout(String),

    #[error("takeoff altitude {target_m:.1} m not reached within {timeout:?} (last {last_m:.1} m)")]
    TakeoffAltitudeTimeout { target_m: f32, last_m: f32, timeout: Duration },

    #[error("final waypoint not reached within {timeout:?} (last distance {last_distance_m:.1} m)")]
    ArrivalTimeout { timeout: Duration, last_distance_m: f64 },

    #[error("mission query failed: {0}")]
    MissionQueryFailure(String),

    #[error("not connected")]
    NotConnected,

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Link(#[from] LinkError),
}

impl SessionError {
    /// Link errors from mode and arm commands carry their own timeouts.
    pub(crate) fn from_command(e: LinkError) -> Self {
        match e {
            LinkError::ModeTimeout { mode, timeout } => SessionError::ModeChangeTimeout { mode, timeout },
            LinkError::ArmTimeout { armed: true, timeout } => SessionError::ArmTimeout(timeout),
            other => SessionError::Link(other),
        }
    }
}

impl From<UploadError> for SessionError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::Timeout { .. } => SessionError::UploadTimeout(e.to_string()),
            UploadError::ProtocolViolation { .. } | UploadError::Rejected { .. } | UploadError::TooLarge(_) => {
                SessionError::UploadProtocolViolation(e.to_string())
            }
            UploadError::Cancelled { .. } => SessionError::Interrupted,
            UploadError::Link(l) => SessionError::Link(l),
        }
    }
}

impl From<QueryError> for SessionError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Link(l) => SessionError::Link(l),
            QueryError::Timeout { .. } => SessionError::MissionQueryFailure(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_errors_map_by_kind() {
        let e: SessionError = UploadError::ProtocolViolation { seq: 5, count: 3 }.into();
        assert!(matches!(e, SessionError::UploadProtocolViolation(_)));

        let e: SessionError = UploadError::Rejected { result: "MAV_MISSION_ERROR".into() }.into();
        assert!(matches!(e, SessionError::UploadProtocolViolation(_)));

        let e: SessionError = UploadError::Timeout { sent: 1, total: 3, timeout: Duration::from_secs(30) }.into();
        assert!(matches!(e, SessionError::UploadTimeout(ref m) if m.contains("1/3")));

        let e: SessionError = UploadError::Cancelled { sent: 2, total: 9 }.into();
        assert!(matches!(e, SessionError::Interrupted));

        let e: SessionError = UploadError::Link(LinkError::Closed).into();
        assert!(matches!(e, SessionError::Link(LinkError::Closed)));
    }

    #[test]
    fn command_timeouts_keep_their_meaning() {
        let t = Duration::from_secs(10);
        let e = SessionError::from_command(LinkError::ModeTimeout { mode: FlightMode::Guided, timeout: t });
        assert!(matches!(e, SessionError::ModeChangeTimeout { mode: FlightMode::Guided, .. }));

        let e = SessionError::from_command(LinkError::ArmTimeout { armed: true, timeout: t });
        assert!(matches!(e, SessionError::ArmTimeout(_)));
    }
}
