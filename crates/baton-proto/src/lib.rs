pub mod mission;
pub mod telemetry;
pub mod vehicle;

pub use mission::{MissionCommand, MissionFrame, MissionItem, MissionPlan};
pub use telemetry::{Position, RunReport, VehicleOutcome};
pub use vehicle::VehicleKind;
