//! Staged, one-vehicle-at-a-time mission runs.
//!
//! A [`VehicleSession`] drives a single vehicle through connect, upload,
//! arm, takeoff, mission start and completion. The [`Orchestrator`] runs a
//! list of them in order and stops at the first failure.

pub mod error;
pub mod orchestrator;
pub mod session;

pub use error::{SessionError, Stage};
pub use orchestrator::{FleetConfig, Orchestrator};
pub use session::{SessionConfig, Vehicle, VehicleConfig, VehicleSession};
