pub mod arrival;
pub mod doctor;
pub mod geo;
pub mod orbit;
pub mod waypoints;

pub use arrival::{ArrivalDetector, ArrivalUpdate};
pub use geo::{distance_m, local_offset_to_lat_lon};
pub use orbit::{plan_orbit_mission, OrbitParams, OrbitPlan, StructureSpec};
pub use waypoints::{load_plan, parse_plan, write_plan};
