use anyhow::Result;
use crate::orbit::{OrbitParams, StructureSpec};

pub fn check_structure(structure: &StructureSpec) -> Result<()> {
    anyhow::ensure!(
        structure.center_lat.abs() <= 90.0 && structure.center_lon.abs() <= 180.0,
        "structure center coordinates invalid"
    );
    anyhow::ensure!(structure.width_m >= 0.0 && structure.depth_m >= 0.0, "structure footprint must be non-negative");
    anyhow::ensure!(structure.height_m >= 0.0, "structure height must be non-negative");
    Ok(())
}

pub fn check_orbit_params(p: &OrbitParams) -> Result<()> {
    anyhow::ensure!(p.points_per_ring >= 3, "orbit.points_per_ring must be >= 3");
    anyhow::ensure!(p.alt_step_m > 0.0, "orbit.alt_step_m must be > 0");
    anyhow::ensure!(p.max_rings >= 1, "orbit.max_rings must be >= 1");
    anyhow::ensure!(p.min_radius_m > 0.0, "orbit.min_radius_m must be > 0");
    anyhow::ensure!(p.safety_margin_m >= 0.0, "orbit.safety_margin_m must be >= 0");
    // a mission holds at most u16::MAX items
    let items = 3 + p.points_per_ring.saturating_mul(p.max_rings);
    anyhow::ensure!(items <= u16::MAX as usize, "orbit would need {} mission items", items);
    Ok(())
}

pub fn check_arrival(threshold_m: f64, required: u32) -> Result<()> {
    anyhow::ensure!(threshold_m > 0.5 && threshold_m <= 100.0, "arrival threshold should be 0.5..100 m");
    anyhow::ensure!(required >= 1, "arrival confirmations must be >= 1");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_orbit_params_pass() {
        check_orbit_params(&OrbitParams::default()).unwrap();
    }

    #[test]
    fn degenerate_ring_rejected() {
        let p = OrbitParams { points_per_ring: 2, ..Default::default() };
        assert!(check_orbit_params(&p).is_err());
    }

    #[test]
    fn arrival_bounds() {
        assert!(check_arrival(5.0, 5).is_ok());
        assert!(check_arrival(0.0, 5).is_err());
        assert!(check_arrival(5.0, 0).is_err());
    }
}
