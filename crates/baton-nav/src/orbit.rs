use baton_proto::mission::{deg_to_e7, MissionCommand, MissionFrame, MissionItem, MissionPlan};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::geo::{distance_m, local_offset_to_lat_lon};

/// MAV_ROI_LOCATION
const ROI_MODE_LOCATION: f32 = 3.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureSpec {
    pub center_lat: f64,
    pub center_lon: f64,
    /// East-west extent
    pub width_m: f64,
    /// North-south extent
    pub depth_m: f64,
    pub base_alt_m: f64,
    pub height_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbitParams {
    pub points_per_ring: usize,
    pub safety_margin_m: f64,
    pub min_radius_m: f64,
    /// Lowest ring, above base altitude
    pub start_alt_m: f64,
    /// Extra height of the top ring above the structure
    pub end_alt_margin_m: f64,
    pub alt_step_m: f64,
    pub max_rings: usize,
    /// Waypoint acceptance radius (param2 of NAV_WAYPOINT)
    pub acceptance_radius_m: f32,
}

impl Default for OrbitParams {
    fn default() -> Self {
        Self {
            points_per_ring: 36,
            safety_margin_m: 10.0,
            min_radius_m: 5.0,
            start_alt_m: 1.0,
            end_alt_margin_m: 0.0,
            alt_step_m: 1.0,
            max_rings: 30,
            acceptance_radius_m: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrbitPlan {
    pub radius_m: f64,
    pub levels: Vec<f64>,
    pub plan: MissionPlan,
}

/// Radius of the circle enclosing the footprint plus a margin, never below `min_radius_m`.
pub fn estimate_orbit_radius(structure: &StructureSpec, safety_margin_m: f64, min_radius_m: f64) -> f64 {
    let half_diag = (structure.width_m / 2.0).hypot(structure.depth_m / 2.0);
    (half_diag + safety_margin_m).max(min_radius_m)
}

pub fn plan_vertical_levels(
    structure: &StructureSpec,
    start_alt_m: f64,
    end_alt_margin_m: f64,
    alt_step_m: f64,
    max_rings: usize,
) -> Vec<f64> {
    let bottom = structure.base_alt_m + start_alt_m;
    let top = structure.base_alt_m + structure.height_m + end_alt_margin_m;
    if top <= bottom || alt_step_m <= 0.0 {
        return vec![bottom];
    }

    let n = ((top - bottom) / alt_step_m).floor() as usize + 1;
    let n = n.clamp(1, max_rings.max(1));
    if n == 1 {
        return vec![bottom];
    }

    let step = (top - bottom) / (n - 1) as f64;
    (0..n).map(|i| bottom + i as f64 * step).collect()
}

/// `n` points on a circle, starting due east and going counter-clockwise.
pub fn make_circle_points(center_lat: f64, center_lon: f64, radius_m: f64, n: usize) -> Vec<(f64, f64)> {
    (0..n)
        .map(|i| {
            let theta = std::f64::consts::TAU * i as f64 / n as f64;
            local_offset_to_lat_lon(center_lat, center_lon, radius_m * theta.cos(), radius_m * theta.sin())
        })
        .collect()
}

/// Rotate the ring so it begins at the point nearest the vehicle; keeps the
/// entry leg from cutting across the structure.
pub fn rotate_to_closest(points: &[(f64, f64)], cur_lat: f64, cur_lon: f64) -> Vec<(f64, f64)> {
    let best = points
        .iter()
        .enumerate()
        .map(|(i, &(lat, lon))| (i, distance_m(cur_lat, cur_lon, lat, lon)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut out = points.to_vec();
    out.rotate_left(best);
    out
}

pub fn plan_orbit_mission(structure: &StructureSpec, params: &OrbitParams, cur_lat: f64, cur_lon: f64) -> OrbitPlan {
    let radius_m = estimate_orbit_radius(structure, params.safety_margin_m, params.min_radius_m);
    let levels = plan_vertical_levels(
        structure,
        params.start_alt_m,
        params.end_alt_margin_m,
        params.alt_step_m,
        params.max_rings,
    );
    let ring = make_circle_points(structure.center_lat, structure.center_lon, radius_m, params.points_per_ring);
    let ring = rotate_to_closest(&ring, cur_lat, cur_lon);

    let cx = deg_to_e7(structure.center_lat);
    let cy = deg_to_e7(structure.center_lon);
    let mut items = Vec::with_capacity(3 + levels.len() * ring.len());

    items.push(item(MissionCommand::Takeoff, [0.0; 4], cx, cy, levels[0] as f32));
    items.push(item(
        MissionCommand::SetRoi,
        [ROI_MODE_LOCATION, 0.0, 0.0, 0.0],
        cx,
        cy,
        (structure.base_alt_m + structure.height_m / 2.0) as f32,
    ));
    for &alt in &levels {
        for &(lat, lon) in &ring {
            items.push(item(
                MissionCommand::Waypoint,
                // NaN yaw: keep current heading, the ROI drives the camera
                [0.0, params.acceptance_radius_m, 0.0, f32::NAN],
                deg_to_e7(lat),
                deg_to_e7(lon),
                alt as f32,
            ));
        }
    }
    items.push(item(MissionCommand::ReturnToLaunch, [0.0; 4], 0, 0, 0.0));

    for (seq, it) in items.iter_mut().enumerate() {
        it.seq = seq as u16;
    }
    items[0].current = true;

    info!(
        "orbit plan: radius={:.1}m rings={} points/ring={} items={}",
        radius_m,
        levels.len(),
        ring.len(),
        items.len()
    );

    OrbitPlan { radius_m, levels, plan: MissionPlan::from_items(items) }
}

fn item(command: MissionCommand, p: [f32; 4], x: i32, y: i32, z: f32) -> MissionItem {
    MissionItem {
        seq: 0,
        frame: MissionFrame::GlobalRelativeAltInt,
        command,
        current: false,
        autocontinue: true,
        param1: p[0],
        param2: p[1],
        param3: p[2],
        param4: p[3],
        x,
        y,
        z,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tower(height_m: f64) -> StructureSpec {
        StructureSpec {
            center_lat: 35.8770,
            center_lon: 140.3480,
            width_m: 6.0,
            depth_m: 8.0,
            base_alt_m: 0.0,
            height_m,
        }
    }

    #[test]
    fn radius_is_half_diagonal_plus_margin() {
        assert!((estimate_orbit_radius(&tower(4.0), 1.0, 1.0) - 6.0).abs() < 1e-9);
        assert_eq!(estimate_orbit_radius(&tower(4.0), 1.0, 20.0), 20.0);
    }

    #[test]
    fn levels_step_from_start_to_top() {
        assert_eq!(plan_vertical_levels(&tower(4.0), 1.0, 0.0, 1.0, 30), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn flat_structure_gets_one_level() {
        assert_eq!(plan_vertical_levels(&tower(0.0), 1.0, 0.0, 1.0, 30), vec![1.0]);
    }

    #[test]
    fn ring_count_is_capped_and_spans_full_height() {
        let levels = plan_vertical_levels(&tower(100.0), 1.0, 0.0, 1.0, 5);
        assert_eq!(levels.len(), 5);
        assert_eq!(levels[0], 1.0);
        assert!((levels[4] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn circle_points_sit_on_radius() {
        let s = tower(4.0);
        let pts = make_circle_points(s.center_lat, s.center_lon, 25.0, 12);
        assert_eq!(pts.len(), 12);
        for (lat, lon) in pts {
            let d = distance_m(s.center_lat, s.center_lon, lat, lon);
            assert!((d - 25.0).abs() < 0.1, "{}", d);
        }
    }

    #[test]
    fn rotation_starts_at_nearest_point() {
        let s = tower(4.0);
        let pts = make_circle_points(s.center_lat, s.center_lon, 25.0, 10);
        let k = 7;
        // stand just outside point k
        let (lat, lon) = pts[k];
        let rotated = rotate_to_closest(&pts, lat + 0.00001, lon);

        assert_eq!(rotated.len(), pts.len());
        assert_eq!(rotated[0], pts[k]);
        for i in 0..pts.len() {
            assert_eq!(rotated[i], pts[(k + i) % pts.len()]);
        }
    }

    #[test]
    fn rotation_of_empty_ring() {
        assert!(rotate_to_closest(&[], 35.0, 140.0).is_empty());
    }

    #[test]
    fn mission_layout() {
        let s = tower(4.0);
        let params = OrbitParams { points_per_ring: 10, safety_margin_m: 1.0, min_radius_m: 1.0, ..Default::default() };
        let out = plan_orbit_mission(&s, &params, s.center_lat, s.center_lon + 0.001);
        let items = out.plan.items();

        assert_eq!(out.levels, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(items.len(), 1 + 1 + 4 * 10 + 1);

        for (i, it) in items.iter().enumerate() {
            assert_eq!(it.seq as usize, i);
            assert_eq!(it.current, i == 0);
            assert!(it.autocontinue);
            assert_eq!(it.frame, MissionFrame::GlobalRelativeAltInt);
        }

        assert_eq!(items[0].command, MissionCommand::Takeoff);
        assert_eq!(items[0].z, 1.0);
        assert_eq!(items[1].command, MissionCommand::SetRoi);
        assert_eq!(items[1].param1, 3.0);
        assert_eq!(items[1].z, 2.0);
        assert_eq!((items[1].x, items[1].y), (deg_to_e7(s.center_lat), deg_to_e7(s.center_lon)));

        // rings go bottom to top
        assert!(items[2..12].iter().all(|it| it.z == 1.0 && it.command == MissionCommand::Waypoint));
        assert!(items[32..42].iter().all(|it| it.z == 4.0));
        assert!(items[2].param4.is_nan());
        assert_eq!(items[2].param2, 2.0);

        // vehicle is east of the tower: entry point is the eastern one
        assert!(items[2].y > items[1].y);
        assert_eq!(items[2].x, deg_to_e7(s.center_lat));

        let last = items.last().unwrap();
        assert_eq!(last.command, MissionCommand::ReturnToLaunch);
        assert_eq!((last.x, last.y, last.z), (0, 0, 0.0));
    }
}
