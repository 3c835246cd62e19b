//! QGC WPL plan files.
//!
//! ```text
//! QGC WPL 110
//! 0	1	0	16	0	0	0	0	35.8769910	140.3480260	0.000000	1
//! ```
//!
//! Columns: seq, current, frame, command, param1..4, lat, lon, alt, autocontinue.

use anyhow::{Context, Result};
use baton_proto::mission::{deg_to_e7, MissionCommand, MissionFrame, MissionItem, MissionPlan};
use std::path::Path;
use tracing::{debug, warn};

pub const HEADER_PREFIX: &str = "QGC WPL";
pub const HEADER: &str = "QGC WPL 110";

const FIELDS: usize = 12;

/// Read a plan file. A missing file or a foreign header yields an empty plan
/// so the caller can fall back to whatever mission the vehicle already holds.
pub fn load_plan(path: impl AsRef<Path>) -> MissionPlan {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let plan = parse_plan(&text);
            if plan.is_empty() {
                warn!("plan file {} holds no usable items", path.display());
            }
            plan
        }
        Err(e) => {
            warn!("plan file {} not readable: {}", path.display(), e);
            MissionPlan::default()
        }
    }
}

pub fn parse_plan(text: &str) -> MissionPlan {
    let mut lines = text.lines();
    match lines.next() {
        Some(h) if h.trim_start_matches('\u{feff}').starts_with(HEADER_PREFIX) => {}
        other => {
            warn!("not a QGC WPL plan (header {:?})", other.map(str::trim));
            return MissionPlan::default();
        }
    }

    let items = lines
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .filter_map(|(i, l)| {
            let item = parse_line(l);
            if item.is_none() {
                debug!("skipping malformed plan line {}: {:?}", i + 2, l);
            }
            item
        })
        .collect();
    MissionPlan::from_items(items)
}

fn parse_line(line: &str) -> Option<MissionItem> {
    let parts: Vec<&str> = line.trim().split('\t').map(str::trim).collect();
    if parts.len() != FIELDS {
        return None;
    }
    let flag = |s: &str| -> Option<bool> { Some(s.parse::<u8>().ok()? != 0) };

    Some(MissionItem {
        seq: parts[0].parse().ok()?,
        current: flag(parts[1])?,
        frame: MissionFrame::from_raw(parts[2].parse().ok()?),
        command: MissionCommand::from_raw(parts[3].parse().ok()?),
        param1: parts[4].parse().ok()?,
        param2: parts[5].parse().ok()?,
        param3: parts[6].parse().ok()?,
        param4: parts[7].parse().ok()?,
        x: deg_to_e7(parts[8].parse().ok()?),
        y: deg_to_e7(parts[9].parse().ok()?),
        z: parts[10].parse().ok()?,
        autocontinue: flag(parts[11])?,
    })
}

pub fn format_plan(plan: &MissionPlan) -> String {
    let mut out = String::new();
    out.push_str(HEADER);
    out.push('\n');
    for it in plan {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{:.8}\t{:.8}\t{:.8}\t{:.8}\t{:.7}\t{:.7}\t{:.6}\t{}\n",
            it.seq,
            it.current as u8,
            it.frame.raw(),
            it.command.raw(),
            it.param1,
            it.param2,
            it.param3,
            it.param4,
            it.lat_deg(),
            it.lon_deg(),
            it.z,
            it.autocontinue as u8,
        ));
    }
    out
}

pub fn write_plan(path: impl AsRef<Path>, plan: &MissionPlan) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, format_plan(plan))
        .with_context(|| format!("write plan file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ONE_WP: &str = "QGC WPL 110\n0\t1\t0\t16\t0\t0\t0\t0\t35.87699149\t140.3480260\t10.000000\t1\n";

    #[test]
    fn single_line_plan() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(ONE_WP.as_bytes()).unwrap();

        let plan = load_plan(f.path());
        assert_eq!(plan.len(), 1);
        let it = &plan.items()[0];
        assert_eq!(it.seq, 0);
        assert!(it.current);
        assert_eq!(it.frame, MissionFrame::Global);
        assert_eq!(it.command, MissionCommand::Waypoint);
        assert_eq!(it.x, 358_769_915);
        assert_eq!(it.y, 1_403_480_260);
        assert_eq!(it.z, 10.0);
        assert!(it.autocontinue);
    }

    #[test]
    fn missing_file_is_empty_plan() {
        let dir = tempfile::tempdir().unwrap();
        let plan = load_plan(dir.path().join("nope.waypoints"));
        assert!(plan.is_empty());
    }

    #[test]
    fn bad_header_is_empty_plan() {
        let text = ONE_WP.replace("QGC WPL 110", "MISSION v2");
        assert!(parse_plan(&text).is_empty());
        assert!(parse_plan("").is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped_order_kept() {
        let text = "QGC WPL 110\n\
            0\t1\t0\t16\t0\t0\t0\t0\t35.0\t140.0\t0\t1\n\
            \n\
            1\t0\t3\t22\t0\t0\t0\n\
            7\t0\t3\t16\t0\t2\t0\t0\t35.1\t140.1\t20\t1\n\
            x\t0\t3\t16\t0\t0\t0\t0\t35.2\t140.2\t20\t1\n\
            2\t0\t3\t20\t0\t0\t0\t0\t0\t0\t0\t1\n";
        let plan = parse_plan(text);
        let seqs: Vec<u16> = plan.iter().map(|i| i.seq).collect();
        // no renumbering: 7 stays 7
        assert_eq!(seqs, vec![0, 7, 2]);
        assert_eq!(plan.items()[2].command, MissionCommand::ReturnToLaunch);
    }

    #[test]
    fn crlf_files_parse() {
        let text = ONE_WP.replace('\n', "\r\n");
        assert_eq!(parse_plan(&text).len(), 1);
    }

    #[test]
    fn trailing_whitespace_is_tolerated() {
        let text = "QGC WPL 110\n0\t1\t0\t16\t0\t0\t0\t0\t35.0\t140.0\t10\t1\t\n \
                    1\t0\t3\t16\t0\t0\t0\t0\t35.1\t140.1\t20\t1  \n";
        let plan = parse_plan(text);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.items()[1].z, 20.0);
    }

    #[test]
    fn written_plan_loads_back() {
        let plan = parse_plan(
            "QGC WPL 110\n\
             0\t1\t6\t22\t0\t0\t0\t0\t35.8769910\t140.3480260\t1.000000\t1\n\
             1\t0\t6\t201\t3\t0\t0\t0\t35.8769910\t140.3480260\t2.000000\t1\n",
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orbit.waypoints");
        write_plan(&path, &plan).unwrap();
        assert_eq!(load_plan(&path), plan);
    }
}
