use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use baton_fc::mav::{MavConnector, MavLink};
use baton_fc::{query, LinkConfig, VehicleLink};
use baton_fleet::{FleetConfig, Orchestrator, SessionConfig, VehicleConfig, VehicleSession};
use baton_nav::{distance_m, doctor as nav_doctor, local_offset_to_lat_lon, orbit, waypoints};
use baton_nav::orbit::{OrbitParams, StructureSpec};
use baton_proto::MissionPlan;

#[derive(Debug, Parser)]
#[command(name = "baton", version, about = "baton - hand missions to MAVLink vehicles, one after another")]
struct Cli {
    #[arg(long)]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sanity-check the config and mission files without connecting.
    Doctor,
    /// Fly every configured vehicle in order.
    Run {
        /// Write the run report as JSON.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    Plan { #[command(subcommand)] cmd: PlanCmd },
    Mission { #[command(subcommand)] cmd: MissionCmd },
    /// Disarm a vehicle left armed by an aborted run.
    Disarm { vehicle: String },
}

#[derive(Debug, Subcommand)]
enum PlanCmd {
    /// Build a structure orbit from the [orbit] section.
    Orbit {
        #[arg(long)]
        out: PathBuf,
    },
    /// Print a waypoint file.
    Show { file: PathBuf },
}

#[derive(Debug, Subcommand)]
enum MissionCmd {
    /// Download a vehicle's current mission.
    Pull {
        vehicle: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Upload a waypoint file to a vehicle.
    Push { vehicle: String, file: PathBuf },
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    #[serde(default)]
    link: LinkConfig,
    #[serde(default)]
    session: SessionConfig,
    #[serde(default)]
    fleet: FleetConfig,
    #[serde(default, rename = "vehicle")]
    vehicles: Vec<VehicleConfig>,

    orbit: Option<OrbitCfg>,
}

#[derive(Debug, serde::Deserialize)]
struct OrbitCfg {
    /// Vehicle whose home and live position anchor the plan.
    vehicle: Option<String>,

    center_lat: Option<f64>,
    center_lon: Option<f64>,
    /// Structure center relative to the vehicle's home.
    home_offset_east_m: Option<f64>,
    home_offset_north_m: Option<f64>,

    width_m: f64,
    depth_m: f64,
    #[serde(default)]
    base_alt_m: f64,
    height_m: f64,

    /// Where the orbit should begin when no vehicle is named.
    start_lat: Option<f64>,
    start_lon: Option<f64>,

    #[serde(default)]
    params: OrbitParams,
}

fn load_config(path: &Path) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    parse_config(&s)
}

fn parse_config(s: &str) -> Result<Config> {
    toml::from_str(s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg).await?,
        Command::Run { report } => run(cfg, report).await?,
        Command::Plan { cmd } => plan_cmd(&cfg, cmd).await?,
        Command::Mission { cmd } => mission_cmd(&cfg, cmd).await?,
        Command::Disarm { vehicle } => disarm(&cfg, &vehicle).await?,
    }
    Ok(())
}

async fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    anyhow::ensure!(!cfg.vehicles.is_empty(), "no [[vehicle]] entries");
    let mut names = HashSet::new();
    for v in &cfg.vehicles {
        anyhow::ensure!(names.insert(v.name.as_str()), "duplicate vehicle name {:?}", v.name);
        anyhow::ensure!(!v.address.trim().is_empty(), "vehicle {}: address missing", v.name);
        if v.kind.is_airborne() {
            anyhow::ensure!(v.takeoff_alt_m > 0.0, "vehicle {}: takeoff_alt_m must be > 0", v.name);
        }
        if let Some(speed) = v.ground_speed_m_s {
            anyhow::ensure!(speed > 0.0, "vehicle {}: ground_speed_m_s must be > 0", v.name);
        }
        match &v.mission_file {
            Some(path) if !path.exists() => warn!("vehicle {}: mission file {} not found", v.name, path.display()),
            Some(path) => {
                let plan = waypoints::load_plan(path);
                if plan.is_empty() {
                    warn!("vehicle {}: {} holds no usable items", v.name, path.display());
                } else {
                    info!("vehicle {}: {} items in {}", v.name, plan.len(), path.display());
                }
            }
            None => info!("vehicle {}: no mission file, flies the mission already on board", v.name),
        }
    }

    anyhow::ensure!(cfg.session.position_rate_hz > 0.0, "session.position_rate_hz must be > 0");
    nav_doctor::check_arrival(cfg.session.arrival_threshold_m, cfg.session.arrival_required)?;

    if let Some(o) = &cfg.orbit {
        nav_doctor::check_orbit_params(&o.params)?;
        match (o.center_lat, o.center_lon) {
            (Some(lat), Some(lon)) => nav_doctor::check_structure(&o.structure(lat, lon))?,
            _ => {
                anyhow::ensure!(
                    o.home_offset_east_m.is_some() && o.home_offset_north_m.is_some(),
                    "orbit: give center_lat/center_lon or home_offset_east_m/home_offset_north_m"
                );
                let name = o.vehicle.as_deref().context("orbit: a home offset needs orbit.vehicle")?;
                find_vehicle(cfg, name)?;
            }
        }
    }

    info!("doctor: OK");
    Ok(())
}

async fn run(cfg: Config, report_path: Option<PathBuf>) -> Result<()> {
    info!("run: {} vehicle(s)", cfg.vehicles.len());

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt: stopping after the current step");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let sessions: Vec<_> = cfg
        .vehicles
        .iter()
        .map(|v| {
            let connector = MavConnector::new(v.address.clone(), v.kind, cfg.link.clone());
            VehicleSession::new(v.clone(), connector, cfg.session.clone(), cancel.clone())
        })
        .collect();

    let fleet = cfg.fleet.clone();
    let report = blocking(move || Ok(Orchestrator::new(sessions, &fleet, cancel).run())).await?;

    for o in &report.outcomes {
        if o.ok {
            info!("{} ({}): ok in {} ms", o.name, o.kind, o.finished_unix_ms - o.started_unix_ms);
        } else {
            error!("{} ({}): failed at {}: {}", o.name, o.kind, o.stage, o.error.as_deref().unwrap_or("?"));
        }
    }

    if let Some(path) = report_path {
        let json = serde_json::to_vec_pretty(&report).context("encode run report")?;
        tokio::fs::write(&path, json).await.with_context(|| format!("write {}", path.display()))?;
        info!("run: report written to {}", path.display());
    }

    if report.interrupted {
        anyhow::bail!("run interrupted");
    }
    anyhow::ensure!(report.succeeded(), "run stopped after a failed vehicle");
    info!("run: all vehicles done");
    Ok(())
}

async fn plan_cmd(cfg: &Config, cmd: PlanCmd) -> Result<()> {
    match cmd {
        PlanCmd::Orbit { out } => {
            let o = cfg.orbit.as_ref().context("no [orbit] section in config")?;
            nav_doctor::check_orbit_params(&o.params)?;

            let anchor = match o.vehicle.as_deref() {
                Some(name) => Some(fetch_anchor(cfg, name).await?),
                None => None,
            };

            let (center_lat, center_lon) = match (o.center_lat, o.center_lon, o.home_offset_east_m, o.home_offset_north_m) {
                (Some(lat), Some(lon), _, _) => (lat, lon),
                (_, _, Some(east), Some(north)) => {
                    let a = anchor.as_ref().context("orbit: a home offset needs orbit.vehicle")?;
                    local_offset_to_lat_lon(a.home.0, a.home.1, east, north)
                }
                _ => anyhow::bail!("orbit: give center_lat/center_lon or home_offset_east_m/home_offset_north_m"),
            };

            let (cur_lat, cur_lon) = match (&anchor, o.start_lat, o.start_lon) {
                (Some(a), _, _) => a.current,
                (None, Some(lat), Some(lon)) => (lat, lon),
                _ => (center_lat, center_lon),
            };

            let target = o.structure(center_lat, center_lon);
            nav_doctor::check_structure(&target)?;
            let planned = orbit::plan_orbit_mission(&target, &o.params, cur_lat, cur_lon);
            waypoints::write_plan(&out, &planned.plan)?;
            info!(
                "plan orbit: radius {:.1} m, {} ring(s), {} items -> {}",
                planned.radius_m,
                planned.levels.len(),
                planned.plan.len(),
                out.display()
            );
            Ok(())
        }
        PlanCmd::Show { file } => {
            let plan = waypoints::load_plan(&file);
            anyhow::ensure!(!plan.is_empty(), "{}: no usable mission items", file.display());
            print!("{}", describe_plan(&plan));
            Ok(())
        }
    }
}

async fn mission_cmd(cfg: &Config, cmd: MissionCmd) -> Result<()> {
    match cmd {
        MissionCmd::Pull { vehicle, out } => {
            let v = find_vehicle(cfg, &vehicle)?.clone();
            let link_cfg = cfg.link.clone();
            let timeout = Duration::from_millis(cfg.session.query_timeout_ms);

            let plan = blocking(move || {
                let mut link = MavLink::connect(&v.address, v.kind, &link_cfg)?;
                let plan = query::download_mission(&mut link, timeout);
                link.close();
                Ok(plan?)
            })
            .await?;

            waypoints::write_plan(&out, &plan)?;
            info!("mission pull: {} items from {} -> {}", plan.len(), vehicle, out.display());
            Ok(())
        }
        MissionCmd::Push { vehicle, file } => {
            let v = find_vehicle(cfg, &vehicle)?.clone();
            let plan = waypoints::load_plan(&file);
            anyhow::ensure!(!plan.is_empty(), "{}: no usable mission items", file.display());
            let link_cfg = cfg.link.clone();
            let uploader = cfg.session.uploader();

            let report = blocking(move || {
                let mut link = MavLink::connect(&v.address, v.kind, &link_cfg)?;
                let res = uploader.upload(&mut link, &plan);
                link.close();
                Ok(res?)
            })
            .await?;

            info!("mission push: {} items accepted by {}", report.sent, vehicle);
            Ok(())
        }
    }
}

async fn disarm(cfg: &Config, name: &str) -> Result<()> {
    let v = find_vehicle(cfg, name)?.clone();
    let link_cfg = cfg.link.clone();
    let timeout = Duration::from_millis(cfg.session.arm_timeout_ms);

    blocking(move || {
        let mut link = MavLink::connect(&v.address, v.kind, &link_cfg)?;
        let res = link.disarm(timeout);
        link.close();
        Ok(res?)
    })
    .await?;

    info!("{} disarmed", name);
    Ok(())
}

impl OrbitCfg {
    fn structure(&self, center_lat: f64, center_lon: f64) -> StructureSpec {
        StructureSpec {
            center_lat,
            center_lon,
            width_m: self.width_m,
            depth_m: self.depth_m,
            base_alt_m: self.base_alt_m,
            height_m: self.height_m,
        }
    }
}

struct Anchor {
    home: (f64, f64),
    current: (f64, f64),
}

async fn fetch_anchor(cfg: &Config, name: &str) -> Result<Anchor> {
    let v = find_vehicle(cfg, name)?.clone();
    let link_cfg = cfg.link.clone();
    let timeout = Duration::from_millis(cfg.session.query_timeout_ms);

    blocking(move || {
        let mut link = MavLink::connect(&v.address, v.kind, &link_cfg)?;
        let home = query::home_position(&mut link, timeout);
        let current = query::current_position(&mut link, timeout);
        link.close();
        let (home, current) = (home?, current?);
        info!("orbit: {} home ({:.7}, {:.7}), now ({:.7}, {:.7})", v.name, home.0, home.1, current.lat_deg(), current.lon_deg());
        Ok(Anchor { home, current: (current.lat_deg(), current.lon_deg()) })
    })
    .await
}

fn find_vehicle<'a>(cfg: &'a Config, name: &str) -> Result<&'a VehicleConfig> {
    cfg.vehicles
        .iter()
        .find(|v| v.name == name)
        .with_context(|| format!("no vehicle named {:?} in config", name))
}

/// Link calls block; keep them off the runtime threads.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.context("blocking task failed")?
}

fn describe_plan(plan: &MissionPlan) -> String {
    let mut out = String::new();
    let mut path_m = 0.0;
    let mut prev: Option<(f64, f64)> = None;

    out.push_str(&format!("{:>4}  {:<16} {:>12} {:>13} {:>8}\n", "seq", "command", "lat", "lon", "alt"));
    for item in plan {
        out.push_str(&format!(
            "{:>4}  {:<16} {:>12.7} {:>13.7} {:>8.2}\n",
            item.seq,
            format!("{:?}", item.command),
            item.lat_deg(),
            item.lon_deg(),
            item.z
        ));
        if item.x == 0 && item.y == 0 {
            continue;
        }
        let here = (item.lat_deg(), item.lon_deg());
        if let Some(p) = prev {
            path_m += distance_m(p.0, p.1, here.0, here.1);
        }
        prev = Some(here);
    }
    out.push_str(&format!("{} items, {:.1} m between positioned items\n", plan.len(), path_m));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_proto::VehicleKind;

    const SAMPLE: &str = r#"
[link]
sys_id = 255

[session]
arrival_threshold_m = 3.0

[fleet]
settle_ms = 500

[[vehicle]]
name = "rover"
address = "tcp:127.0.0.1:5762"
kind = "rover"
mission_file = "rover_mission.waypoints"

[[vehicle]]
name = "copter"
address = "tcp:127.0.0.1:5782"
kind = "copter"
takeoff_alt_m = 5.0

[orbit]
vehicle = "copter"
home_offset_east_m = 20.0
home_offset_north_m = -5.0
width_m = 6.0
depth_m = 4.0
height_m = 8.0

[orbit.params]
points_per_ring = 12
"#;

    #[test]
    fn sample_config_parses_with_defaults() {
        let cfg = parse_config(SAMPLE).unwrap();
        assert_eq!(cfg.link.sys_id, 255);
        assert_eq!(cfg.link.comp_id, LinkConfig::default().comp_id);
        assert_eq!(cfg.session.arrival_threshold_m, 3.0);
        assert_eq!(cfg.session.arrival_required, 5);
        assert_eq!(cfg.fleet.settle_ms, 500);

        assert_eq!(cfg.vehicles.len(), 2);
        assert_eq!(cfg.vehicles[0].kind, VehicleKind::Rover);
        assert_eq!(cfg.vehicles[0].takeoff_alt_m, 3.0);
        assert_eq!(cfg.vehicles[1].takeoff_alt_m, 5.0);
        assert!(cfg.vehicles[1].mission_file.is_none());

        let o = cfg.orbit.as_ref().unwrap();
        assert_eq!(o.params.points_per_ring, 12);
        assert_eq!(o.params.max_rings, OrbitParams::default().max_rings);
        assert!(find_vehicle(&cfg, "copter").is_ok());
        assert!(find_vehicle(&cfg, "boat").is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let bad = "[[vehicle]]\nname = \"x\"\naddress = \"tcp:a:1\"\nkind = \"submarine\"\n";
        assert!(parse_config(bad).is_err());
    }

    #[test]
    fn describe_lists_items_and_path() {
        let plan = waypoints::parse_plan(
            "QGC WPL 110\n\
             0\t1\t0\t16\t0\t0\t0\t0\t35.0\t139.0\t0\t1\n\
             1\t0\t3\t16\t0\t0\t0\t0\t35.001\t139.0\t10\t1\n\
             2\t0\t3\t20\t0\t0\t0\t0\t0\t0\t0\t1\n",
        );
        let text = describe_plan(&plan);
        assert_eq!(text.lines().count(), 5);
        assert!(text.contains("ReturnToLaunch"));
        assert!(text.ends_with("3 items, 111.2 m between positioned items\n"));
    }
}
