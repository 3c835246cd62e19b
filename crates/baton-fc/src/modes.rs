use baton_proto::VehicleKind;
use std::fmt;

/// Flight modes the tool commands or reports. Numbers are ArduPilot custom
/// modes, which differ between Copter and Rover (boats run Rover firmware).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightMode {
    Manual,
    Stabilize,
    Hold,
    Loiter,
    Guided,
    Auto,
    Rtl,
    Land,
}

const COPTER: &[(FlightMode, u32)] = &[
    (FlightMode::Stabilize, 0),
    (FlightMode::Auto, 3),
    (FlightMode::Guided, 4),
    (FlightMode::Loiter, 5),
    (FlightMode::Rtl, 6),
    (FlightMode::Land, 9),
];

const ROVER: &[(FlightMode, u32)] = &[
    (FlightMode::Manual, 0),
    (FlightMode::Hold, 4),
    (FlightMode::Loiter, 5),
    (FlightMode::Auto, 10),
    (FlightMode::Rtl, 11),
    (FlightMode::Guided, 15),
];

fn table(kind: VehicleKind) -> &'static [(FlightMode, u32)] {
    match kind {
        VehicleKind::Copter => COPTER,
        VehicleKind::Rover | VehicleKind::Boat => ROVER,
    }
}

impl FlightMode {
    pub fn custom_mode(self, kind: VehicleKind) -> Option<u32> {
        table(kind).iter().find(|(m, _)| *m == self).map(|(_, n)| *n)
    }

    pub fn name(self) -> &'static str {
        match self {
            FlightMode::Manual => "MANUAL",
            FlightMode::Stabilize => "STABILIZE",
            FlightMode::Hold => "HOLD",
            FlightMode::Loiter => "LOITER",
            FlightMode::Guided => "GUIDED",
            FlightMode::Auto => "AUTO",
            FlightMode::Rtl => "RTL",
            FlightMode::Land => "LAND",
        }
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
