use crate::geo::distance_m;

pub const DEFAULT_REPORT_DELTA_M: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrivalUpdate {
    pub distance_m: f64,
    /// Consecutive samples inside the threshold, including this one.
    pub confirmations: u32,
    /// True on exactly one sample: the one completing the run of confirmations.
    pub arrived: bool,
    /// Distance moved more than the report delta since the last report.
    pub report: bool,
}

/// Declares arrival at a fixed target once `required` consecutive position
/// samples fall inside `threshold_m`. A sample outside resets the run;
/// a missing sample does neither.
///
/// A detector built with [`ArrivalDetector::after_departure`] ignores samples
/// inside the threshold until one has been seen outside it, for targets the
/// vehicle starts on (home).
#[derive(Debug, Clone)]
pub struct ArrivalDetector {
    target_lat: f64,
    target_lon: f64,
    threshold_m: f64,
    required: u32,
    report_delta_m: f64,

    departed: bool,
    consecutive: u32,
    last_reported: Option<f64>,
    arrived: bool,
    missed: u64,
}

impl ArrivalDetector {
    pub fn new(target_lat: f64, target_lon: f64, threshold_m: f64, required: u32) -> Self {
        Self {
            target_lat,
            target_lon,
            threshold_m,
            required: required.max(1),
            report_delta_m: DEFAULT_REPORT_DELTA_M,
            departed: true,
            consecutive: 0,
            last_reported: None,
            arrived: false,
            missed: 0,
        }
    }

    pub fn after_departure(mut self) -> Self {
        self.departed = false;
        self
    }

    pub fn observe(&mut self, lat: f64, lon: f64) -> ArrivalUpdate {
        let d = distance_m(lat, lon, self.target_lat, self.target_lon);

        if d >= self.threshold_m {
            self.departed = true;
            self.consecutive = 0;
        } else if self.departed {
            self.consecutive = self.consecutive.saturating_add(1);
        }

        let arrived = !self.arrived && self.consecutive >= self.required;
        if arrived {
            self.arrived = true;
        }

        let report = match self.last_reported {
            Some(prev) => (d - prev).abs() > self.report_delta_m,
            None => true,
        };
        if report {
            self.last_reported = Some(d);
        }

        ArrivalUpdate { distance_m: d, confirmations: self.consecutive, arrived, report }
    }

    /// A receive window passed without a sample.
    pub fn missed(&mut self) {
        self.missed += 1;
    }

    pub fn is_arrived(&self) -> bool {
        self.arrived
    }

    pub fn confirmations(&self) -> u32 {
        self.consecutive
    }

    pub fn missed_samples(&self) -> u64 {
        self.missed
    }

    pub fn has_departed(&self) -> bool {
        self.departed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::local_offset_to_lat_lon;

    const TARGET: (f64, f64) = (35.879768, 140.348495);

    /// Position `m` metres north of the target.
    fn north_of_target(m: f64) -> (f64, f64) {
        local_offset_to_lat_lon(TARGET.0, TARGET.1, 0.0, m)
    }

    fn first_arrival(det: &mut ArrivalDetector, dists: &[f64]) -> Option<usize> {
        let mut hit = None;
        for (i, &m) in dists.iter().enumerate() {
            let (lat, lon) = north_of_target(m);
            if det.observe(lat, lon).arrived {
                assert!(hit.is_none(), "arrival fired twice");
                hit = Some(i + 1);
            }
        }
        hit
    }

    #[test]
    fn arrives_on_third_consecutive_sample() {
        let mut det = ArrivalDetector::new(TARGET.0, TARGET.1, 5.0, 3);
        assert_eq!(first_arrival(&mut det, &[10.0, 10.0, 4.0, 4.0, 4.0]), Some(5));
        assert!(det.is_arrived());
    }

    #[test]
    fn outlier_resets_the_run() {
        let mut det = ArrivalDetector::new(TARGET.0, TARGET.1, 5.0, 3);
        assert_eq!(first_arrival(&mut det, &[10.0, 4.0, 10.0, 4.0, 4.0, 4.0]), Some(6));
    }

    #[test]
    fn fires_only_once() {
        let mut det = ArrivalDetector::new(TARGET.0, TARGET.1, 5.0, 2);
        assert_eq!(first_arrival(&mut det, &[1.0, 1.0, 1.0, 1.0, 10.0, 1.0, 1.0]), Some(2));
    }

    #[test]
    fn missing_samples_do_not_touch_the_run() {
        let mut det = ArrivalDetector::new(TARGET.0, TARGET.1, 5.0, 3);
        let (lat, lon) = north_of_target(2.0);
        det.observe(lat, lon);
        det.observe(lat, lon);
        det.missed();
        det.missed();
        assert_eq!(det.confirmations(), 2);
        assert!(det.observe(lat, lon).arrived);
        assert_eq!(det.missed_samples(), 2);
    }

    #[test]
    fn starting_on_the_target_needs_a_departure() {
        let mut det = ArrivalDetector::new(TARGET.0, TARGET.1, 5.0, 3).after_departure();
        assert_eq!(first_arrival(&mut det, &[0.0, 1.0, 0.5, 2.0]), None);
        assert!(!det.has_departed());
        assert_eq!(det.confirmations(), 0);
        assert_eq!(first_arrival(&mut det, &[220.0, 40.0, 3.0, 2.0, 1.0]), Some(5));
        assert!(det.has_departed());
    }

    #[test]
    fn reports_only_significant_changes() {
        let mut det = ArrivalDetector::new(TARGET.0, TARGET.1, 5.0, 3);
        let reports: Vec<bool> = [100.0, 98.0, 96.0, 94.0, 93.0, 80.0]
            .iter()
            .map(|&m| {
                let (lat, lon) = north_of_target(m);
                det.observe(lat, lon).report
            })
            .collect();
        assert_eq!(reports, vec![true, false, false, true, false, true]);
    }
}
