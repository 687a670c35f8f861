//! Adaptive pause-duration feedback control.
//!
//! [`AdaptiveThrottle`] owns the pause state machine that converts periodic
//! load-average samples into the microsecond pause the daemon sleeps between
//! iterations. The algorithm is a fixed-gain integral controller:
//!
//! ```text
//! every check_interval_secs:
//!     normalized = load_average / cpu_cores * 100
//!     normalized >= cpu_target_percent  ->  pause += step  ("throttling down")
//!     normalized <  cpu_target_percent  ->  pause -= step  ("throttling up")
//! always:
//!     pause = max(pause, 1us)
//! ```
//!
//! The step is constant, not proportional, so the pause oscillates around
//! the target instead of settling exactly. Sampling cadence is driven by
//! iteration frequency rather than a wall-clock timer: the interval check
//! happens inside [`AdaptiveThrottle::compute`], and calls landing inside
//! the interval take a cheap path that touches no state.
//!
//! [`ThrottleTuning`] holds the three knobs, behind atomics so a bound
//! controller handle can retune a running loop.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::host::{discover_cpu_cores, HostMetrics};

/// Shared throttle knobs, adjustable while the loop is running.
///
/// Plain mutators with no validation: any integer is accepted, and
/// degenerate values fall out of the algorithm's arithmetic - an interval
/// of zero or less samples on every call, a zero step leaves the pause
/// where it is, a negative step inverts the feedback direction.
#[derive(Debug)]
pub struct ThrottleTuning {
    cpu_target_percent: AtomicI64,
    step_micros: AtomicI64,
    check_interval_secs: AtomicI64,
}

impl ThrottleTuning {
    /// Create tuning knobs with the given starting values.
    pub fn new(cpu_target_percent: i64, step_micros: i64, check_interval_secs: i64) -> Self {
        Self {
            cpu_target_percent: AtomicI64::new(cpu_target_percent),
            step_micros: AtomicI64::new(step_micros),
            check_interval_secs: AtomicI64::new(check_interval_secs),
        }
    }

    /// Per-core load percentage the loop tries to stay under.
    pub fn cpu_target_percent(&self) -> i64 {
        self.cpu_target_percent.load(Ordering::Relaxed)
    }

    /// Set the target per-core load percentage.
    pub fn set_cpu_target(&self, percent: i64) {
        self.cpu_target_percent.store(percent, Ordering::Relaxed);
    }

    /// Microseconds added to or removed from the pause per sampling event.
    pub fn step_micros(&self) -> i64 {
        self.step_micros.load(Ordering::Relaxed)
    }

    /// Set the adjustment step (sensitivity) in microseconds.
    pub fn set_step_micros(&self, micros: i64) {
        self.step_micros.store(micros, Ordering::Relaxed);
    }

    /// Minimum seconds between load-average samples.
    pub fn check_interval_secs(&self) -> i64 {
        self.check_interval_secs.load(Ordering::Relaxed)
    }

    /// Set the sampling interval in seconds.
    pub fn set_check_interval(&self, seconds: i64) {
        self.check_interval_secs.store(seconds, Ordering::Relaxed);
    }
}

/// Direction of a pause adjustment made by a sampling event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    /// The pause grew - the host is at or above the load target.
    BackedOff,
    /// The pause shrank - the host has headroom.
    SpedUp,
}

impl Adjustment {
    /// Notification message delivered to the controller.
    pub fn message(&self) -> &'static str {
        match self {
            Adjustment::BackedOff => "throttling down",
            Adjustment::SpedUp => "throttling up",
        }
    }
}

/// Outcome of one [`AdaptiveThrottle::compute`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleDecision {
    /// How long the loop should sleep before the next iteration.
    pub pause: Duration,
    /// The adjustment made by this call, if a sample was taken and usable.
    pub adjustment: Option<Adjustment>,
}

/// The pause-duration state machine.
///
/// One instance per daemon, mutated only from the loop's own thread of
/// control. The core count is discovered once at construction and the
/// metrics source is consulted at most once per sampling interval.
pub struct AdaptiveThrottle {
    /// Current sleep duration in microseconds. Always >= 1 after compute.
    pause_micros: i64,

    /// When the last load sample was taken.
    last_check: Instant,

    /// Logical core count used to normalize the raw load average.
    cpu_cores: usize,

    /// Shared knobs, also writable through the daemon handle.
    tuning: Arc<ThrottleTuning>,

    /// Source of load-average readings.
    metrics: Arc<dyn HostMetrics>,
}

impl std::fmt::Debug for AdaptiveThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveThrottle")
            .field("pause_micros", &self.pause_micros)
            .field("cpu_cores", &self.cpu_cores)
            .field("tuning", &self.tuning)
            .finish_non_exhaustive()
    }
}

impl AdaptiveThrottle {
    /// Create a throttle with the given starting pause.
    ///
    /// Seeds the sampling clock with the current time, so the first sample
    /// happens one full interval after construction. The core count is
    /// probed once here and defaults to 1 when the host gives no answer.
    pub fn new(
        initial_pause_micros: i64,
        tuning: Arc<ThrottleTuning>,
        metrics: Arc<dyn HostMetrics>,
    ) -> Self {
        let cpu_cores = discover_cpu_cores(metrics.as_ref());

        Self {
            pause_micros: initial_pause_micros,
            last_check: Instant::now(),
            cpu_cores,
            tuning,
            metrics,
        }
    }

    /// Current pause in microseconds.
    pub fn pause_micros(&self) -> i64 {
        self.pause_micros
    }

    /// Core count discovered at construction.
    pub fn cpu_cores(&self) -> usize {
        self.cpu_cores
    }

    /// Compute the pause for the next iteration.
    ///
    /// Samples the load average when the interval has elapsed (or the
    /// interval is zero or negative), adjusting the pause by one step in
    /// the indicated direction. Calls landing inside the interval return
    /// the unchanged pause without touching the sampling clock.
    ///
    /// The one-microsecond floor is applied on every call, not only after
    /// a decrement, so it also repairs an externally-seeded invalid pause.
    pub fn compute(&mut self) -> ThrottleDecision {
        let adjustment = if self.sample_due() {
            self.sample()
        } else {
            None
        };

        // Never allow the pause to dip below one microsecond.
        if self.pause_micros < 1 {
            self.pause_micros = 1;
        }

        ThrottleDecision {
            pause: Duration::from_micros(self.pause_micros as u64),
            adjustment,
        }
    }

    fn sample_due(&self) -> bool {
        let interval = self.tuning.check_interval_secs();
        interval <= 0 || self.last_check.elapsed() >= Duration::from_secs(interval as u64)
    }

    /// Take one load sample and adjust the pause.
    ///
    /// Advances the sampling clock whether or not the host produced a
    /// reading - an unavailable load average consumes the cadence slot
    /// instead of turning every iteration into a probe attempt.
    fn sample(&mut self) -> Option<Adjustment> {
        let adjustment = match self.metrics.load_average() {
            Some(load) => {
                let normalized = load / self.cpu_cores as f64 * 100.0;
                let target = self.tuning.cpu_target_percent() as f64;
                let step = self.tuning.step_micros();

                let adjustment = if normalized >= target {
                    self.pause_micros = self.pause_micros.saturating_add(step);
                    Adjustment::BackedOff
                } else {
                    self.pause_micros = self.pause_micros.saturating_sub(step);
                    Adjustment::SpedUp
                };

                debug!(
                    load = format!("{:.2}", load),
                    normalized_percent = format!("{:.1}", normalized),
                    target_percent = target,
                    pause_micros = self.pause_micros,
                    adjustment = ?adjustment,
                    "Load sampled"
                );

                Some(adjustment)
            }
            None => {
                debug!("Load average unavailable, skipping adjustment");
                None
            }
        };

        self.last_check = Instant::now();
        adjustment
    }

    /// Move the sampling clock into the past, as if the last sample had
    /// been taken `by` ago.
    #[cfg(test)]
    fn backdate_last_check(&mut self, by: Duration) {
        self.last_check = self
            .last_check
            .checked_sub(by)
            .expect("monotonic clock too young to backdate");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Metrics source returning fixed values.
    ///
    /// The load reading sits behind a mutex so tests can change it between
    /// compute calls.
    struct FixedMetrics {
        load: Mutex<Option<f64>>,
        cores: Option<usize>,
    }

    impl FixedMetrics {
        fn new(load: Option<f64>, cores: Option<usize>) -> Self {
            Self {
                load: Mutex::new(load),
                cores,
            }
        }

        fn set_load(&self, load: Option<f64>) {
            *self.load.lock().unwrap() = load;
        }
    }

    impl HostMetrics for FixedMetrics {
        fn load_average(&self) -> Option<f64> {
            *self.load.lock().unwrap()
        }

        fn cpu_cores(&self) -> Option<usize> {
            self.cores
        }
    }

    struct TestThrottle {
        throttle: AdaptiveThrottle,
        tuning: Arc<ThrottleTuning>,
        metrics: Arc<FixedMetrics>,
    }

    fn throttle_with(
        initial_pause: i64,
        load: Option<f64>,
        cores: Option<usize>,
        target: i64,
        step: i64,
        interval: i64,
    ) -> TestThrottle {
        let tuning = Arc::new(ThrottleTuning::new(target, step, interval));
        let metrics = Arc::new(FixedMetrics::new(load, cores));
        let throttle = AdaptiveThrottle::new(
            initial_pause,
            Arc::clone(&tuning),
            Arc::clone(&metrics) as Arc<dyn HostMetrics>,
        );

        TestThrottle {
            throttle,
            tuning,
            metrics,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Floor invariant
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn pause_never_drops_below_one_microsecond() {
        // Headroom on every sample, step bigger than the pause.
        let mut t = throttle_with(50, Some(0.0), Some(1), 20, 100, 0);

        for _ in 0..5 {
            let decision = t.throttle.compute();
            assert!(decision.pause >= Duration::from_micros(1));
        }
        assert_eq!(t.throttle.pause_micros(), 1);
    }

    #[test]
    fn floor_repairs_non_positive_initial_pause() {
        // Interval not elapsed: no sample, but the clamp still applies.
        let mut t = throttle_with(-250, Some(0.0), Some(1), 20, 100, 60);

        let decision = t.throttle.compute();
        assert_eq!(decision.pause, Duration::from_micros(1));
        assert_eq!(decision.adjustment, None);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sampling cadence
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn calls_inside_interval_leave_state_unchanged() {
        let mut t = throttle_with(1_000, Some(9.0), Some(1), 20, 100, 60);

        for _ in 0..10 {
            let decision = t.throttle.compute();
            assert_eq!(decision.pause, Duration::from_micros(1_000));
            assert_eq!(decision.adjustment, None);
        }
    }

    #[test]
    fn zero_interval_samples_every_call() {
        let mut t = throttle_with(1_000, Some(9.0), Some(1), 20, 100, 0);

        // Every call adjusts, proving each one re-sampled.
        assert_eq!(t.throttle.compute().adjustment, Some(Adjustment::BackedOff));
        assert_eq!(t.throttle.compute().adjustment, Some(Adjustment::BackedOff));
        assert_eq!(t.throttle.pause_micros(), 1_200);
    }

    #[test]
    fn zero_interval_updates_sampling_clock_every_call() {
        let mut t = throttle_with(1_000, Some(9.0), Some(1), 20, 100, 0);
        t.throttle.compute();

        // Restoring a long interval right after a sample means the next
        // call lands inside it - only possible if the clock advanced.
        t.tuning.set_check_interval(60);
        let decision = t.throttle.compute();
        assert_eq!(decision.adjustment, None);
    }

    #[test]
    fn negative_interval_samples_every_call() {
        let mut t = throttle_with(1_000, Some(9.0), Some(1), 20, 100, -5);

        assert_eq!(t.throttle.compute().adjustment, Some(Adjustment::BackedOff));
        assert_eq!(t.throttle.compute().adjustment, Some(Adjustment::BackedOff));
    }

    #[test]
    fn sample_taken_once_interval_elapses() {
        // target=20, step=100, interval=60, normalized load 50:
        // the first sample after the interval lifts 1000 to 1100.
        let mut t = throttle_with(1_000, Some(0.5), Some(1), 20, 100, 60);
        t.throttle.backdate_last_check(Duration::from_secs(61));

        let decision = t.throttle.compute();
        assert_eq!(decision.pause, Duration::from_micros(1_100));
        assert_eq!(decision.adjustment, Some(Adjustment::BackedOff));
        assert_eq!(decision.adjustment.unwrap().message(), "throttling down");

        // The clock advanced, so the follow-up call is inside the interval.
        let decision = t.throttle.compute();
        assert_eq!(decision.adjustment, None);
        assert_eq!(decision.pause, Duration::from_micros(1_100));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Directional response
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn high_load_backs_off_by_exactly_one_step() {
        let mut t = throttle_with(1_000, Some(5.0), Some(1), 20, 100, 0);

        for expected in [1_100, 1_200, 1_300] {
            let decision = t.throttle.compute();
            assert_eq!(decision.adjustment, Some(Adjustment::BackedOff));
            assert_eq!(t.throttle.pause_micros(), expected);
        }
    }

    #[test]
    fn low_load_speeds_up_by_exactly_one_step() {
        let mut t = throttle_with(1_000, Some(0.0), Some(1), 20, 100, 0);

        for expected in [900, 800, 700] {
            let decision = t.throttle.compute();
            assert_eq!(decision.adjustment, Some(Adjustment::SpedUp));
            assert_eq!(decision.adjustment.unwrap().message(), "throttling up");
            assert_eq!(t.throttle.pause_micros(), expected);
        }
    }

    #[test]
    fn load_exactly_at_target_backs_off() {
        // Load 0.2 on one core normalizes to 20 percent - at target.
        let mut t = throttle_with(1_000, Some(0.2), Some(1), 20, 100, 0);

        let decision = t.throttle.compute();
        assert_eq!(decision.adjustment, Some(Adjustment::BackedOff));
    }

    #[test]
    fn step_saturates_instead_of_overflowing() {
        let mut t = throttle_with(i64::MAX - 10, Some(5.0), Some(1), 20, i64::MAX, 0);

        let decision = t.throttle.compute();
        assert_eq!(t.throttle.pause_micros(), i64::MAX);
        assert_eq!(decision.adjustment, Some(Adjustment::BackedOff));
    }

    #[test]
    fn negative_step_is_accepted_verbatim() {
        // A negative step inverts the direction - degenerate but defined.
        let mut t = throttle_with(1_000, Some(5.0), Some(1), 20, -100, 0);

        let decision = t.throttle.compute();
        assert_eq!(decision.adjustment, Some(Adjustment::BackedOff));
        assert_eq!(t.throttle.pause_micros(), 900);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Core-count normalization
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn missing_core_probe_defaults_to_one() {
        let t = throttle_with(1_000, Some(0.5), None, 20, 100, 0);
        assert_eq!(t.throttle.cpu_cores(), 1);
    }

    #[test]
    fn normalization_divides_by_core_count() {
        // Load 1.6 over 8 cores is 20 percent per core - at target.
        let mut many = throttle_with(1_000, Some(1.6), Some(8), 20, 100, 0);
        assert_eq!(
            many.throttle.compute().adjustment,
            Some(Adjustment::BackedOff)
        );

        // The same raw load over 16 cores has headroom.
        let mut wide = throttle_with(1_000, Some(1.6), Some(16), 20, 100, 0);
        assert_eq!(wide.throttle.compute().adjustment, Some(Adjustment::SpedUp));
    }

    #[test]
    fn single_core_normalization_tracks_raw_load() {
        // With the fallback count of 1, normalized percent is raw load x100.
        let mut t = throttle_with(1_000, Some(0.25), None, 20, 100, 0);
        assert_eq!(t.throttle.compute().adjustment, Some(Adjustment::BackedOff));

        t.metrics.set_load(Some(0.15));
        assert_eq!(t.throttle.compute().adjustment, Some(Adjustment::SpedUp));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Unavailable load samples
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn missing_load_sample_consumes_cadence_slot() {
        let mut t = throttle_with(1_000, None, Some(1), 20, 100, 60);
        t.throttle.backdate_last_check(Duration::from_secs(61));

        // Sample was due, but the host had nothing to say.
        let decision = t.throttle.compute();
        assert_eq!(decision.adjustment, None);
        assert_eq!(decision.pause, Duration::from_micros(1_000));

        // Load comes back - still inside the interval, so no sample yet.
        t.metrics.set_load(Some(9.0));
        let decision = t.throttle.compute();
        assert_eq!(decision.adjustment, None);
        assert_eq!(decision.pause, Duration::from_micros(1_000));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tuning knobs
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn tuning_setters_round_trip() {
        let tuning = ThrottleTuning::new(20, 100, 60);

        tuning.set_cpu_target(85);
        tuning.set_step_micros(2_500);
        tuning.set_check_interval(5);

        assert_eq!(tuning.cpu_target_percent(), 85);
        assert_eq!(tuning.step_micros(), 2_500);
        assert_eq!(tuning.check_interval_secs(), 5);
    }

    #[test]
    fn tuning_accepts_negative_values() {
        let tuning = ThrottleTuning::new(20, 100, 60);

        tuning.set_cpu_target(-10);
        tuning.set_step_micros(-100);
        tuning.set_check_interval(-1);

        assert_eq!(tuning.cpu_target_percent(), -10);
        assert_eq!(tuning.step_micros(), -100);
        assert_eq!(tuning.check_interval_secs(), -1);
    }

    #[test]
    fn retuned_step_applies_to_next_sample() {
        let mut t = throttle_with(1_000, Some(5.0), Some(1), 20, 100, 0);
        t.throttle.compute();
        assert_eq!(t.throttle.pause_micros(), 1_100);

        t.tuning.set_step_micros(400);
        t.throttle.compute();
        assert_eq!(t.throttle.pause_micros(), 1_500);
    }
}
