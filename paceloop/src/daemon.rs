//! Load-adaptive daemon loop driver.
//!
//! The [`Daemon`] owns a [`Controller`] and drives the runtime cycle:
//!
//! ```text
//! loop {
//!     should_continue()?   no -> return Ok(())
//!     do_work()            Err -> return Err (not caught here)
//!     sleep(next pause)
//! }
//! ```
//!
//! The pause comes either from the built-in adaptive throttle or, when the
//! controller declares the capability, from the controller itself. The loop
//! is strictly sequential on the calling thread: the sleep is a blocking
//! suspension, there is no overlap between iterations, and the stop signal
//! is honored only between them - worst-case shutdown latency is one work
//! invocation plus one pause.
//!
//! # Example
//!
//! ```ignore
//! use paceloop::daemon::{Daemon, DaemonConfig};
//!
//! let daemon = Daemon::new(DaemonConfig::default(), my_controller);
//! daemon.run()?; // blocks until the controller says stop
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::controller::{Controller, ThrottleSource};
use crate::host::{HostMetrics, SystemMetrics};
use crate::throttle::{AdaptiveThrottle, ThrottleTuning};

/// Default starting pause between iterations (1ms).
pub const DEFAULT_INITIAL_PAUSE_MICROS: i64 = 1_000;

/// Default per-core load percentage the loop tries to stay under.
pub const DEFAULT_CPU_TARGET_PERCENT: i64 = 20;

/// Default pause adjustment per sampling event (100us).
pub const DEFAULT_STEP_MICROS: i64 = 100;

/// Default seconds between load-average samples.
pub const DEFAULT_CHECK_INTERVAL_SECS: i64 = 60;

/// Construction-time daemon configuration.
///
/// All values accept any integer; out-of-range values produce degenerate
/// but defined behavior rather than errors (a non-positive initial pause is
/// clamped to 1us by the throttle floor on the first computation).
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Starting pause in microseconds.
    pub initial_pause_micros: i64,

    /// Per-core load percentage to stay under.
    pub cpu_target_percent: i64,

    /// Pause adjustment per sampling event, in microseconds.
    pub step_micros: i64,

    /// Seconds between load-average samples. Zero samples every iteration.
    pub check_interval_secs: i64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            initial_pause_micros: DEFAULT_INITIAL_PAUSE_MICROS,
            cpu_target_percent: DEFAULT_CPU_TARGET_PERCENT,
            step_micros: DEFAULT_STEP_MICROS,
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
        }
    }
}

/// Cloneable reference to a daemon's tuning knobs.
///
/// Given to the controller once, before the loop starts. Setters take
/// effect on the next sampling event, so the controller can retune the
/// throttle mid-run - including from inside `do_work`.
#[derive(Debug, Clone)]
pub struct DaemonHandle {
    tuning: Arc<ThrottleTuning>,
}

impl DaemonHandle {
    fn new(tuning: Arc<ThrottleTuning>) -> Self {
        Self { tuning }
    }

    /// Set the target per-core load percentage.
    pub fn set_cpu_target(&self, percent: i64) {
        self.tuning.set_cpu_target(percent);
    }

    /// Set the adjustment step (sensitivity) in microseconds.
    pub fn set_step_micros(&self, micros: i64) {
        self.tuning.set_step_micros(micros);
    }

    /// Set the sampling interval in seconds.
    pub fn set_check_interval(&self, seconds: i64) {
        self.tuning.set_check_interval(seconds);
    }

    /// Current target per-core load percentage.
    pub fn cpu_target(&self) -> i64 {
        self.tuning.cpu_target_percent()
    }

    /// Current adjustment step in microseconds.
    pub fn step_micros(&self) -> i64 {
        self.tuning.step_micros()
    }

    /// Current sampling interval in seconds.
    pub fn check_interval(&self) -> i64 {
        self.tuning.check_interval_secs()
    }
}

/// The daemon loop.
///
/// Owns the controller and the throttle state for one run. Constructing the
/// daemon binds the handle and resolves the throttle source; [`Daemon::run`]
/// consumes the daemon and blocks until the controller terminates the loop.
pub struct Daemon<C: Controller> {
    controller: C,
    throttle: AdaptiveThrottle,
    source: ThrottleSource,
    tuning: Arc<ThrottleTuning>,
}

impl<C: Controller> Daemon<C> {
    /// Create a daemon reading real host metrics.
    pub fn new(config: DaemonConfig, controller: C) -> Self {
        Self::with_metrics(config, controller, Arc::new(SystemMetrics::new()))
    }

    /// Create a daemon with a custom metrics source.
    ///
    /// Binds the handle into the controller and resolves the throttle
    /// source before the first iteration. The core count is probed from
    /// `metrics` exactly once, here.
    pub fn with_metrics(
        config: DaemonConfig,
        mut controller: C,
        metrics: Arc<dyn HostMetrics>,
    ) -> Self {
        let tuning = Arc::new(ThrottleTuning::new(
            config.cpu_target_percent,
            config.step_micros,
            config.check_interval_secs,
        ));

        controller.bind(DaemonHandle::new(Arc::clone(&tuning)));
        let source = controller.throttle_source();

        let throttle =
            AdaptiveThrottle::new(config.initial_pause_micros, Arc::clone(&tuning), metrics);

        Self {
            controller,
            throttle,
            source,
            tuning,
        }
    }

    /// Construct and run in one call.
    ///
    /// Convenience for embedders that have nothing to do between
    /// construction and the blocking loop.
    pub fn start(config: DaemonConfig, controller: C) -> Result<(), C::Error> {
        Self::new(config, controller).run()
    }

    /// A fresh handle to this daemon's tuning knobs.
    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle::new(Arc::clone(&self.tuning))
    }

    /// Run the loop until the controller terminates it.
    ///
    /// Blocks the calling thread. Returns `Ok(())` the first time
    /// `should_continue` answers false; a `do_work` error propagates
    /// immediately and ends the loop abnormally.
    pub fn run(mut self) -> Result<(), C::Error> {
        info!(
            cpu_target = self.tuning.cpu_target_percent(),
            step_micros = self.tuning.step_micros(),
            check_interval_secs = self.tuning.check_interval_secs(),
            cpu_cores = self.throttle.cpu_cores(),
            throttle_source = ?self.source,
            "Daemon starting"
        );

        while self.controller.should_continue() {
            self.controller.do_work()?;

            let pause = match self.source {
                ThrottleSource::Controller => self.controller.throttle(),
                ThrottleSource::Adaptive => self.compute_throttle(),
            };
            thread::sleep(pause);
        }

        info!("Daemon stopped");
        Ok(())
    }

    /// Run the built-in feedback algorithm once and return the pause.
    ///
    /// This is the adaptive path of the loop, public so operators and tests
    /// can drive the throttle directly. Adjustments are forwarded to the
    /// controller's `notify` hook.
    pub fn compute_throttle(&mut self) -> Duration {
        let decision = self.throttle.compute();

        if let Some(adjustment) = decision.adjustment {
            debug!(
                pause_micros = self.throttle.pause_micros(),
                adjustment = ?adjustment,
                "Pause adjusted"
            );
            self.controller.notify(adjustment.message());
        }

        decision.pause
    }
}
