//! Controller contract for the daemon loop.
//!
//! A [`Controller`] is the caller-supplied collaborator that gives the loop
//! its work unit, its stop condition, and its notification sink. The loop
//! owns the controller for its whole lifetime and calls it from a single
//! thread, so implementations need no internal locking.

use std::time::Duration;

use crate::daemon::DaemonHandle;

/// Which component computes the pause between iterations.
///
/// Resolved once when the daemon is constructed, not re-checked per
/// iteration. A controller that declares [`ThrottleSource::Controller`]
/// replaces the built-in load-feedback algorithm entirely - the daemon
/// never samples host load on its behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThrottleSource {
    /// The daemon's built-in load-feedback algorithm.
    #[default]
    Adaptive,
    /// The controller's own [`Controller::throttle`] implementation.
    Controller,
}

/// Capability set the daemon loop requires from its embedding job.
///
/// `should_continue` and `do_work` are the only methods a controller must
/// provide; the rest default to "no custom behavior".
pub trait Controller {
    /// Error type surfaced by [`Controller::do_work`].
    ///
    /// Work failures are not caught by the loop - they propagate out of
    /// `Daemon::run` and terminate the loop abnormally.
    type Error;

    /// Receives a handle to the running daemon's tuning knobs.
    ///
    /// Called exactly once, during daemon construction, before the first
    /// iteration. The handle is cheap to clone and may be stashed for
    /// mid-run reconfiguration. Must not block.
    fn bind(&mut self, _handle: DaemonHandle) {}

    /// Polled at the top of every iteration.
    ///
    /// Returning `false` terminates the loop cleanly. This is the only
    /// cancellation mechanism the loop provides, so the check must be cheap
    /// and non-blocking.
    fn should_continue(&mut self) -> bool;

    /// Executes one unit of work.
    ///
    /// The sleep phase is additive, not duty-cycle-relative, so the duration
    /// of the work directly affects the achieved duty cycle.
    fn do_work(&mut self) -> Result<(), Self::Error>;

    /// Observability hook invoked when the built-in throttle adjusts the
    /// pause ("throttling down" / "throttling up"). Defaults to a no-op.
    fn notify(&mut self, _message: &str) {}

    /// Declares which throttle drives the pause between iterations.
    fn throttle_source(&self) -> ThrottleSource {
        ThrottleSource::Adaptive
    }

    /// Custom pause computation, consulted once per iteration when
    /// [`Controller::throttle_source`] declared [`ThrottleSource::Controller`].
    ///
    /// The default is the shortest representable pause, for controllers that
    /// declare the capability but want an effectively unthrottled loop.
    fn throttle(&mut self) -> Duration {
        Duration::from_micros(1)
    }
}
