//! Shell-command controller.
//!
//! [`ShellController`] is the CLI's embedding of the daemon loop: each
//! iteration runs the operator's command through the platform shell, and
//! the loop stops on Ctrl-C (via a shared shutdown flag), when the
//! iteration budget is exhausted, or when the command fails.

use std::io;
use std::process::{Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use paceloop::controller::{Controller, ThrottleSource};
use paceloop::daemon::DaemonHandle;

use crate::error::CliError;

/// Controller that runs a shell command once per iteration.
pub struct ShellController {
    /// The command line handed to the shell.
    command: String,

    /// Iteration budget; zero means run until the shutdown flag is set.
    max_iterations: u64,

    /// Iterations completed so far.
    completed: u64,

    /// Shutdown flag, set from the Ctrl-C handler thread.
    shutdown: Arc<AtomicBool>,

    /// Fixed pause overriding the adaptive throttle, when requested.
    custom_pause: Option<Duration>,

    /// Daemon tuning handle, bound before the loop starts.
    #[allow(dead_code)] // Held for mid-run retuning.
    handle: Option<DaemonHandle>,
}

impl ShellController {
    /// Create a controller for the given command.
    ///
    /// # Arguments
    ///
    /// * `command` - Command line to run through the shell each iteration
    /// * `max_iterations` - Stop after this many iterations (0 = unbounded)
    /// * `shutdown` - Flag that ends the loop at the next iteration boundary
    pub fn new(command: String, max_iterations: u64, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            command,
            max_iterations,
            completed: 0,
            shutdown,
            custom_pause: None,
            handle: None,
        }
    }

    /// Use a fixed pause instead of the adaptive throttle.
    pub fn with_custom_pause(mut self, pause: Duration) -> Self {
        self.custom_pause = Some(pause);
        self
    }

    /// Iterations completed so far.
    pub fn completed(&self) -> u64 {
        self.completed
    }
}

impl Controller for ShellController {
    type Error = CliError;

    fn bind(&mut self, handle: DaemonHandle) {
        info!(
            cpu_target = handle.cpu_target(),
            step_micros = handle.step_micros(),
            check_interval_secs = handle.check_interval(),
            "Controller bound"
        );
        self.handle = Some(handle);
    }

    fn should_continue(&mut self) -> bool {
        if self.shutdown.load(Ordering::SeqCst) {
            info!(completed = self.completed, "Shutdown requested, stopping");
            return false;
        }
        self.max_iterations == 0 || self.completed < self.max_iterations
    }

    fn do_work(&mut self) -> Result<(), CliError> {
        debug!(
            command = %self.command,
            iteration = self.completed + 1,
            "Running command"
        );

        let status = shell_status(&self.command).map_err(|e| CliError::Spawn {
            command: self.command.clone(),
            source: e,
        })?;

        if !status.success() {
            return Err(CliError::CommandFailed {
                command: self.command.clone(),
                status,
            });
        }

        self.completed += 1;
        Ok(())
    }

    fn notify(&mut self, message: &str) {
        info!("Daemon {}", message);
    }

    fn throttle_source(&self) -> ThrottleSource {
        if self.custom_pause.is_some() {
            ThrottleSource::Controller
        } else {
            ThrottleSource::Adaptive
        }
    }

    fn throttle(&mut self) -> Duration {
        self.custom_pause.unwrap_or(Duration::from_micros(1))
    }
}

#[cfg(not(windows))]
fn shell_status(command: &str) -> io::Result<ExitStatus> {
    Command::new("sh").arg("-c").arg(command).status()
}

#[cfg(windows)]
fn shell_status(command: &str) -> io::Result<ExitStatus> {
    Command::new("cmd").args(["/C", command]).status()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[cfg(unix)]
    #[test]
    fn iteration_budget_is_honored() {
        let mut controller = ShellController::new("true".to_string(), 2, flag());

        assert!(controller.should_continue());
        controller.do_work().unwrap();
        assert!(controller.should_continue());
        controller.do_work().unwrap();

        assert!(!controller.should_continue());
        assert_eq!(controller.completed(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn zero_budget_means_unbounded() {
        let mut controller = ShellController::new("true".to_string(), 0, flag());

        controller.do_work().unwrap();
        assert!(controller.should_continue());
    }

    #[test]
    fn shutdown_flag_stops_the_loop() {
        let shutdown = flag();
        let mut controller = ShellController::new("true".to_string(), 0, Arc::clone(&shutdown));

        assert!(controller.should_continue());
        shutdown.store(true, Ordering::SeqCst);
        assert!(!controller.should_continue());
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_surfaces_exit_status() {
        let mut controller = ShellController::new("exit 3".to_string(), 1, flag());

        let err = controller.do_work().unwrap_err();
        match err {
            CliError::CommandFailed { command, status } => {
                assert_eq!(command, "exit 3");
                assert_eq!(status.code(), Some(3));
            }
            other => panic!("Expected CommandFailed, got {other:?}"),
        }
        assert_eq!(controller.completed(), 0);
    }

    #[test]
    fn custom_pause_switches_throttle_source() {
        let adaptive = ShellController::new("true".to_string(), 1, flag());
        assert_eq!(adaptive.throttle_source(), ThrottleSource::Adaptive);

        let mut fixed = ShellController::new("true".to_string(), 1, flag())
            .with_custom_pause(Duration::from_micros(500));
        assert_eq!(fixed.throttle_source(), ThrottleSource::Controller);
        assert_eq!(fixed.throttle(), Duration::from_micros(500));
    }
}
