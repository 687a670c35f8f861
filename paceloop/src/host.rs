//! Host CPU metrics probing.
//!
//! The throttle consumes two environment signals: the 1-minute load average
//! and the logical CPU core count. [`HostMetrics`] abstracts both behind a
//! trait so the control loop can be driven by fixed values in tests instead
//! of real host state; [`SystemMetrics`] is the production implementation.
//!
//! Detection is best-effort with silent fallbacks: each signal is read
//! through a short ordered list of platform strategies, and the first one
//! that produces a value wins.

use std::process::Command;

/// Read-only host signals consumed by the adaptive throttle.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the production source is stateless
/// and test fixtures are shared behind `Arc`.
pub trait HostMetrics: Send + Sync {
    /// The 1-minute load average, if the platform exposes one.
    fn load_average(&self) -> Option<f64>;

    /// The logical CPU core count, if discoverable.
    fn cpu_cores(&self) -> Option<usize>;
}

/// Metrics source backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMetrics;

impl SystemMetrics {
    /// Create a new system metrics source.
    pub fn new() -> Self {
        Self
    }
}

impl HostMetrics for SystemMetrics {
    fn load_average(&self) -> Option<f64> {
        load_average_native().or_else(load_average_proc)
    }

    fn cpu_cores(&self) -> Option<usize> {
        cores_from_runtime()
            .or_else(cores_from_proc)
            .or_else(cores_from_command)
    }
}

/// One-shot core-count discovery.
///
/// Filters out non-positive readings and falls back to 1 when the host
/// exposes no usable signal. Never fails; always returns a positive count.
pub fn discover_cpu_cores(metrics: &dyn HostMetrics) -> usize {
    metrics.cpu_cores().filter(|&n| n > 0).unwrap_or(1)
}

#[cfg(unix)]
fn load_average_native() -> Option<f64> {
    let mut loads = [0f64; 3];
    // getloadavg returns the number of samples written, -1 on failure.
    let written = unsafe { libc::getloadavg(loads.as_mut_ptr(), 3) };
    if written >= 1 {
        Some(loads[0])
    } else {
        None
    }
}

#[cfg(not(unix))]
fn load_average_native() -> Option<f64> {
    None
}

#[cfg(target_os = "linux")]
fn load_average_proc() -> Option<f64> {
    std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|contents| parse_loadavg(&contents))
}

#[cfg(not(target_os = "linux"))]
fn load_average_proc() -> Option<f64> {
    None
}

/// Parse the first field of a `/proc/loadavg` line.
///
/// Format: `0.52 0.58 0.59 1/389 12345` - the leading value is the
/// 1-minute figure.
fn parse_loadavg(contents: &str) -> Option<f64> {
    contents.split_whitespace().next()?.parse().ok()
}

fn cores_from_runtime() -> Option<usize> {
    std::thread::available_parallelism().ok().map(|p| p.get())
}

#[cfg(target_os = "linux")]
fn cores_from_proc() -> Option<usize> {
    std::fs::read_to_string("/proc/cpuinfo")
        .ok()
        .and_then(|contents| parse_cpuinfo(&contents))
}

#[cfg(not(target_os = "linux"))]
fn cores_from_proc() -> Option<usize> {
    None
}

/// Count `processor` entries in `/proc/cpuinfo` contents.
fn parse_cpuinfo(contents: &str) -> Option<usize> {
    let count = contents
        .lines()
        .filter(|line| line.starts_with("processor"))
        .count();
    (count > 0).then_some(count)
}

/// Last-resort probe: ask an external tool for the core count.
fn cores_from_command() -> Option<usize> {
    let (program, args): (&str, &[&str]) = if cfg!(target_os = "macos") {
        ("sysctl", &["-n", "hw.ncpu"])
    } else {
        ("nproc", &[])
    };

    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok()?.trim().parse().ok()
}
