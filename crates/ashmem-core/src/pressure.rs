//! Memory pressure detection.
//!
//! A [`PressureMonitor`] polls a [`PressureSignal`] on a background thread and
//! purges every segment of a [`Reclaimer`] whenever the signal reports
//! pressure. Two signals are provided: [`PsiPressure`] reads Linux pressure
//! stall information, [`ManualPressure`] lets the host raise pressure itself.

use crate::backing::BackingStore;
use crate::config::AshmemConfig;
use crate::reclaimer::Reclaimer;
use crate::util::{CancelableJoinHandle, sleep_while_running, spawn_cancelable};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Source of memory pressure events.
pub trait PressureSignal: Send {
    /// Returns true if memory is currently under pressure.
    fn under_pressure(&mut self) -> bool;
}

impl<F: FnMut() -> bool + Send> PressureSignal for F {
    fn under_pressure(&mut self) -> bool {
        self()
    }
}

/// A pressure flag raised explicitly by the host.
///
/// Clones share the flag. Each [`trigger()`](ManualPressure::trigger) is
/// reported once.
#[derive(Clone, Debug, Default)]
pub struct ManualPressure {
    raised: Arc<AtomicBool>,
}

impl ManualPressure {
    /// Creates a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn trigger(&self) {
        self.raised.store(true, Ordering::Release);
    }
}

impl PressureSignal for ManualPressure {
    fn under_pressure(&mut self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }
}

/// Pressure derived from Linux PSI (`/proc/pressure/memory`).
///
/// Memory counts as under pressure while the `some avg10` value is at or
/// above the threshold.
#[derive(Debug, Clone)]
pub struct PsiPressure {
    path: PathBuf,
    threshold: f64,
    warned: bool,
}

impl PsiPressure {
    /// Creates a signal reading `path` with the given `avg10` threshold.
    pub fn new(path: impl Into<PathBuf>, threshold: f64) -> Self {
        PsiPressure {
            path: path.into(),
            threshold,
            warned: false,
        }
    }

    /// Creates a signal from the PSI settings of `config`.
    pub fn from_config(config: &AshmemConfig) -> Self {
        Self::new(&config.psi_path, config.psi_threshold)
    }
}

/// Extracts `avg10` of the `some` line from PSI file contents.
pub fn parse_psi_some_avg10(s: &str) -> Option<f64> {
    let line = s.lines().find(|line| line.starts_with("some "))?;
    line.split_whitespace()
        .find_map(|field| field.strip_prefix("avg10="))
        .and_then(|v| v.parse().ok())
}

impl PressureSignal for PsiPressure {
    fn under_pressure(&mut self) -> bool {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                if !self.warned {
                    warn!("Failed to read {}: {}", self.path.display(), e);
                    self.warned = true;
                }
                return false;
            }
        };
        match parse_psi_some_avg10(&contents) {
            Some(avg10) => avg10 >= self.threshold,
            None => {
                if !self.warned {
                    warn!("Unrecognized PSI format in {}", self.path.display());
                    self.warned = true;
                }
                false
            }
        }
    }
}

/// Background thread purging a reclaimer under memory pressure.
pub struct PressureMonitor {
    handle: CancelableJoinHandle<usize>,
}

impl PressureMonitor {
    /// Spawns a monitor polling `signal` every `interval`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn spawn<S, P>(
        reclaimer: Arc<Reclaimer<S>>,
        mut signal: P,
        interval: Duration,
    ) -> std::io::Result<Self>
    where
        S: BackingStore + 'static,
        P: PressureSignal + 'static,
    {
        let handle = spawn_cancelable("ashmem-pressure", move |running| {
            info!(target: "pressure", "Pressure monitor started");
            let mut purges = 0;
            loop {
                if signal.under_pressure() {
                    let report = reclaimer.on_memory_pressure();
                    debug!(target: "pressure", "purged {} pages", report.pages_purged);
                    purges += 1;
                }
                if !sleep_while_running(&running, interval) {
                    break;
                }
            }
            info!(target: "pressure", "Stopping pressure monitor after {} purges", purges);
            purges
        })?;
        Ok(PressureMonitor { handle })
    }

    /// Spawns a PSI-driven monitor configured by `config`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn from_config<S: BackingStore + 'static>(
        reclaimer: Arc<Reclaimer<S>>,
        config: &AshmemConfig,
    ) -> std::io::Result<Self> {
        Self::spawn(
            reclaimer,
            PsiPressure::from_config(config),
            config.poll_interval(),
        )
    }

    /// True until the monitor thread exits. Before [`stop`](Self::stop) it
    /// only exits by panicking.
    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stops the monitor and returns how many purges it ran.
    ///
    /// # Errors
    ///
    /// Returns the panic payload if the monitor thread panicked.
    pub fn stop(self) -> std::thread::Result<usize> {
        self.handle.join()
    }
}
