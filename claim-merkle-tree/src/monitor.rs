//! Build progress and resource monitoring.
//!
//! The builder calls [`BuildMonitor::checkpoint`] at fixed points in its
//! loops. The monitor samples memory through an injected
//! [`ResourceObserver`], logs warnings once per threshold, and asks the
//! observer to reclaim memory above the reclaim threshold. Nothing here
//! influences the tree that gets built.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::BuildConfig;

/// Phase of a tree build reported at each checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// Normalizing, encoding and hashing records.
    HashLeaves,
    /// Writing sorted leaves into the node array.
    PlaceLeaves,
    /// Folding internal nodes up to the root.
    BuildNodes,
}

impl BuildStage {
    fn as_str(&self) -> &'static str {
        match self {
            BuildStage::HashLeaves => "hash_leaves",
            BuildStage::PlaceLeaves => "place_leaves",
            BuildStage::BuildNodes => "build_nodes",
        }
    }
}

/// Source of memory statistics, called by the builder at checkpoints.
///
/// All methods have no-op defaults, so an observer only overrides what its
/// host can actually provide.
pub trait ResourceObserver: Send + Sync {
    /// Current resident memory of the process in bytes, if known.
    fn memory_usage(&self) -> Option<u64> {
        None
    }

    /// Advisory request to release memory. May do nothing.
    fn reclaim(&self) {}

    /// Called at every checkpoint with the items done so far in `stage`.
    fn on_checkpoint(&self, _stage: BuildStage, _done: usize, _total: usize) {}
}

/// Observer that reports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ResourceObserver for NoopObserver {}

/// Observer reading this process's resident memory through `sysinfo`.
#[cfg(feature = "process_monitor")]
pub struct ProcessObserver {
    system: std::sync::Mutex<sysinfo::System>,
    pid: Option<sysinfo::Pid>,
}

#[cfg(feature = "process_monitor")]
impl ProcessObserver {
    /// Create an observer for the current process.
    pub fn new() -> Self {
        Self {
            system: std::sync::Mutex::new(sysinfo::System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

#[cfg(feature = "process_monitor")]
impl Default for ProcessObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "process_monitor")]
impl ResourceObserver for ProcessObserver {
    fn memory_usage(&self) -> Option<u64> {
        use sysinfo::{ProcessRefreshKind, ProcessesToUpdate};

        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system.process(pid).map(|process| process.memory())
    }
}

/// Summary of a finished build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildReport {
    /// Wall time from monitor creation to `finish`.
    pub elapsed: Duration,
    /// Highest resident memory seen, if the observer reports memory.
    pub peak_memory: Option<u64>,
    /// How many times the observer was asked to reclaim memory.
    pub reclaim_requests: u32,
    /// Checkpoints passed.
    pub checkpoints: u32,
}

/// Per-build monitor state. One instance per build call.
pub struct BuildMonitor<'a> {
    observer: &'a dyn ResourceObserver,
    config: &'a BuildConfig,
    started: Instant,
    memory_warned: bool,
    slow_warned: bool,
    last_progress: Option<(BuildStage, usize)>,
    peak_memory: Option<u64>,
    reclaim_requests: u32,
    checkpoints: u32,
}

impl<'a> BuildMonitor<'a> {
    /// Start monitoring a build.
    pub fn new(observer: &'a dyn ResourceObserver, config: &'a BuildConfig) -> Self {
        Self {
            observer,
            config,
            started: Instant::now(),
            memory_warned: false,
            slow_warned: false,
            last_progress: None,
            peak_memory: None,
            reclaim_requests: 0,
            checkpoints: 0,
        }
    }

    /// Record a checkpoint: `done` of `total` items finished in `stage`.
    pub fn checkpoint(&mut self, stage: BuildStage, done: usize, total: usize) {
        self.checkpoints += 1;
        self.observer.on_checkpoint(stage, done, total);

        if let Some(bytes) = self.observer.memory_usage() {
            self.peak_memory = Some(self.peak_memory.map_or(bytes, |peak| peak.max(bytes)));
            let warn_at = self.config.memory_warn_bytes;
            if warn_at > 0 && bytes >= warn_at && !self.memory_warned {
                self.memory_warned = true;
                warn!(
                    stage = stage.as_str(),
                    memory_bytes = bytes,
                    threshold_bytes = warn_at,
                    "claim tree build memory above warning threshold"
                );
            }
            let reclaim_at = self.config.reclaim_threshold_bytes;
            if reclaim_at > 0 && bytes >= reclaim_at {
                self.reclaim_requests += 1;
                debug!(stage = stage.as_str(), memory_bytes = bytes, "requesting memory reclaim");
                self.observer.reclaim();
            }
        }

        let slow_after = self.config.slow_build_warn_secs;
        let elapsed = self.started.elapsed();
        if slow_after > 0 && elapsed >= Duration::from_secs(slow_after) && !self.slow_warned {
            self.slow_warned = true;
            warn!(
                stage = stage.as_str(),
                elapsed_ms = elapsed.as_millis() as u64,
                done,
                total,
                "claim tree build is slow"
            );
        }

        self.log_progress(stage, done, total);
    }

    fn log_progress(&mut self, stage: BuildStage, done: usize, total: usize) {
        let interval = self.config.progress_log_interval;
        if interval == 0 {
            return;
        }
        let last = match self.last_progress {
            Some((last_stage, last_done)) if last_stage == stage => last_done,
            _ => 0,
        };
        if done.saturating_sub(last) >= interval || (done == total && last != done) {
            self.last_progress = Some((stage, done));
            info!(stage = stage.as_str(), done, total, "claim tree build progress");
        }
    }

    /// Finish monitoring and log a summary.
    pub fn finish(self, leaves: usize) -> BuildReport {
        let report = BuildReport {
            elapsed: self.started.elapsed(),
            peak_memory: self.peak_memory,
            reclaim_requests: self.reclaim_requests,
            checkpoints: self.checkpoints,
        };
        info!(
            leaves,
            elapsed_ms = report.elapsed.as_millis() as u64,
            peak_memory_bytes = report.peak_memory,
            reclaim_requests = report.reclaim_requests,
            "claim tree built"
        );
        report
    }
}
