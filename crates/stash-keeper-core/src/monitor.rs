use crate::config::Settings;
use crate::engine::{ScanCycle, ScanResult};
use crate::error::{Error, Result};
use crate::events::EventReporter;
use crate::storage::HashIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SLEEP_SLICE: Duration = Duration::from_millis(250);
pub const HEARTBEAT_FILE_NAME: &str = "stash-keeper.heartbeat";
/// Slack on top of two check intervals before a heartbeat counts as stale.
const LIVENESS_GRACE: Duration = Duration::from_secs(60);

/// Cloneable stop flag shared with signal handlers.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Liveness marker rewritten by [`Monitor::run`] after every cycle and
/// removed when the loop exits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub pid: u32,
    pub last_scan: DateTime<Utc>,
}

/// `dest_base_dir/stash-keeper.heartbeat`, beside the backup store.
pub fn heartbeat_path(dest_base_dir: &Path) -> PathBuf {
    dest_base_dir.join(HEARTBEAT_FILE_NAME)
}

impl Heartbeat {
    pub fn now() -> Self {
        Self {
            pid: std::process::id(),
            last_scan: Utc::now(),
        }
    }

    /// Write via a temporary sibling so readers never see half a file.
    pub fn write(&self, path: &Path) -> io::Result<()> {
        let text = toml::to_string(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut partial = path.as_os_str().to_owned();
        partial.push(".tmp");
        let partial = PathBuf::from(partial);
        fs::write(&partial, text)?;
        fs::rename(&partial, path)
    }

    /// `Ok(None)` when no monitor has left a heartbeat, or it is unreadable.
    pub fn read(path: &Path) -> io::Result<Option<Self>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        match toml::from_str(&text) {
            Ok(heartbeat) => Ok(Some(heartbeat)),
            Err(e) => {
                warn!("Ignoring malformed heartbeat {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// Whether a loop scanning every `interval` would have refreshed this
    /// heartbeat by `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        let allowed = interval.saturating_mul(2).saturating_add(LIVENESS_GRACE);
        match (now - self.last_scan).to_std() {
            Ok(age) => age <= allowed,
            // Timestamp in the future: clock moved back, still alive
            Err(_) => true,
        }
    }
}

/// Totals over the lifetime of one monitor run.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub cycles: u64,
    pub archived: u64,
    pub skipped_duplicate: u64,
    pub errors: u64,
}

impl RunSummary {
    fn absorb(&mut self, result: &ScanResult) {
        self.cycles += 1;
        self.archived += result.archived.len() as u64;
        self.skipped_duplicate += result.skipped_duplicate.len() as u64;
        self.errors += result.errors.len() as u64;
    }
}

/// Fixed-interval scheduler around a single [`ScanCycle`].
pub struct Monitor<'r> {
    settings: Settings,
    cycle: ScanCycle,
    reporter: &'r dyn EventReporter,
}

impl<'r> Monitor<'r> {
    /// Open the durable index and prepare the scan cycle.
    pub fn new(settings: Settings, reporter: &'r dyn EventReporter) -> Result<Self> {
        let index =
            HashIndex::open_or_rebuild(&settings.store_path, settings.rebuild_corrupt_store)?;
        let cycle = ScanCycle::new(&settings, index);
        Ok(Self {
            settings,
            cycle,
            reporter,
        })
    }

    pub fn with_index(
        settings: Settings,
        index: HashIndex,
        reporter: &'r dyn EventReporter,
    ) -> Self {
        let cycle = ScanCycle::new(&settings, index);
        Self {
            settings,
            cycle,
            reporter,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn run_once(&mut self, now: Instant) -> ScanResult {
        self.cycle.run_once(now, self.reporter)
    }

    /// Scan every check interval until `shutdown` is requested. A cycle in
    /// progress always completes; an overrunning cycle is followed at once by
    /// the next one, then slots realign to the interval.
    pub fn run(&mut self, shutdown: &ShutdownSignal) -> Result<RunSummary> {
        info!(
            "Monitoring directory: {} for {} files",
            self.settings.monitor_dir.display(),
            self.settings.extensions.join(", ")
        );
        let interval = self.settings.check_interval;
        let heartbeat = heartbeat_path(&self.settings.dest_base_dir);
        let mut summary = RunSummary::default();
        let mut next_slot = Instant::now();

        let outcome = loop {
            if shutdown.is_requested() {
                break Ok(());
            }
            let now = Instant::now();
            debug!("Scanning directory...");
            let result = self.run_once(now);
            summary.absorb(&result);
            if result.has_store_corruption() {
                break Err(store_failure(&self.settings.store_path, &result));
            }
            if let Err(e) = Heartbeat::now().write(&heartbeat) {
                warn!("Could not write heartbeat {}: {}", heartbeat.display(), e);
            }

            next_slot = match later(next_slot, interval) {
                Ok(slot) => slot,
                Err(e) => break Err(e),
            };
            let finished = Instant::now();
            if finished > next_slot {
                warn!(
                    "Scan took {:.1}s, longer than the {}s interval; next scan starts now",
                    result.duration.as_secs_f64(),
                    interval.as_secs()
                );
                next_slot = finished;
            }
            sleep_until(next_slot, shutdown);
        };

        if let Err(e) = fs::remove_file(&heartbeat) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Could not remove heartbeat {}: {}", heartbeat.display(), e);
            }
        }
        outcome?;
        info!("Shutdown requested, monitor loop stopped");
        Ok(summary)
    }

    /// Single pass for scheduled (cron) use: sample, wait out the threshold,
    /// sample again and archive whatever held still.
    pub fn settle_once(&mut self, shutdown: &ShutdownSignal) -> Result<ScanResult> {
        let first = Instant::now();
        let result = self.run_once(first);
        if result.has_store_corruption() {
            return Err(store_failure(&self.settings.store_path, &result));
        }
        if self.cycle.tracker().is_empty() {
            return Ok(result);
        }

        let threshold = self.settings.stable_threshold;
        info!(
            "Waiting {}s for {} file(s) to settle",
            threshold.as_secs(),
            self.cycle.tracker().len()
        );
        let settled = later(first, threshold)?;
        sleep_until(settled, shutdown);
        if shutdown.is_requested() {
            return Ok(result);
        }

        let result = self.run_once(settled);
        if result.has_store_corruption() {
            return Err(store_failure(&self.settings.store_path, &result));
        }
        Ok(result)
    }

    /// Flush the durable index and close it.
    pub fn shutdown(self) -> Result<u64> {
        let index = self.cycle.into_index()?;
        let count = index.record_count()?;
        info!("Monitor shutting down, {} records in backup store", count);
        Ok(count)
    }
}

fn store_failure(store_path: &Path, result: &ScanResult) -> Error {
    let message = result
        .errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    Error::StoreCorrupt {
        path: store_path.to_path_buf(),
        reason: message,
    }
}

fn later(instant: Instant, by: Duration) -> Result<Instant> {
    instant.checked_add(by).ok_or_else(|| {
        Error::InvalidConfig(format!("duration of {}s is out of range", by.as_secs()))
    })
}

/// Sleep in short slices so a shutdown request is noticed promptly.
fn sleep_until(deadline: Instant, shutdown: &ShutdownSignal) {
    loop {
        if shutdown.is_requested() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}
