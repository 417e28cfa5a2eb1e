//! Monitor and adaptive resize loops
//!
//! Every `adapt_freq_secs` the resizer reads the memory the system reports
//! available, keeps a safety margin out of it and sizes the non-busy part of
//! the buffer to the rest. Growth happens ahead of demand: the buffer only
//! grows when the average fill rate of the last epoch, projected a few epochs
//! ahead, still fits. It shrinks only when the target no longer covers that
//! projection and the free list holds more than the target plus slack.

use super::{Buffer, BufferError};
use crate::types::{RESIZE_LOOKAHEAD_EPOCHS, fatal};
use parking_lot::{Condvar, Mutex};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

/// Source of the system's available memory
pub trait MemoryProbe: Send + Sync {
    /// Available memory in KB
    fn mem_available_kb(&self) -> Result<u64, BufferError>;
}

/// Reads `MemAvailable` from a meminfo file
pub struct ProcMeminfo {
    path: PathBuf,
}

impl ProcMeminfo {
    pub fn new() -> Self {
        Self::with_path("/proc/meminfo")
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        ProcMeminfo { path: path.into() }
    }
}

impl Default for ProcMeminfo {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcMeminfo {
    fn mem_available_kb(&self) -> Result<u64, BufferError> {
        let text = fs::read_to_string(&self.path)?;
        parse_meminfo(&text).ok_or_else(|| {
            BufferError::MeminfoUnavailable(format!("no MemAvailable in {}", self.path.display()))
        })
    }
}

/// Extracts the `MemAvailable:` value (KB) from meminfo text
pub fn parse_meminfo(text: &str) -> Option<u64> {
    text.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("MemAvailable:") => fields.next()?.parse().ok(),
            _ => None,
        }
    })
}

/// State carried from one resize epoch to the next
#[derive(Debug, Default, Clone, Copy)]
pub struct AdaptState {
    busy_old: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeAction {
    Unchanged,
    Grew(usize),
    Shrank(usize),
}

/// Buffer figures one resize decision is made from, all in pages
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResizeInputs {
    pub capacity: usize,
    pub busy: usize,
    pub free: usize,
    pub target: usize,
    pub avg_filled: usize,
    pub slack: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResizePlan {
    Keep,
    Grow(usize),
    Shrink,
}

pub(crate) fn plan_resize(inputs: &ResizeInputs) -> ResizePlan {
    // Filling and free descriptors
    let pending = inputs.capacity - inputs.busy;
    let lookahead = inputs.avg_filled.saturating_mul(RESIZE_LOOKAHEAD_EPOCHS);

    if pending < inputs.target {
        if pending.saturating_add(lookahead).saturating_add(inputs.slack) <= inputs.target {
            return ResizePlan::Grow(inputs.target - pending);
        }
    } else if inputs.target < lookahead
        && inputs.free > inputs.target.saturating_add(inputs.slack)
    {
        return ResizePlan::Shrink;
    }
    ResizePlan::Keep
}

impl Buffer {
    /// Runs one resize epoch against `avail_kb` of available memory
    ///
    /// # Returns
    /// * `Ok(ResizeAction)` - what the epoch did; a failed allocation while
    ///   growing is logged and reported as `Unchanged`
    /// * `Err(BufferError::NoMemoryForCaching)` - shrinking found nothing busy
    pub fn adapt_epoch(
        &self,
        state: &mut AdaptState,
        avail_kb: u64,
    ) -> Result<ResizeAction, BufferError> {
        let config = self.ctx.config();
        let page_size = config.page_size as u64;
        let usable_kb = avail_kb.saturating_sub(config.mem_margin_kb);
        let target =
            usize::try_from(usable_kb.saturating_mul(1024) / page_size).unwrap_or(usize::MAX);
        let slack = usize::try_from(config.resize_slack_bytes / page_size).unwrap_or(usize::MAX);

        let (capacity, busy, free, events) = {
            let inner = self.lock();
            (
                inner.capacity,
                inner.busy.len(),
                inner.free.len(),
                inner.stats.events_processed,
            )
        };
        let avg_filled = busy.saturating_sub(state.busy_old);
        state.busy_old = busy;

        info!(
            capacity,
            busy,
            free,
            pending = capacity - busy,
            target,
            avg_filled,
            events_processed = events,
            "adapt epoch"
        );

        let inputs = ResizeInputs {
            capacity,
            busy,
            free,
            target,
            avg_filled,
            slack,
        };
        match plan_resize(&inputs) {
            ResizePlan::Keep => Ok(ResizeAction::Unchanged),
            ResizePlan::Grow(count) => match self.grow(count) {
                Ok(count) => {
                    info!(count, "Increased page buffer");
                    Ok(ResizeAction::Grew(count))
                }
                Err(err) => {
                    warn!("Failed to allocate additional {} page descriptors: {}", count, err);
                    Ok(ResizeAction::Unchanged)
                }
            },
            ResizePlan::Shrink => {
                let count = self.shrink_to_target(target)?;
                info!(count, "Reduced page buffer");
                Ok(ResizeAction::Shrank(count))
            }
        }
    }
}

/// Shutdown signal and join handles of the background loops
pub(crate) struct Background {
    stopped: Mutex<bool>,
    cond: Condvar,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Background {
    pub fn new() -> Self {
        Background {
            stopped: Mutex::new(false),
            cond: Condvar::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Sleeps for `period`; returns false once stop was requested
    fn sleep(&self, period: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            // Spurious wakeups only shorten an epoch
            self.cond.wait_for(&mut stopped, period);
        }
        !*stopped
    }

    fn spawn<F>(&self, name: &str, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match thread::Builder::new().name(name.to_string()).spawn(f) {
            Ok(handle) => self.handles.lock().push(handle),
            Err(err) => fatal("failed to launch background thread", &err),
        }
    }

    /// Signals the loops and joins them
    pub fn stop(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();

        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        let current = thread::current().id();
        for handle in handles {
            // The last buffer reference can be dropped by one of the loops
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

pub(super) fn start_loops(buffer: &Arc<Buffer>, probe: Arc<dyn MemoryProbe>) {
    let config = buffer.ctx.config();
    let background = buffer.background.clone();

    if config.monitor_freq_secs > 0 {
        let period = Duration::from_secs(config.monitor_freq_secs);
        let weak = Arc::downgrade(buffer);
        let signal = background.clone();
        background.spawn("pagebuf monitor", move || monitor_loop(weak, &signal, period));
    }

    if config.adapt_freq_secs > 0 {
        let period = Duration::from_secs(config.adapt_freq_secs);
        let weak = Arc::downgrade(buffer);
        let signal = background.clone();
        background.spawn("pagebuf adapt", move || adapt_loop(weak, &signal, probe, period));
    }
}

fn monitor_loop(buffer: Weak<Buffer>, background: &Background, period: Duration) {
    info!("monitoring every {:?}", period);
    loop {
        {
            let Some(buffer) = buffer.upgrade() else { break };
            let snapshot = buffer.snapshot();
            info!(
                capacity = snapshot.capacity,
                busy = snapshot.busy,
                free = snapshot.free,
                events_processed = buffer.stats().events_processed,
                "monitor"
            );
        }
        if !background.sleep(period) {
            break;
        }
    }
}

fn adapt_loop(
    buffer: Weak<Buffer>,
    background: &Background,
    probe: Arc<dyn MemoryProbe>,
    period: Duration,
) {
    info!("adapting every {:?}", period);
    let mut state = AdaptState::default();
    loop {
        {
            let Some(buffer) = buffer.upgrade() else { break };
            match probe.mem_available_kb() {
                Ok(avail_kb) => {
                    if let Err(err) = buffer.adapt_epoch(&mut state, avail_kb) {
                        fatal("adaptive resize failed", &err);
                    }
                }
                Err(err) => warn!("skipping resize epoch: {}", err),
            }
        }
        if !background.sleep(period) {
            break;
        }
    }
    info!("adapt loop ends");
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       32594416 kB\n\
                           MemFree:         1123456 kB\n\
                           MemAvailable:   20480000 kB\n\
                           Buffers:          123456 kB\n";

    fn inputs(
        capacity: usize,
        busy: usize,
        free: usize,
        target: usize,
        avg: usize,
    ) -> ResizeInputs {
        ResizeInputs {
            capacity,
            busy,
            free,
            target,
            avg_filled: avg,
            slack: 16,
        }
    }

    #[test]
    fn test_parse_meminfo() {
        assert_eq!(parse_meminfo(MEMINFO), Some(20480000));
        assert_eq!(parse_meminfo("MemTotal: 1 kB\n"), None);
        assert_eq!(parse_meminfo("MemAvailable: lots\n"), None);
    }

    #[test]
    fn test_proc_meminfo_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meminfo");
        std::fs::write(&path, MEMINFO).unwrap();
        assert_eq!(ProcMeminfo::with_path(&path).mem_available_kb().unwrap(), 20480000);

        std::fs::write(&path, "MemTotal: 1 kB\n").unwrap();
        assert!(matches!(
            ProcMeminfo::with_path(&path).mem_available_kb(),
            Err(BufferError::MeminfoUnavailable(_))
        ));
        assert!(matches!(
            ProcMeminfo::with_path(dir.path().join("missing")).mem_available_kb(),
            Err(BufferError::IoError(_))
        ));
    }

    #[test]
    fn test_grow_when_lookahead_fits() {
        // pending 50, lookahead 30, slack 16 -> 96 <= 200
        assert_eq!(plan_resize(&inputs(100, 50, 40, 200, 10)), ResizePlan::Grow(150));
    }

    #[test]
    fn test_no_grow_when_lookahead_does_not_fit() {
        // pending 50, lookahead 300
        assert_eq!(plan_resize(&inputs(100, 50, 40, 200, 100)), ResizePlan::Keep);
    }

    #[test]
    fn test_shrink_when_target_below_lookahead() {
        // pending 90 >= target 10, lookahead 30 > 10, free 80 > 26
        assert_eq!(plan_resize(&inputs(100, 10, 80, 10, 10)), ResizePlan::Shrink);
    }

    #[test]
    fn test_no_shrink_without_spare_free_pages() {
        assert_eq!(plan_resize(&inputs(100, 10, 20, 10, 10)), ResizePlan::Keep);
        // Target still covers the projection
        assert_eq!(plan_resize(&inputs(100, 10, 80, 40, 10)), ResizePlan::Keep);
    }

    #[test]
    fn test_background_stop_interrupts_sleep() {
        let background = Arc::new(Background::new());
        let signal = background.clone();
        background.spawn("sleeper", move || {
            while signal.sleep(Duration::from_secs(3600)) {}
        });
        let start = std::time::Instant::now();
        background.stop();
        assert!(start.elapsed() < Duration::from_secs(60));
        assert!(!background.sleep(Duration::from_secs(3600)));
    }
}
