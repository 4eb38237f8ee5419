//! Daily quota for live-fetch calls.
//!
//! The counter lives behind one mutex so that checking the limit and
//! incrementing it is a single step: two callers racing for the last unit can
//! never both succeed. The day window resets lazily on the first access after
//! the local calendar date changes.
//!
//! When a usage file is configured the state is written after every
//! successful `consume`, so the count survives restarts within the same day.
//! The write happens after the counter lock is released; inside a tokio
//! runtime it runs on the blocking pool. Writes are ordered by
//! `(date, count)` and a snapshot older than the last one written is
//! dropped. File format:
//!
//! ```json
//! {"date": "2025-03-01", "count": 12, "window_start": "2025-03-01T00:00:00+01:00"}
//! ```

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default daily allowance for the live fetch API
pub const DEFAULT_DAILY_LIMIT: u32 = 600;

/// The day's allowance is used up. Not a failure: the step is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Daily live-fetch quota of {limit} calls is exhausted")]
pub struct QuotaExhausted {
    pub limit: u32,
}

/// Source of the current local time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Counter for one calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub date: NaiveDate,
    pub count: u32,
    #[serde(default)]
    pub window_start: Option<DateTime<Local>>,
}

impl QuotaState {
    fn fresh(now: DateTime<Local>) -> Self {
        let date = now.date_naive();
        let window_start = date
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| Local.from_local_datetime(&midnight).earliest());
        Self {
            date,
            count: 0,
            window_start,
        }
    }
}

/// Usage file plus the newest snapshot already written to it
struct UsageFile {
    path: PathBuf,
    last_written: Mutex<Option<(NaiveDate, u32)>>,
}

impl UsageFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            last_written: Mutex::new(None),
        }
    }

    fn write(&self, state: &QuotaState) {
        let mut last = self.last_written.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let stamp = (state.date, state.count);
        if last.is_some_and(|written| written >= stamp) {
            debug!("Skipping stale quota snapshot {:?}", stamp);
            return;
        }
        save_state(&self.path, state);
        *last = Some(stamp);
    }
}

/// Write `state` off the async worker threads when a runtime is available
fn persist(file: &Arc<UsageFile>, state: QuotaState) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let file = file.clone();
            handle.spawn_blocking(move || file.write(&state));
        }
        Err(_) => file.write(&state),
    }
}

pub struct QuotaTracker {
    daily_limit: u32,
    usage_file: Option<Arc<UsageFile>>,
    clock: Arc<dyn Clock>,
    state: Mutex<QuotaState>,
}

impl QuotaTracker {
    /// Tracker whose state lives only as long as the process
    pub fn in_memory(daily_limit: u32) -> Self {
        Self::with_clock(daily_limit, None, Arc::new(SystemClock))
    }

    /// Tracker persisted to `path`. A missing or unreadable file starts a fresh day.
    pub fn with_usage_file(daily_limit: u32, path: impl Into<PathBuf>) -> Self {
        Self::with_clock(daily_limit, Some(path.into()), Arc::new(SystemClock))
    }

    pub fn with_clock(daily_limit: u32, usage_file: Option<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        let state = usage_file
            .as_deref()
            .and_then(load_state)
            .unwrap_or_else(|| QuotaState::fresh(clock.now()));

        Self {
            daily_limit,
            usage_file: usage_file.map(|path| Arc::new(UsageFile::new(path))),
            clock,
            state: Mutex::new(state),
        }
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// Lock the state, rolling it over first if the day has changed
    fn current(&self) -> MutexGuard<'_, QuotaState> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = self.clock.now();
        if state.date != now.date_naive() {
            info!(
                "Quota window rolled over ({} -> {}), {} calls used previously",
                state.date,
                now.date_naive(),
                state.count
            );
            *state = QuotaState::fresh(now);
        }
        state
    }

    pub fn remaining(&self) -> u32 {
        self.daily_limit.saturating_sub(self.current().count)
    }

    pub fn used_today(&self) -> u32 {
        self.current().count
    }

    pub fn snapshot(&self) -> QuotaState {
        self.current().clone()
    }

    /// Take one unit of quota, returning how many remain afterwards.
    ///
    /// Leaves the state untouched when the limit is already reached.
    pub fn consume(&self) -> Result<u32, QuotaExhausted> {
        let snapshot = {
            let mut state = self.current();
            if state.count >= self.daily_limit {
                debug!("Quota exhausted at {}/{}", state.count, self.daily_limit);
                return Err(QuotaExhausted {
                    limit: self.daily_limit,
                });
            }
            state.count += 1;
            state.clone()
        };

        let remaining = self.daily_limit - snapshot.count;
        if let Some(file) = &self.usage_file {
            persist(file, snapshot);
        }
        Ok(remaining)
    }
}

fn load_state(path: &Path) -> Option<QuotaState> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!("Ignoring unreadable quota file {}: {}", path.display(), e);
            None
        }
    }
}

/// Persistence is best-effort; the in-memory count stays authoritative.
fn save_state(path: &Path, state: &QuotaState) {
    let result = serde_json::to_string(state)
        .map_err(std::io::Error::other)
        .and_then(|json| {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, json)
        });

    if let Err(e) = result {
        warn!("Failed to persist quota to {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    /// Clock that only moves when told to
    struct FixedClock(Mutex<DateTime<Local>>);

    impl FixedClock {
        fn at(y: i32, m: u32, d: u32, h: u32) -> Arc<Self> {
            Arc::new(Self(Mutex::new(Local.with_ymd_and_hms(y, m, d, h, 0, 0).single().unwrap())))
        }

        fn set(&self, y: i32, m: u32, d: u32, h: u32) {
            *self.0.lock().unwrap() = Local.with_ymd_and_hms(y, m, d, h, 0, 0).single().unwrap();
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Local> {
            *self.0.lock().unwrap()
        }
    }

    #[test]
    fn test_consume_until_exhausted() {
        let quota = QuotaTracker::in_memory(2);
        assert_eq!(quota.remaining(), 2);
        assert_eq!(quota.consume(), Ok(1));
        assert_eq!(quota.consume(), Ok(0));
        assert_eq!(quota.consume(), Err(QuotaExhausted { limit: 2 }));
        assert_eq!(quota.used_today(), 2, "failed consume does not mutate");
    }

    #[test]
    fn test_zero_limit_is_always_exhausted() {
        let quota = QuotaTracker::in_memory(0);
        assert_eq!(quota.remaining(), 0);
        assert!(quota.consume().is_err());
    }

    #[test]
    fn test_lazy_reset_on_new_day() {
        let clock = FixedClock::at(2025, 3, 1, 23);
        let quota = QuotaTracker::with_clock(1, None, clock.clone());
        quota.consume().unwrap();
        assert_eq!(quota.remaining(), 0);

        clock.set(2025, 3, 2, 8);
        assert_eq!(quota.remaining(), 1);
        let state = quota.snapshot();
        assert_eq!(state.date, NaiveDate::from_ymd_opt(2025, 3, 2).unwrap());
        assert_eq!(state.count, 0);
    }

    #[test]
    fn test_persists_within_the_same_day() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage").join("api_usage.json");
        let clock = FixedClock::at(2025, 3, 1, 9);

        let quota = QuotaTracker::with_clock(5, Some(path.clone()), clock.clone());
        quota.consume().unwrap();
        quota.consume().unwrap();
        assert!(path.exists(), "parent directory is created");

        let reloaded = QuotaTracker::with_clock(5, Some(path.clone()), clock.clone());
        assert_eq!(reloaded.used_today(), 2);

        clock.set(2025, 3, 2, 9);
        let next_day = QuotaTracker::with_clock(5, Some(path), clock);
        assert_eq!(next_day.used_today(), 0);
    }

    #[test]
    fn test_stale_snapshot_never_overwrites_a_newer_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_usage.json");
        let clock = FixedClock::at(2025, 3, 1, 9);
        let file = UsageFile::new(path.clone());

        let mut state = QuotaState::fresh(clock.now());
        state.count = 3;
        file.write(&state);
        state.count = 2;
        file.write(&state);
        assert_eq!(load_state(&path).unwrap().count, 3, "late writer with the older count is dropped");

        clock.set(2025, 3, 2, 9);
        let next_day = QuotaState::fresh(clock.now());
        file.write(&next_day);
        assert_eq!(load_state(&path).unwrap().count, 0, "a new day always wins");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_consume_inside_runtime_persists_on_blocking_pool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_usage.json");
        let quota = Arc::new(QuotaTracker::with_usage_file(10, path.clone()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let quota = quota.clone();
                tokio::spawn(async move { quota.consume().is_ok() })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        // The write is asynchronous; wait for the final count to land
        let mut persisted = None;
        for _ in 0..100 {
            persisted = load_state(&path).map(|state| state.count);
            if persisted == Some(4) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(persisted, Some(4));
        assert_eq!(quota.remaining(), 6);
    }

    #[test]
    fn test_corrupt_or_legacy_usage_file() {
        let dir = tempfile::tempdir().unwrap();
        let clock = FixedClock::at(2025, 3, 1, 9);

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, "not json").unwrap();
        let quota = QuotaTracker::with_clock(5, Some(corrupt), clock.clone());
        assert_eq!(quota.used_today(), 0);

        let legacy = dir.path().join("legacy.json");
        fs::write(&legacy, r#"{"date": "2025-03-01", "count": 4}"#).unwrap();
        let quota = QuotaTracker::with_clock(5, Some(legacy), clock);
        assert_eq!(quota.remaining(), 1);
    }

    #[test]
    fn test_concurrent_consume_on_last_unit() {
        for _ in 0..50 {
            let quota = Arc::new(QuotaTracker::in_memory(1));
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let quota = quota.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        quota.consume().is_ok()
                    })
                })
                .collect();

            let successes = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count();
            assert_eq!(successes, 1, "exactly one caller gets the last unit");
            assert_eq!(quota.remaining(), 0);
        }
    }
}
