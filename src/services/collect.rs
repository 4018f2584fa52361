//! Historical collection: fetch every missing day between the install date
//! and yesterday into the day cache.
//!
//! The walk is oldest-first on purpose: a run cut short by rate limiting
//! always leaves a contiguous prefix of history cached, and the next run
//! resumes from the first uncached date for free. Each fetched day is written
//! immediately, so a crash loses at most the in-flight day.
//!
//! Today is always excluded — its data is still being written on the vendor
//! side and a cached day is final.

use std::thread;
use std::time::{Duration as StdDuration, Instant};

use chrono::{Local, NaiveDate};
use log::{debug, info, warn};

use crate::client::{DayHistorySource, SigenClientError};
use crate::models::sigen::{RawSample, SystemId};
use crate::storage::day_cache::DayCache;

#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Minimum spacing between consecutive gateway requests.
    pub request_spacing: Option<StdDuration>,
    /// Pause before the single retry of a transient failure.
    pub retry_backoff: StdDuration,
}

impl Default for CollectOptions {
    fn default() -> Self {
        CollectOptions {
            request_spacing: None,
            retry_backoff: StdDuration::from_secs(5),
        }
    }
}

/// Outcome of one collection run. Never a silent partial success: a stop or
/// any failed date is visible here.
#[derive(Debug, Default)]
pub struct CollectSummary {
    /// Days skipped because they were already cached.
    pub cached: usize,
    /// Days newly fetched and written this run.
    pub fetched: usize,
    /// Days skipped because the API restricts access to them (outside the
    /// system's valid data window). Nothing is cached for these.
    pub restricted: usize,
    /// Dates that failed after the retry, with the reason. The walk continues
    /// past these.
    pub failed: Vec<(NaiveDate, String)>,
    /// Set when the gateway rate-limited the run; collection stopped here and
    /// a later run will resume at this date.
    pub stopped_at: Option<NaiveDate>,
}

impl CollectSummary {
    pub fn is_complete(&self) -> bool {
        self.stopped_at.is_none() && self.failed.is_empty()
    }
}

/// Collect `[install_date, yesterday]` for one system.
pub fn run_for_system(
    gateway: &impl DayHistorySource,
    cache: &DayCache,
    system_id: &SystemId,
    install_date: NaiveDate,
    opts: &CollectOptions,
) -> Result<CollectSummary, String> {
    let yesterday = Local::now()
        .date_naive()
        .pred_opt()
        .ok_or_else(|| "current date underflowed".to_string())?;
    run_range(gateway, cache, system_id, install_date, yesterday, opts)
}

/// Collect the closed date range `[start, end]`, oldest first.
pub fn run_range(
    gateway: &impl DayHistorySource,
    cache: &DayCache,
    system_id: &SystemId,
    start: NaiveDate,
    end: NaiveDate,
    opts: &CollectOptions,
) -> Result<CollectSummary, String> {
    let mut summary = CollectSummary::default();
    if start > end {
        info!("Collect: system {} has an empty range ({} > {})", system_id, start, end);
        return Ok(summary);
    }
    info!("Collect: system {} range {} to {}", system_id, start, end);

    let mut date = start;
    loop {
        if cache.has(system_id, date) {
            summary.cached += 1;
            debug!("Collect: {} already cached", date);
        } else {
            match fetch_with_retry(gateway, system_id, date, opts) {
                Ok(samples) => {
                    // written immediately; a crash never loses completed days
                    cache
                        .put(system_id, date, &samples)
                        .map_err(|e| format!("cache write for {} failed: {}", date, e))?;
                    summary.fetched += 1;
                    info!("Collect: fetched {} ({} sample(s))", date, samples.len());
                }
                Err(SigenClientError::RateLimited) => {
                    summary.stopped_at = Some(date);
                    warn!(
                        "Collect: rate limited at {}; stopping, re-run later to resume from here",
                        date
                    );
                    break;
                }
                Err(SigenClientError::AccessRestricted) => {
                    summary.restricted += 1;
                    debug!("Collect: {} is outside the system's data window; skipping", date);
                }
                Err(e) => {
                    warn!("Collect: {} failed: {}", date, e);
                    summary.failed.push((date, e.to_string()));
                }
            }
        }

        if date == end {
            break;
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }

    Ok(summary)
}

/// One gateway call with request pacing and a single retry for transient
/// faults. Rate limiting and access restriction pass straight through.
fn fetch_with_retry(
    gateway: &impl DayHistorySource,
    system_id: &SystemId,
    date: NaiveDate,
    opts: &CollectOptions,
) -> Result<Vec<RawSample>, SigenClientError> {
    match fetch_paced(gateway, system_id, date, opts.request_spacing) {
        Err(e) if e.is_transient() => {
            debug!("Collect: {} hit a transient error ({}); retrying once", date, e);
            thread::sleep(opts.retry_backoff);
            fetch_paced(gateway, system_id, date, opts.request_spacing)
        }
        other => other,
    }
}

fn fetch_paced(
    gateway: &impl DayHistorySource,
    system_id: &SystemId,
    date: NaiveDate,
    min_spacing: Option<StdDuration>,
) -> Result<Vec<RawSample>, SigenClientError> {
    let started = Instant::now();
    let result = gateway.fetch_day_history(system_id, date);
    if let Some(required) = min_spacing {
        let elapsed = started.elapsed();
        if elapsed < required {
            thread::sleep(required - elapsed);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::{BTreeMap, VecDeque};

    #[derive(Clone)]
    enum Step {
        Data(Vec<RawSample>),
        RateLimited,
        Restricted,
        Transport,
    }

    /// Gateway whose per-date behavior is scripted; unscripted dates return
    /// an empty successful day. Records every call it receives.
    #[derive(Default)]
    struct ScriptedGateway {
        steps: RefCell<BTreeMap<NaiveDate, VecDeque<Step>>>,
        calls: RefCell<Vec<NaiveDate>>,
    }

    impl ScriptedGateway {
        fn script(&self, date: NaiveDate, steps: Vec<Step>) {
            self.steps.borrow_mut().insert(date, steps.into());
        }

        fn calls_for(&self, date: NaiveDate) -> usize {
            self.calls.borrow().iter().filter(|d| **d == date).count()
        }
    }

    impl DayHistorySource for ScriptedGateway {
        fn fetch_day_history(
            &self,
            _system_id: &SystemId,
            date: NaiveDate,
        ) -> Result<Vec<RawSample>, SigenClientError> {
            self.calls.borrow_mut().push(date);
            let step = self
                .steps
                .borrow_mut()
                .get_mut(&date)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(Step::Data(Vec::new()));
            match step {
                Step::Data(samples) => Ok(samples),
                Step::RateLimited => Err(SigenClientError::RateLimited),
                Step::Restricted => Err(SigenClientError::AccessRestricted),
                Step::Transport => Err(SigenClientError::Transport("connection reset".into())),
            }
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample(time: &str) -> RawSample {
        serde_json::from_value(serde_json::json!({"dataTime": time, "pvTotalPower": 1.0})).unwrap()
    }

    fn fast_opts() -> CollectOptions {
        CollectOptions {
            request_spacing: None,
            retry_backoff: StdDuration::ZERO,
        }
    }

    fn cache() -> (tempfile::TempDir, DayCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = DayCache::new(dir.path().join("cache"));
        (dir, cache)
    }

    #[test]
    fn collects_range_and_is_idempotent() {
        let (_dir, cache) = cache();
        let gateway = ScriptedGateway::default();
        let system = SystemId("sys-1".into());
        let (start, end) = (date(2025, 10, 1), date(2025, 10, 3));

        let first = run_range(&gateway, &cache, &system, start, end, &fast_opts()).unwrap();
        assert!(first.is_complete());
        assert_eq!(first.fetched, 3);
        assert_eq!(gateway.calls.borrow().len(), 3);

        let second = run_range(&gateway, &cache, &system, start, end, &fast_opts()).unwrap();
        assert!(second.is_complete());
        assert_eq!(second.fetched, 0);
        assert_eq!(second.cached, 3);
        // no network traffic for cached days
        assert_eq!(gateway.calls.borrow().len(), 3);
    }

    #[test]
    fn rate_limit_stops_with_contiguous_prefix() {
        let (_dir, cache) = cache();
        let gateway = ScriptedGateway::default();
        let system = SystemId("sys-1".into());
        let limited_at = date(2025, 10, 3);
        gateway.script(limited_at, vec![Step::RateLimited]);

        let summary = run_range(&gateway, &cache, &system, date(2025, 10, 1), date(2025, 10, 5), &fast_opts()).unwrap();
        assert_eq!(summary.stopped_at, Some(limited_at));
        assert_eq!(summary.fetched, 2);
        assert!(!summary.is_complete());

        // every date before the stop is cached, nothing at or after it is
        assert!(cache.has(&system, date(2025, 10, 1)));
        assert!(cache.has(&system, date(2025, 10, 2)));
        assert!(!cache.has(&system, date(2025, 10, 3)));
        assert!(!cache.has(&system, date(2025, 10, 4)));
        assert!(!cache.has(&system, date(2025, 10, 5)));

        // the credit limit reset (queue exhausted); a re-run resumes at the stop
        let resumed = run_range(&gateway, &cache, &system, date(2025, 10, 1), date(2025, 10, 5), &fast_opts()).unwrap();
        assert!(resumed.is_complete());
        assert_eq!(resumed.cached, 2);
        assert_eq!(resumed.fetched, 3);
    }

    #[test]
    fn access_restricted_date_is_skipped_without_placeholder() {
        let (_dir, cache) = cache();
        let gateway = ScriptedGateway::default();
        let system = SystemId("sys-1".into());
        let restricted = date(2025, 9, 30);
        gateway.script(restricted, vec![Step::Restricted]);

        let summary = run_range(&gateway, &cache, &system, restricted, date(2025, 10, 2), &fast_opts()).unwrap();
        assert!(summary.is_complete());
        assert_eq!(summary.restricted, 1);
        assert_eq!(summary.fetched, 2);
        assert!(!cache.has(&system, restricted));
        assert!(cache.has(&system, date(2025, 10, 1)));
        assert!(cache.has(&system, date(2025, 10, 2)));
    }

    #[test]
    fn transient_error_is_retried_once() {
        let (_dir, cache) = cache();
        let gateway = ScriptedGateway::default();
        let system = SystemId("sys-1".into());
        let flaky = date(2025, 10, 1);
        gateway.script(flaky, vec![Step::Transport, Step::Data(vec![sample("20251001 00:00")])]);

        let summary = run_range(&gateway, &cache, &system, flaky, flaky, &fast_opts()).unwrap();
        assert!(summary.is_complete());
        assert_eq!(summary.fetched, 1);
        assert_eq!(gateway.calls_for(flaky), 2);
        assert_eq!(cache.get(&system, flaky).unwrap().len(), 1);
    }

    #[test]
    fn persistent_error_is_recorded_and_walk_continues() {
        let (_dir, cache) = cache();
        let gateway = ScriptedGateway::default();
        let system = SystemId("sys-1".into());
        let broken = date(2025, 10, 2);
        gateway.script(broken, vec![Step::Transport, Step::Transport]);

        let summary = run_range(&gateway, &cache, &system, date(2025, 10, 1), date(2025, 10, 3), &fast_opts()).unwrap();
        assert!(!summary.is_complete());
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, broken);
        assert!(!cache.has(&system, broken));
        assert!(cache.has(&system, date(2025, 10, 3)));
    }

    #[test]
    fn cached_day_content_is_never_replaced() {
        let (_dir, cache) = cache();
        let gateway = ScriptedGateway::default();
        let system = SystemId("sys-1".into());
        let day = date(2025, 10, 1);
        let original = vec![sample("20251001 08:00")];
        cache.put(&system, day, &original).unwrap();
        gateway.script(day, vec![Step::Data(vec![sample("20251001 09:00")])]);

        let summary = run_range(&gateway, &cache, &system, day, day, &fast_opts()).unwrap();
        assert_eq!(summary.cached, 1);
        assert_eq!(gateway.calls_for(day), 0);
        assert_eq!(cache.get(&system, day).unwrap(), original);
    }
}
