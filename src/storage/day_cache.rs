//! Flat-file day cache: one JSON file per `(system, date)`, holding the
//! day's raw samples exactly as the API returned them.
//!
//! A cached day is final. `put` refuses to overwrite, so a logic error in a
//! caller can never silently rewrite history; deleting a file by hand is the
//! only way to force a re-fetch.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::{Datelike, NaiveDate};

use crate::models::sigen::{RawSample, SystemId};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug)]
pub enum DayCacheError {
    NotCached { system_id: SystemId, date: NaiveDate },
    AlreadyCached { system_id: SystemId, date: NaiveDate },
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl core::fmt::Display for DayCacheError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DayCacheError::NotCached { system_id, date } => {
                write!(f, "no cache entry for system {} on {}", system_id, date)
            }
            DayCacheError::AlreadyCached { system_id, date } => {
                write!(f, "cache entry for system {} on {} already exists", system_id, date)
            }
            DayCacheError::Io(e) => write!(f, "cache i/o error: {}", e),
            DayCacheError::Json(e) => write!(f, "cache json error: {}", e),
        }
    }
}

impl std::error::Error for DayCacheError {}

impl From<std::io::Error> for DayCacheError {
    fn from(value: std::io::Error) -> Self {
        DayCacheError::Io(value)
    }
}

impl From<serde_json::Error> for DayCacheError {
    fn from(value: serde_json::Error) -> Self {
        DayCacheError::Json(value)
    }
}

pub struct DayCache {
    root: PathBuf,
}

impl DayCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DayCache { root: root.into() }
    }

    fn entry_path(&self, system_id: &SystemId, date: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{}_history_{}.json", system_id, date.format(DATE_FORMAT)))
    }

    pub fn has(&self, system_id: &SystemId, date: NaiveDate) -> bool {
        self.entry_path(system_id, date).is_file()
    }

    pub fn get(&self, system_id: &SystemId, date: NaiveDate) -> Result<Vec<RawSample>, DayCacheError> {
        let path = self.entry_path(system_id, date);
        if !path.is_file() {
            return Err(DayCacheError::NotCached {
                system_id: system_id.clone(),
                date,
            });
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Store a day's samples. Write-once: an existing entry is rejected and
    /// left untouched (`create_new` makes the check atomic per key).
    pub fn put(&self, system_id: &SystemId, date: NaiveDate, samples: &[RawSample]) -> Result<(), DayCacheError> {
        fs::create_dir_all(&self.root)?;
        let path = self.entry_path(system_id, date);
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(DayCacheError::AlreadyCached {
                    system_id: system_id.clone(),
                    date,
                });
            }
            Err(e) => return Err(e.into()),
        };
        let body = serde_json::to_vec_pretty(samples)?;
        file.write_all(&body)?;
        Ok(())
    }

    /// All dates with a cache entry for this system, ascending. Files not
    /// matching the entry name pattern are ignored.
    pub fn cached_dates(&self, system_id: &SystemId) -> Result<Vec<NaiveDate>, DayCacheError> {
        let prefix = format!("{}_history_", system_id);
        let mut dates = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dates),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(date_part) = name.strip_prefix(&prefix).and_then(|rest| rest.strip_suffix(".json")) else {
                continue;
            };
            if let Ok(date) = NaiveDate::parse_from_str(date_part, DATE_FORMAT) {
                dates.push(date);
            }
        }
        dates.sort_unstable();
        Ok(dates)
    }

    pub fn cached_dates_in_month(
        &self,
        system_id: &SystemId,
        year: i32,
        month: u32,
    ) -> Result<Vec<NaiveDate>, DayCacheError> {
        let mut dates = self.cached_dates(system_id)?;
        dates.retain(|d| d.year() == year && d.month() == month);
        Ok(dates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(time: &str, power: f64) -> RawSample {
        serde_json::from_value(serde_json::json!({
            "dataTime": time,
            "pvTotalPower": power,
        }))
        .unwrap()
    }

    fn cache() -> (tempfile::TempDir, DayCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = DayCache::new(dir.path().join("cache"));
        (dir, cache)
    }

    #[test]
    fn put_then_get_round_trips() {
        let (_dir, cache) = cache();
        let system = SystemId("sys-1".into());
        let date = NaiveDate::from_ymd_opt(2025, 10, 31).unwrap();
        let samples = vec![sample("20251031 00:00", 0.0), sample("20251031 00:05", 0.1)];

        assert!(!cache.has(&system, date));
        cache.put(&system, date, &samples).unwrap();
        assert!(cache.has(&system, date));
        assert_eq!(cache.get(&system, date).unwrap(), samples);
    }

    #[test]
    fn put_refuses_overwrite_and_keeps_original() {
        let (_dir, cache) = cache();
        let system = SystemId("sys-1".into());
        let date = NaiveDate::from_ymd_opt(2025, 10, 31).unwrap();
        let original = vec![sample("20251031 12:00", 5.5)];
        cache.put(&system, date, &original).unwrap();

        let replacement = vec![sample("20251031 12:00", 9.9)];
        let err = cache.put(&system, date, &replacement).unwrap_err();
        assert!(matches!(err, DayCacheError::AlreadyCached { .. }));
        assert_eq!(cache.get(&system, date).unwrap(), original);
    }

    #[test]
    fn get_missing_is_not_cached() {
        let (_dir, cache) = cache();
        let system = SystemId("sys-1".into());
        let date = NaiveDate::from_ymd_opt(2025, 10, 31).unwrap();
        let err = cache.get(&system, date).unwrap_err();
        assert!(matches!(err, DayCacheError::NotCached { .. }));
    }

    #[test]
    fn cached_dates_sorted_and_scoped_per_system() {
        let (_dir, cache) = cache();
        let sys_a = SystemId("sys-a".into());
        let sys_b = SystemId("sys-b".into());
        let d1 = NaiveDate::from_ymd_opt(2025, 10, 2).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
        let d3 = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();
        cache.put(&sys_a, d1, &[]).unwrap();
        cache.put(&sys_a, d2, &[]).unwrap();
        cache.put(&sys_a, d3, &[]).unwrap();
        cache.put(&sys_b, NaiveDate::from_ymd_opt(2025, 10, 15).unwrap(), &[]).unwrap();

        assert_eq!(cache.cached_dates(&sys_a).unwrap(), vec![d2, d1, d3]);
        assert_eq!(cache.cached_dates_in_month(&sys_a, 2025, 10).unwrap(), vec![d2, d1]);
        assert_eq!(cache.cached_dates_in_month(&sys_a, 2025, 11).unwrap(), vec![d3]);
    }

    #[test]
    fn cached_dates_on_missing_root_is_empty() {
        let (_dir, cache) = cache();
        assert!(cache.cached_dates(&SystemId("sys-1".into())).unwrap().is_empty());
    }
}
