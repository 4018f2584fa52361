//! Monthly output files derived from the day cache.
//!
//! These are caches of a cache: rebuilding them from the day files always
//! wins over whatever is on disk, so they are rewritten whole on every
//! aggregation run.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::models::sigen::SystemId;
use crate::storage::day_cache::DayCacheError;

pub fn raw_file_path(data_dir: &Path, system_id: &SystemId, year: i32, month: u32) -> PathBuf {
    data_dir.join(format!("{}_raw_{}_{:02}.json", system_id, year, month))
}

pub fn aggregated_file_path(data_dir: &Path, system_id: &SystemId, year: i32, month: u32) -> PathBuf {
    data_dir.join(format!("{}_30min_{}_{:02}.json", system_id, year, month))
}

/// Pretty-printed whole-file write. Serialization of the inputs is
/// deterministic, so re-running over an unchanged cache reproduces the file
/// byte for byte.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), DayCacheError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec_pretty(value)?;
    fs::write(path, body)?;
    Ok(())
}
