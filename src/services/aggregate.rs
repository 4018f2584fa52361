//! Monthly aggregation over the day cache.
//!
//! The day is tiled into 48 fixed half-open 30-minute buckets anchored to
//! midnight; bucket boundaries depend only on the calendar, never on which
//! samples happen to exist. Per bucket and per metric the count, sum, avg,
//! min and max are computed over the samples that actually carry the metric.
//! A metric no sample in the bucket carries is omitted outright — zero-filling
//! it would fabricate a "zero power" reading where there was none.
//!
//! Aggregation is a pure function of cache contents: it rereads every cached
//! day of the month and rewrites both monthly files, so it is safe to re-run
//! after a resumed collection pass fills in more days.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use log::{debug, info, warn};
use serde::Serialize;
use serde::ser::SerializeMap;

use crate::models::sigen::{RawSample, SystemId};
use crate::storage::day_cache::DayCache;
use crate::storage::monthly;

pub const BLOCK_MINUTES: u32 = 30;
pub const BLOCKS_PER_DAY: usize = 48;

/// Summary statistics for one metric within one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricStats {
    pub count: usize,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// One 30-minute bucket: `[block_start, block_end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedBlock {
    pub block_start: NaiveDateTime,
    pub block_end: NaiveDateTime,
    pub sample_count: usize,
    pub metrics: BTreeMap<String, MetricStats>,
}

// The on-disk layout flattens per-metric stats into `{metric}_{stat}` keys,
// e.g. `pvTotalPower_avg`. Serialize is hand-written because the key set
// varies per block.
impl Serialize for AggregatedBlock {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let n_entries = 3 + self.metrics.len() * 5;
        let mut map = serializer.serialize_map(Some(n_entries))?;
        map.serialize_entry("block_start", &self.block_start)?;
        map.serialize_entry("block_end", &self.block_end)?;
        map.serialize_entry("sample_count", &self.sample_count)?;
        for (name, stats) in &self.metrics {
            map.serialize_entry(&format!("{name}_avg"), &stats.avg)?;
            map.serialize_entry(&format!("{name}_min"), &stats.min)?;
            map.serialize_entry(&format!("{name}_max"), &stats.max)?;
            map.serialize_entry(&format!("{name}_sum"), &stats.sum)?;
            map.serialize_entry(&format!("{name}_count"), &stats.count)?;
        }
        map.end()
    }
}

/// Tile one calendar day into its 48 blocks and fold the given samples in.
///
/// Samples on a 30-minute boundary belong to the bucket they start. Samples
/// whose timestamp falls outside `date` are dropped with a warning; the day
/// cache keys entries by date, so such a sample means the API misfiled it.
pub fn aggregate_day(date: NaiveDate, samples: &[RawSample]) -> Vec<AggregatedBlock> {
    let mut assigned: Vec<Vec<&RawSample>> = vec![Vec::new(); BLOCKS_PER_DAY];
    for sample in samples {
        if sample.date() != date {
            warn!(
                "Aggregate: sample at {} found in the cache entry for {}; dropping it",
                sample.data_time, date
            );
            continue;
        }
        let minute_of_day = sample.data_time.hour() * 60 + sample.data_time.minute();
        assigned[(minute_of_day / BLOCK_MINUTES) as usize].push(sample);
    }

    let day_start = date.and_time(NaiveTime::MIN);
    assigned
        .into_iter()
        .enumerate()
        .map(|(index, bucket)| {
            let block_start = day_start + Duration::minutes(i64::from(BLOCK_MINUTES) * index as i64);
            let block_end = block_start + Duration::minutes(i64::from(BLOCK_MINUTES));

            let mut metrics: BTreeMap<String, MetricStats> = BTreeMap::new();
            for sample in &bucket {
                for (name, value) in sample.numeric_metrics() {
                    metrics
                        .entry(name.to_string())
                        .and_modify(|stats| {
                            stats.count += 1;
                            stats.sum += value;
                            stats.min = stats.min.min(value);
                            stats.max = stats.max.max(value);
                        })
                        .or_insert(MetricStats {
                            count: 1,
                            sum: value,
                            avg: value,
                            min: value,
                            max: value,
                        });
                }
            }
            for stats in metrics.values_mut() {
                stats.avg = stats.sum / stats.count as f64;
            }

            AggregatedBlock {
                block_start,
                block_end,
                sample_count: bucket.len(),
                metrics,
            }
        })
        .collect()
}

#[derive(Debug)]
pub struct MonthSummary {
    pub year: i32,
    pub month: u32,
    pub days: usize,
    pub sample_count: usize,
    pub block_count: usize,
    pub raw_path: PathBuf,
    pub aggregated_path: PathBuf,
}

/// Rebuild both monthly files for `(system, year, month)` from the cache.
pub fn aggregate_month(
    cache: &DayCache,
    data_dir: &Path,
    system_id: &SystemId,
    year: i32,
    month: u32,
) -> Result<MonthSummary, String> {
    let dates = cache
        .cached_dates_in_month(system_id, year, month)
        .map_err(|e| format!("list cached dates for {}-{:02} failed: {}", year, month, e))?;

    let mut all_samples: Vec<RawSample> = Vec::new();
    let mut all_blocks: Vec<AggregatedBlock> = Vec::new();
    for date in &dates {
        let day_samples = cache
            .get(system_id, *date)
            .map_err(|e| format!("read cached day {} failed: {}", date, e))?;
        all_blocks.extend(aggregate_day(*date, &day_samples));
        all_samples.extend(day_samples);
    }

    let raw_path = monthly::raw_file_path(data_dir, system_id, year, month);
    let aggregated_path = monthly::aggregated_file_path(data_dir, system_id, year, month);
    monthly::write_json(&raw_path, &all_samples)
        .map_err(|e| format!("write {} failed: {}", raw_path.display(), e))?;
    monthly::write_json(&aggregated_path, &all_blocks)
        .map_err(|e| format!("write {} failed: {}", aggregated_path.display(), e))?;

    debug!(
        "Aggregate: system {} {}-{:02}: {} day(s), {} sample(s), {} block(s)",
        system_id,
        year,
        month,
        dates.len(),
        all_samples.len(),
        all_blocks.len()
    );

    Ok(MonthSummary {
        year,
        month,
        days: dates.len(),
        sample_count: all_samples.len(),
        block_count: all_blocks.len(),
        raw_path,
        aggregated_path,
    })
}

/// Rebuild monthly files for every month with at least one cached day.
pub fn aggregate_all(cache: &DayCache, data_dir: &Path, system_id: &SystemId) -> Result<Vec<MonthSummary>, String> {
    let dates = cache
        .cached_dates(system_id)
        .map_err(|e| format!("list cached dates failed: {}", e))?;

    let mut months: Vec<(i32, u32)> = dates.iter().map(|d| (d.year(), d.month())).collect();
    months.dedup();

    let mut summaries = Vec::with_capacity(months.len());
    for (year, month) in months {
        let summary = aggregate_month(cache, data_dir, system_id, year, month)?;
        info!(
            "Aggregate: system {} {}-{:02}: {} sample(s) -> {} block(s)",
            system_id, year, month, summary.sample_count, summary.block_count
        );
        summaries.push(summary);
    }
    Ok(summaries)
}
