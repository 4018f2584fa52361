pub mod models {
    pub mod sigen;
}

pub mod client;
pub mod config;
pub mod storage {
    pub mod day_cache;
    pub mod monthly;
}
pub mod services {
    pub mod aggregate;
    pub mod collect;
    pub mod realtime;
}

use std::path::PathBuf;
use std::time::Duration;

use log::{error, info, warn};

use crate::client::SigenClient;
use crate::config::Config;
use crate::models::sigen::SystemId;
use crate::services::collect::{CollectOptions, CollectSummary};
use crate::services::realtime::WatchTarget;
use crate::services::{aggregate, collect, realtime};
use crate::storage::day_cache::DayCache;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

pub fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (collect_enabled={}, install_date={}, cache_dir={}, data_dir={}, collect_rps={}, realtime_enabled={}, realtime_interval={}s)",
        cfg.collect_enabled,
        cfg.install_date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
        cfg.cache_dir.display(),
        cfg.data_dir.display(),
        cfg.requests_per_second
            .map(|v| v.get().to_string())
            .unwrap_or_else(|| "-".to_string()),
        cfg.realtime_enabled,
        cfg.realtime_interval.as_secs(),
    );

    // 2) Authenticate
    let client = SigenClient::new(&cfg.base_url, &cfg.username, &cfg.password)
        .map_err(|e| format!("Sigen auth failed (bad credentials or base URL?): {}", e))?;
    info!("Authenticated to Sigen API");

    // 3) Discover systems
    let systems = client.get_systems().map_err(|e| format!("get_systems failed: {}", e))?;
    if systems.is_empty() {
        return Err("No systems found; ensure the account has at least one system".into());
    }
    let system_ids: Vec<SystemId> = systems.iter().map(|s| s.system_id.clone()).collect();
    info!("Discovered {} system(s)", system_ids.len());
    for system in &systems {
        info!(
            "System: {} ({})",
            system.system_id,
            system.system_name.as_deref().unwrap_or("-")
        );
    }

    // 4) Device inventory and a current-state snapshot (informational)
    let mut targets: Vec<WatchTarget> = Vec::with_capacity(system_ids.len());
    for system_id in &system_ids {
        let mut inverter_serial = None;
        match client.get_devices(system_id) {
            Ok(devices) => {
                for device in &devices {
                    info!(
                        "Device: system {} type {} serial {}",
                        system_id,
                        device.device_type.as_deref().unwrap_or("-"),
                        device.serial_number.as_ref().map(|s| s.0.as_str()).unwrap_or("-"),
                    );
                    if device.is_inverter() && inverter_serial.is_none() {
                        inverter_serial = device.serial_number.clone();
                    }
                }
            }
            Err(e) => warn!("get_devices({}) failed: {}", system_id, e),
        }
        targets.push(WatchTarget {
            system_id: system_id.clone(),
            inverter_serial,
        });

        match client.get_system_summary(system_id) {
            Ok(summary) => {
                for (name, kw) in realtime::power_readings(&summary) {
                    info!("Summary: system {} {} = {:.3} kW", system_id, name, kw);
                }
            }
            Err(e) => warn!("get_system_summary({}) failed: {}", system_id, e),
        }
    }

    // 5) Historical collection and monthly aggregation
    if cfg.collect_enabled {
        let install_date = cfg
            .install_date
            .ok_or_else(|| "SIGEN_INSTALL_DATE must be set when collection is enabled".to_string())?;
        let cache = DayCache::new(&cfg.cache_dir);
        let opts = CollectOptions {
            request_spacing: cfg
                .requests_per_second
                .map(|limit| Duration::from_secs_f64(1.0 / f64::from(limit.get()))),
            retry_backoff: cfg.retry_backoff,
        };

        for system_id in &system_ids {
            let summary = collect::run_for_system(&client, &cache, system_id, install_date, &opts)?;
            report_collection(system_id, &summary);

            let months = aggregate::aggregate_all(&cache, &cfg.data_dir, system_id)?;
            info!("Aggregated {} month(s) for system {}", months.len(), system_id);
        }
    } else {
        info!("Historical collection disabled via COLLECT_ENABLED={}", cfg.collect_enabled);
    }

    // 6) Realtime loop (steady cadence)
    if cfg.realtime_enabled {
        info!(
            "Starting realtime loop: systems={}, interval={}s",
            system_ids.len(),
            cfg.realtime_interval.as_secs()
        );
        realtime::run_loop(&client, &targets, cfg.realtime_interval)?;
    } else {
        info!("Realtime loop disabled via REALTIME_ENABLED={}", cfg.realtime_enabled);
    }

    Ok(())
}

/// A partial run still exits 0; the log makes it distinguishable from a
/// complete one and names the resume point or the failed dates.
fn report_collection(system_id: &SystemId, summary: &CollectSummary) {
    if summary.is_complete() {
        info!(
            "Collect: system {} complete ({} fetched, {} cached, {} restricted)",
            system_id, summary.fetched, summary.cached, summary.restricted
        );
        return;
    }
    if let Some(resume) = summary.stopped_at {
        warn!(
            "Collect: system {} partial: rate limited at {} ({} fetched, {} cached); re-run to resume",
            system_id, resume, summary.fetched, summary.cached
        );
    }
    for (date, reason) in &summary.failed {
        warn!("Collect: system {} failed on {}: {}", system_id, date, reason);
    }
}

fn configure_env_from_cli() -> Result<Option<LoadedEnvFile>, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut env_file: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--env-file") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                env_file = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--env-file=") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let path_str = &s["--env-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                env_file = Some(PathBuf::from(path_str));
            }
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }

    if let Some(path) = env_file {
        dotenvy::from_path(&path).map_err(|e| format!("failed to load env file {}: {}", path.display(), e))?;
        Ok(Some(LoadedEnvFile { path, explicit: true }))
    } else {
        match dotenvy::dotenv() {
            Ok(path) => Ok(Some(LoadedEnvFile { path, explicit: false })),
            Err(e) if e.not_found() => Ok(None),
            Err(e) => Err(format!("failed to load .env: {}", e)),
        }
    }
}

fn main() {
    let loaded_env = match configure_env_from_cli() {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "sigen-collect {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
