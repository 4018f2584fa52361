//! Realtime energy-flow watcher: polls the live power flows at a steady
//! cadence and logs them.

use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};
use serde_json::Value;

use crate::client::SigenClient;
use crate::models::sigen::{SerialNumber, SystemId};

/// One system to watch, with the inverter to poll for device-level readings
/// when the inventory exposes one.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub system_id: SystemId,
    pub inverter_serial: Option<SerialNumber>,
}

pub fn run_loop(client: &SigenClient, targets: &[WatchTarget], interval: Duration) -> Result<(), String> {
    loop {
        let tick_start = Instant::now();

        for target in targets {
            match client.get_energy_flow(&target.system_id) {
                Ok(flow) => {
                    for (name, kw) in power_readings(&flow) {
                        info!("Flow: system {} {} = {:.3} kW", target.system_id, name, kw);
                    }
                }
                // a missed tick is not fatal; the next one may succeed
                Err(e) => warn!("Flow: system {} energy flow failed: {}", target.system_id, e),
            }

            if let Some(serial) = &target.inverter_serial {
                match client.get_device_realtime_info(&target.system_id, serial) {
                    Ok(info_payload) => {
                        for (name, kw) in power_readings(&info_payload) {
                            info!("Flow: inverter {} {} = {:.3} kW", serial, name, kw);
                        }
                    }
                    Err(e) => warn!("Flow: inverter {} realtime info failed: {}", serial, e),
                }
            }
        }

        // Maintain steady cadence
        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
}

/// Power-related readings from a telemetry payload: keys mentioning "power",
/// values numeric or numeric strings (the API is inconsistent about which it
/// sends).
pub fn power_readings(payload: &Value) -> Vec<(String, f64)> {
    let Some(fields) = payload.as_object() else {
        return Vec::new();
    };
    fields
        .iter()
        .filter(|(key, _)| key.to_lowercase().contains("power"))
        .filter_map(|(key, value)| {
            let number = match value {
                Value::String(s) => s.trim().parse::<f64>().ok(),
                other => other.as_f64(),
            };
            number.map(|n| (key.clone(), n))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_power_keys_with_numeric_or_string_values() {
        let flow = serde_json::json!({
            "pvTotalPower": 5.2,
            "gridPower": "-1.25",
            "batteryPower": 0,
            "batterySoc": 80.0,
            "systemState": "Running",
            "loadPower": "n/a",
        });
        let mut readings = power_readings(&flow);
        readings.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            readings,
            vec![
                ("batteryPower".to_string(), 0.0),
                ("gridPower".to_string(), -1.25),
                ("pvTotalPower".to_string(), 5.2),
            ]
        );
    }

    #[test]
    fn non_object_payload_yields_nothing() {
        assert!(power_readings(&serde_json::json!([1, 2, 3])).is_empty());
    }
}
