//! Wire types for the Sigen cloud API.
//!
//! Scope: types only — no HTTP code.
//!
//! Notes
//! - Every endpoint wraps its payload in an [`Envelope`] whose `data` field is
//!   frequently a JSON *string* that must be re-parsed (the API double-encodes
//!   most payloads, and device list entries individually on top of that).
//! - Only the fields the collector depends on are typed; everything else the
//!   vendor sends passes through untouched in a flattened map, and fields the
//!   vendor omits stay omitted.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Vendor result code for a successful response.
pub const CODE_OK: i64 = 0;
/// Vendor result code signalling the daily API credit limit was hit.
pub const CODE_RATE_LIMITED: i64 = 424;
/// Vendor result code for a date outside the system's valid data window.
pub const CODE_ACCESS_RESTRICTED: i64 = 1201;

// =====================
// Scalar ID newtype wrappers
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemId(pub String);

impl core::fmt::Display for SystemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerialNumber(pub String);

impl core::fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

// =====================
// Response envelope
// =====================

/// The `{code, msg, data}` wrapper around every API payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Envelope {
    /// Unwrap `data`, re-parsing it when the API double-encoded it as a JSON
    /// string. A string that is not valid JSON is returned as-is.
    pub fn into_data(self) -> Option<Value> {
        match self.data {
            Some(Value::String(s)) => match serde_json::from_str(&s) {
                Ok(inner) => Some(inner),
                Err(_) => Some(Value::String(s)),
            },
            other => other,
        }
    }
}

// =====================
// Inventory
// =====================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub system_id: SystemId,
    #[serde(default)]
    pub system_name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub serial_number: Option<SerialNumber>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DeviceInfo {
    pub fn is_inverter(&self) -> bool {
        self.device_type.as_deref() == Some("Inverter")
    }
}

// =====================
// Historical samples
// =====================

/// One telemetry reading from the day-level history endpoint (5-minute
/// cadence, though gaps do occur).
///
/// Metric keys and values are carried verbatim so cache files reproduce the
/// API response; aggregation only looks at [`RawSample::numeric_metrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    #[serde(rename = "dataTime", with = "data_time_format")]
    pub data_time: NaiveDateTime,
    #[serde(flatten)]
    pub metrics: BTreeMap<String, Value>,
}

impl RawSample {
    /// The calendar day this reading belongs to.
    pub fn date(&self) -> NaiveDate {
        self.data_time.date()
    }

    /// Metrics with numeric values, in key order. Non-numeric values (status
    /// strings and the like) are skipped, not coerced.
    pub fn numeric_metrics(&self) -> impl Iterator<Item = (&str, f64)> {
        self.metrics.iter().filter_map(|(k, v)| v.as_f64().map(|f| (k.as_str(), f)))
    }
}

/// The history payload is either `{"itemList": [...]}` or a bare array,
/// depending on the endpoint revision.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DayHistory {
    Keyed {
        #[serde(rename = "itemList", default)]
        item_list: Vec<RawSample>,
    },
    Bare(Vec<RawSample>),
}

impl DayHistory {
    pub fn into_samples(self) -> Vec<RawSample> {
        match self {
            DayHistory::Keyed { item_list } => item_list,
            DayHistory::Bare(samples) => samples,
        }
    }
}

/// The vendor's `dataTime` format, e.g. `"20251031 00:05"`.
pub mod data_time_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub const FORMAT: &str = "%Y%m%d %H:%M";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(D::Error::custom)
    }
}
