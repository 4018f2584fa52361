//! Standalone HTTP client for the Sigen cloud API (the endpoints the
//! collector consumes).
//!
//! - Blocking client using `ureq` (no async).
//! - Uses the models in `crate::models::sigen`.
//! - HTTP statuses are inspected manually (`http_status_as_error` disabled)
//!   because the API reports most failures through the envelope `code`, not
//!   the status line.
//!
//! Authentication
//! - Performs a password login for a bearer token; on a 401 the client logs
//!   in again and retries the request once.

use std::cell::RefCell;
use std::time::Duration;

use chrono::NaiveDate;
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::models::sigen::*;

const LOGIN_PATH: &str = "/openapi/auth/login/password";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum SigenClientError {
    Transport(String),
    Http { status: u16, message: String },
    Json(serde_json::Error),
    Decode(serde_path_to_error::Error<serde_json::Error>),
    Auth(String),
    RateLimited,
    AccessRestricted,
    Api { code: i64, message: String },
}

impl core::fmt::Display for SigenClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SigenClientError::Transport(s) => write!(f, "transport error: {}", s),
            SigenClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            SigenClientError::Json(e) => write!(f, "json error: {}", e),
            SigenClientError::Decode(e) => write!(f, "decode error at {}: {}", e.path(), e),
            SigenClientError::Auth(s) => write!(f, "auth error: {}", s),
            SigenClientError::RateLimited => write!(f, "api credit limit reached"),
            SigenClientError::AccessRestricted => write!(f, "access restricted for the requested date"),
            SigenClientError::Api { code, message } => write!(f, "api error {}: {}", code, message),
        }
    }
}

impl std::error::Error for SigenClientError {}

impl From<serde_json::Error> for SigenClientError {
    fn from(value: serde_json::Error) -> Self {
        SigenClientError::Json(value)
    }
}

impl SigenClientError {
    /// Errors worth one local retry: transient transport and server faults.
    /// Rate limiting, access restriction and auth failures are never retried
    /// here; the collection driver handles those explicitly.
    pub fn is_transient(&self) -> bool {
        match self {
            SigenClientError::Transport(_) => true,
            SigenClientError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// The one gateway operation the collection driver depends on, split out so
/// the driver can be exercised against an in-memory gateway.
pub trait DayHistorySource {
    fn fetch_day_history(&self, system_id: &SystemId, date: NaiveDate) -> Result<Vec<RawSample>, SigenClientError>;
}

pub struct SigenClient {
    agent: ureq::Agent,
    base_url: String,
    username: String,
    password: String,
    access_token: RefCell<Option<String>>,
}

impl SigenClient {
    /// Build a client and perform the initial login. Fails fast on bad
    /// credentials so setup errors surface before any collection starts.
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, SigenClientError> {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .http_status_as_error(false)
            .build();

        let client = SigenClient {
            agent: ureq::Agent::new_with_config(config),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            access_token: RefCell::new(None),
        };
        client.login()?;
        Ok(client)
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn login(&self) -> Result<(), SigenClientError> {
        let payload = serde_json::json!({
            "username": self.username,
            "password": self.password,
        });
        let mut resp = self
            .agent
            .post(&self.url(LOGIN_PATH))
            .header("Accept", "application/json")
            .send_json(&payload)
            .map_err(|e| SigenClientError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .body_mut()
            .read_to_string()
            .map_err(|e| SigenClientError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(SigenClientError::Auth(format!("http {}: {}", status.as_u16(), body)));
        }

        let envelope: Envelope = serde_json::from_str(&body)?;
        if envelope.code != CODE_OK {
            let message = envelope.msg.unwrap_or_else(|| "login rejected".to_string());
            return Err(SigenClientError::Auth(format!("code {}: {}", envelope.code, message)));
        }

        let token = envelope
            .into_data()
            .and_then(|data| data.get("accessToken").and_then(Value::as_str).map(str::to_string))
            .ok_or_else(|| SigenClientError::Auth("login response carried no accessToken".to_string()))?;
        *self.access_token.borrow_mut() = Some(token);
        Ok(())
    }

    fn bearer(&self) -> Result<String, SigenClientError> {
        if let Some(token) = self.access_token.borrow().as_deref() {
            return Ok(token.to_string());
        }
        self.login()?;
        self.access_token
            .borrow()
            .clone()
            .ok_or_else(|| SigenClientError::Auth("no access token after login".to_string()))
    }

    fn call_get(
        &self,
        url: &str,
        query: &[(&str, String)],
        token: &str,
    ) -> Result<(StatusCode, String), SigenClientError> {
        let mut req = self.agent.get(url).header("Accept", "application/json");
        for (k, v) in query {
            req = req.query(*k, v);
        }
        req = req.header("Authorization", &format!("Bearer {}", token));

        let mut resp = req.call().map_err(|e| SigenClientError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .body_mut()
            .read_to_string()
            .map_err(|e| SigenClientError::Transport(e.to_string()))?;
        Ok((status, body))
    }

    /// GET an endpoint and unwrap the envelope down to its `data` value.
    ///
    /// Retries once with a fresh login on 401; maps the vendor result codes
    /// and HTTP 429 onto the error taxonomy.
    fn get_data(&self, path: &str, query: &[(&str, String)]) -> Result<Value, SigenClientError> {
        let url = self.url(path);

        let token = self.bearer()?;
        let (mut status, mut body) = self.call_get(&url, query, &token)?;

        if status == StatusCode::UNAUTHORIZED {
            // token expired; re-login and retry once
            self.login()?;
            let token = self.bearer()?;
            (status, body) = self.call_get(&url, query, &token)?;
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SigenClientError::RateLimited);
        }
        if !status.is_success() {
            return Err(SigenClientError::Http {
                status: status.as_u16(),
                message: body,
            });
        }

        let envelope: Envelope = serde_json::from_str(&body)?;
        match envelope.code {
            CODE_OK => Ok(envelope.into_data().unwrap_or(Value::Null)),
            CODE_RATE_LIMITED => Err(SigenClientError::RateLimited),
            CODE_ACCESS_RESTRICTED => Err(SigenClientError::AccessRestricted),
            code => Err(SigenClientError::Api {
                code,
                message: envelope.msg.unwrap_or_default(),
            }),
        }
    }

    fn decode<T: DeserializeOwned>(value: Value) -> Result<T, SigenClientError> {
        serde_path_to_error::deserialize(value).map_err(SigenClientError::Decode)
    }

    pub fn get_systems(&self) -> Result<Vec<SystemInfo>, SigenClientError> {
        let data = self.get_data("/openapi/system", &[])?;
        Self::decode(data)
    }

    /// Device list entries arrive as individually JSON-encoded strings inside
    /// the `data` array; plain objects are accepted too.
    pub fn get_devices(&self, system_id: &SystemId) -> Result<Vec<DeviceInfo>, SigenClientError> {
        let data = self.get_data(&format!("/openapi/system/{}/devices", system_id), &[])?;
        let entries: Vec<Value> = Self::decode(data)?;
        entries
            .into_iter()
            .map(|entry| match entry {
                Value::String(s) => serde_json::from_str(&s).map_err(SigenClientError::Json),
                other => Self::decode(other),
            })
            .collect()
    }

    pub fn get_system_summary(&self, system_id: &SystemId) -> Result<Value, SigenClientError> {
        self.get_data(&format!("/openapi/systems/{}/summary", system_id), &[])
    }

    pub fn get_energy_flow(&self, system_id: &SystemId) -> Result<Value, SigenClientError> {
        self.get_data(&format!("/openapi/systems/{}/energyFlow", system_id), &[])
    }

    pub fn get_device_realtime_info(
        &self,
        system_id: &SystemId,
        serial_number: &SerialNumber,
    ) -> Result<Value, SigenClientError> {
        self.get_data(
            &format!("/openapi/systems/{}/devices/{}/realtimeInfo", system_id, serial_number),
            &[],
        )
    }

    /// All samples for one calendar day at the 5-minute level. An empty day
    /// (system offline, no readings) is a successful empty vec.
    pub fn get_day_history(&self, system_id: &SystemId, date: NaiveDate) -> Result<Vec<RawSample>, SigenClientError> {
        let query = [
            ("date", date.format("%Y-%m-%d").to_string()),
            ("level", "day".to_string()),
        ];
        let data = self.get_data(&format!("/openapi/systems/{}/history", system_id), &query)?;
        if data.is_null() {
            return Ok(Vec::new());
        }
        let history: DayHistory = Self::decode(data)?;
        Ok(history.into_samples())
    }
}

impl DayHistorySource for SigenClient {
    fn fetch_day_history(&self, system_id: &SystemId, date: NaiveDate) -> Result<Vec<RawSample>, SigenClientError> {
        self.get_day_history(system_id, date)
    }
}
