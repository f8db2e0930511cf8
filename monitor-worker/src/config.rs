//! Monitor configuration, loaded from environment variables with typed
//! validation at startup — a missing or mistyped key is a configuration
//! fatal error, aborting before any store connection is opened.

use crate::error::MonitorError;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub pickup_check_distance_trigger: f64,
    pub pickup_check_distance_window: f64,
    pub pickup_post_seconds: f64,
    pub drop_check_distance: f64,
    pub drop_pre_seconds: f64,
    pub rfid_wait_timeout: u64,
    pub activate_queries: bool,
    pub database_host: String,
    pub database_name: String,
    pub database_user: String,
    pub database_password: String,
    /// Gates the NOE_loc salvage branch in drop validation (§4.4/§9).
    pub enable_noe_salvage: bool,
    /// The "Not-OK elsewhere" sink location id.
    pub noe_loc: i64,
}

impl MonitorConfig {
    /// Loads configuration from the process environment. Every field is
    /// required except `enable_noe_salvage` (defaults false) and `noe_loc`
    /// (defaults 79, matching the source's hard-coded value).
    pub fn from_env() -> Result<Self, MonitorError> {
        Ok(Self {
            pickup_check_distance_trigger: required_f64("PICKUP_CHECK_DISTANCE_TRIGGER")?,
            pickup_check_distance_window: required_f64("PICKUP_CHECK_DISTANCE_WINDOW")?,
            pickup_post_seconds: required_f64("PICKUP_POST_SECONDS")?,
            drop_check_distance: required_f64("DROP_CHECK_DISTANCE")?,
            drop_pre_seconds: required_f64("DROP_PRE_SECONDS")?,
            rfid_wait_timeout: required_u64("RFID_WAIT_TIMEOUT")?,
            activate_queries: required_bool("ACTIVATE_QUERIES")?,
            database_host: required_str("DATABASE_HOST")?,
            database_name: required_str("DATABASE_NAME")?,
            database_user: required_str("DATABASE_USER")?,
            database_password: required_str("DATABASE_PASSWORD")?,
            enable_noe_salvage: optional_bool("ENABLE_NOE_SALVAGE", false)?,
            noe_loc: optional_i64("NOE_LOC", 79)?,
        })
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}/{}",
            self.database_user, self.database_password, self.database_host, self.database_name
        )
    }
}

fn required_str(key: &str) -> Result<String, MonitorError> {
    std::env::var(key).map_err(|_| MonitorError::Config(format!("missing required parameter: {key}")))
}

fn required_f64(key: &str) -> Result<f64, MonitorError> {
    let raw = required_str(key)?;
    raw.parse::<f64>()
        .map_err(|_| MonitorError::Config(format!("invalid value for parameter {key}: {raw}")))
}

fn required_u64(key: &str) -> Result<u64, MonitorError> {
    let raw = required_str(key)?;
    raw.parse::<u64>()
        .map_err(|_| MonitorError::Config(format!("invalid value for parameter {key}: {raw}")))
}

fn required_bool(key: &str) -> Result<bool, MonitorError> {
    let raw = required_str(key)?;
    parse_bool(&raw).ok_or_else(|| MonitorError::Config(format!("invalid value for parameter {key}: {raw}")))
}

fn optional_bool(key: &str, default: bool) -> Result<bool, MonitorError> {
    match std::env::var(key) {
        Ok(raw) => parse_bool(&raw).ok_or_else(|| MonitorError::Config(format!("invalid value for parameter {key}: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn optional_i64(key: &str, default: i64) -> Result<i64, MonitorError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<i64>()
            .map_err(|_| MonitorError::Config(format!("invalid value for parameter {key}: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// CLI arguments for the worker binary: which job/truck to monitor,
/// mirroring the original's `sys.argv` positional parsing.
#[derive(Debug, clap::Parser)]
#[command(name = "monitor-worker", about = "Per-job clamp truck task monitor")]
pub struct WorkerArgs {
    /// Job ID to monitor.
    pub job_id: i64,
    /// Truck ID assigned to this job.
    pub truck_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_forms() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("false"), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("yes"), None);
    }
}
