use std::env;
use std::fmt;
use std::str::FromStr;

use chrono::Duration;

use crate::error::AppError;
use crate::models::opportunity::SelectionPolicy;

const MAX_OPPORTUNITY_TTL_SECS: i64 = 7 * 24 * 3_600;
const MAX_RELEASE_RETRY_BASE_SECS: i64 = 3_600;
const MAX_RELEASE_TIMEOUT_MS: u64 = 10 * 60 * 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassignmentPolicy {
    Manual,
    Automatic,
}

impl FromStr for ReassignmentPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "automatic" | "auto" => Ok(Self::Automatic),
            other => Err(format!("unknown reassignment policy {other:?}, expected manual/automatic")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiVendorPolicy {
    MultiStop,
    /// Multi-vendor orders are refused; the shop splits them into one
    /// order per vendor before they reach assignment.
    RejectMultiVendor,
}

impl FromStr for MultiVendorPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "multi_stop" => Ok(Self::MultiStop),
            "reject_multi_vendor" => Ok(Self::RejectMultiVendor),
            other => Err(format!("unknown multi-vendor policy {other:?}, expected multi_stop/reject_multi_vendor")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other:?}, expected compact/json")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Compact => write!(f, "compact"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub opportunity_ttl_secs: i64,
    pub sweep_interval_secs: u64,
    pub nearby_radius_km: f64,
    pub high_value_min_completed: u32,
    pub high_value_limit: usize,
    pub reassignment_policy: ReassignmentPolicy,
    pub max_assignment_rounds: u32,
    pub multi_vendor_policy: MultiVendorPolicy,
    pub auto_in_transit_on_accept: bool,
    pub auto_assign_on_payment: bool,
    pub default_policy: SelectionPolicy,
    pub release_retry_base_secs: i64,
    pub release_timeout_ms: u64,
    pub assignment_queue_size: usize,
    pub event_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            opportunity_ttl_secs: 600,
            sweep_interval_secs: 15,
            nearby_radius_km: 3.0,
            high_value_min_completed: 20,
            high_value_limit: 5,
            reassignment_policy: ReassignmentPolicy::Manual,
            max_assignment_rounds: 3,
            multi_vendor_policy: MultiVendorPolicy::MultiStop,
            auto_in_transit_on_accept: true,
            auto_assign_on_payment: false,
            default_policy: SelectionPolicy::AllEligible,
            release_retry_base_secs: 30,
            release_timeout_ms: 30_000,
            assignment_queue_size: 1024,
            event_buffer_size: 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Config::default();

        let default_policy = match env::var("DEFAULT_POLICY") {
            Ok(raw) => SelectionPolicy::from_name(&raw)
                .ok_or_else(|| AppError::Internal(format!("invalid DEFAULT_POLICY: {raw}")))?,
            Err(_) => defaults.default_policy,
        };

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: parse_or_default("LOG_FORMAT", defaults.log_format)?,
            opportunity_ttl_secs: parse_or_default(
                "OPPORTUNITY_TTL_SECS",
                defaults.opportunity_ttl_secs,
            )?,
            sweep_interval_secs: parse_or_default("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
            nearby_radius_km: parse_or_default("NEARBY_RADIUS_KM", defaults.nearby_radius_km)?,
            high_value_min_completed: parse_or_default(
                "HIGH_VALUE_MIN_COMPLETED",
                defaults.high_value_min_completed,
            )?,
            high_value_limit: parse_or_default("HIGH_VALUE_LIMIT", defaults.high_value_limit)?,
            reassignment_policy: parse_or_default(
                "REASSIGNMENT_POLICY",
                defaults.reassignment_policy,
            )?,
            max_assignment_rounds: parse_or_default(
                "MAX_ASSIGNMENT_ROUNDS",
                defaults.max_assignment_rounds,
            )?,
            multi_vendor_policy: parse_or_default(
                "MULTI_VENDOR_POLICY",
                defaults.multi_vendor_policy,
            )?,
            auto_in_transit_on_accept: parse_or_default(
                "AUTO_IN_TRANSIT_ON_ACCEPT",
                defaults.auto_in_transit_on_accept,
            )?,
            auto_assign_on_payment: parse_or_default(
                "AUTO_ASSIGN_ON_PAYMENT",
                defaults.auto_assign_on_payment,
            )?,
            default_policy,
            release_retry_base_secs: parse_or_default(
                "RELEASE_RETRY_BASE_SECS",
                defaults.release_retry_base_secs,
            )?,
            release_timeout_ms: parse_or_default("RELEASE_TIMEOUT_MS", defaults.release_timeout_ms)?,
            assignment_queue_size: parse_or_default(
                "ASSIGNMENT_QUEUE_SIZE",
                defaults.assignment_queue_size,
            )?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(1..=MAX_OPPORTUNITY_TTL_SECS).contains(&self.opportunity_ttl_secs) {
            return Err(AppError::Internal(format!(
                "OPPORTUNITY_TTL_SECS must be between 1 and {MAX_OPPORTUNITY_TTL_SECS}"
            )));
        }
        if !(1..=MAX_RELEASE_RETRY_BASE_SECS).contains(&self.release_retry_base_secs) {
            return Err(AppError::Internal(format!(
                "RELEASE_RETRY_BASE_SECS must be between 1 and {MAX_RELEASE_RETRY_BASE_SECS}"
            )));
        }
        if !(1..=MAX_RELEASE_TIMEOUT_MS).contains(&self.release_timeout_ms) {
            return Err(AppError::Internal(format!(
                "RELEASE_TIMEOUT_MS must be between 1 and {MAX_RELEASE_TIMEOUT_MS}"
            )));
        }
        if self.sweep_interval_secs == 0 {
            return Err(AppError::Internal(
                "SWEEP_INTERVAL_SECS must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn release_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.release_timeout_ms)
    }

    /// Twice the gateway timeout, so a live attempt finishes before reclaim.
    pub fn release_lease(&self) -> Duration {
        Duration::milliseconds(self.release_timeout_ms.saturating_mul(2).min(i64::MAX as u64) as i64)
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
