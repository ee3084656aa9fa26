//! Configuration management via environment variables
//!
//! Provides helper functions for reading environment variables with fallback
//! to deprecated variable names with warning logs, plus the typed
//! configuration structs used by the background services.

use std::path::PathBuf;
use std::time::Duration;

use crate::types::case::CasePriority;

/// Get an environment variable with fallback to a deprecated name
///
/// If the new variable name is set, returns its value.
/// If only the old (deprecated) variable name is set, returns its value
/// and logs a deprecation warning.
///
/// # Example
/// ```
/// use casevault::config::get_env_with_fallback;
///
/// let level = get_env_with_fallback("CASEVAULT_LOG_LEVEL", "LOG_LEVEL");
/// ```
pub fn get_env_with_fallback(new_name: &str, old_name: &str) -> Option<String> {
    if let Ok(val) = std::env::var(new_name) {
        return Some(val);
    }
    if let Ok(val) = std::env::var(old_name) {
        tracing::warn!(
            "Environment variable '{}' is deprecated, use '{}' instead",
            old_name,
            new_name
        );
        return Some(val);
    }
    None
}

/// Get an environment variable with fallback and default value
pub fn get_env_with_fallback_or(new_name: &str, old_name: &str, default: &str) -> String {
    get_env_with_fallback(new_name, old_name).unwrap_or_else(|| default.to_string())
}

/// Get an environment variable with fallback, parsing to a specific type
///
/// Returns `default` when neither variable is set or parsing fails.
pub fn get_env_with_fallback_parse<T: std::str::FromStr>(
    new_name: &str,
    old_name: &str,
    default: T,
) -> T {
    get_env_with_fallback(new_name, old_name)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Audit log configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditConfig {
    /// How often the writer flushes its buffer.
    pub flush_interval: Duration,
    /// Maximum number of buffered entries before the oldest is dropped.
    pub buffer_capacity: usize,
    /// How often the chain is verified in the background.
    pub verify_interval: Duration,
    /// Path of the archive database. Archiving is disabled when unset.
    pub archive_path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            buffer_capacity: 10_000,
            verify_interval: Duration::from_secs(24 * 60 * 60),
            archive_path: None,
        }
    }
}

impl AuditConfig {
    /// Load audit configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let flush_secs = get_env_with_fallback_parse(
            "CASEVAULT_AUDIT_FLUSH_INTERVAL_SECS",
            "AUDIT_FLUSH_INTERVAL_SECS",
            defaults.flush_interval.as_secs(),
        );
        let buffer_capacity = get_env_with_fallback_parse(
            "CASEVAULT_AUDIT_BUFFER_CAPACITY",
            "AUDIT_BUFFER_CAPACITY",
            defaults.buffer_capacity,
        );
        let verify_secs = get_env_with_fallback_parse(
            "CASEVAULT_AUDIT_VERIFY_INTERVAL_SECS",
            "AUDIT_VERIFY_INTERVAL_SECS",
            defaults.verify_interval.as_secs(),
        );
        let archive_path = get_env_with_fallback("CASEVAULT_AUDIT_ARCHIVE_PATH", "AUDIT_ARCHIVE_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Self {
            flush_interval: Duration::from_secs(flush_secs.max(1)),
            buffer_capacity: buffer_capacity.max(1),
            verify_interval: Duration::from_secs(verify_secs.max(1)),
            archive_path,
        }
    }
}

/// Retention scheduler configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// How often every enabled policy is executed.
    pub interval: Duration,
}

impl RetentionConfig {
    /// Load retention configuration from environment variables.
    pub fn from_env() -> Self {
        let secs = get_env_with_fallback_parse(
            "CASEVAULT_RETENTION_INTERVAL_SECS",
            "RETENTION_INTERVAL_SECS",
            24 * 60 * 60u64,
        );
        Self {
            interval: Duration::from_secs(secs.max(1)),
        }
    }
}

/// Service level configuration used by the compliance scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaConfig {
    /// Days allowed for a low priority case.
    pub low_days: i64,
    /// Days allowed for a medium priority case.
    pub medium_days: i64,
    /// Days allowed for a high priority case.
    pub high_days: i64,
    /// Days allowed for a critical priority case.
    pub critical_days: i64,
    /// Maximum number of days an evidence item may stay checked out.
    pub checkout_max_days: i64,
    /// How often the compliance scanner runs.
    pub scan_interval: Duration,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            low_days: 180,
            medium_days: 90,
            high_days: 30,
            critical_days: 7,
            checkout_max_days: 14,
            scan_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl SlaConfig {
    /// Load SLA configuration from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            low_days: get_env_with_fallback_parse("CASEVAULT_SLA_LOW_DAYS", "SLA_LOW_DAYS", d.low_days),
            medium_days: get_env_with_fallback_parse(
                "CASEVAULT_SLA_MEDIUM_DAYS",
                "SLA_MEDIUM_DAYS",
                d.medium_days,
            ),
            high_days: get_env_with_fallback_parse(
                "CASEVAULT_SLA_HIGH_DAYS",
                "SLA_HIGH_DAYS",
                d.high_days,
            ),
            critical_days: get_env_with_fallback_parse(
                "CASEVAULT_SLA_CRITICAL_DAYS",
                "SLA_CRITICAL_DAYS",
                d.critical_days,
            ),
            checkout_max_days: get_env_with_fallback_parse(
                "CASEVAULT_CHECKOUT_MAX_DAYS",
                "CHECKOUT_MAX_DAYS",
                d.checkout_max_days,
            ),
            scan_interval: Duration::from_secs(
                get_env_with_fallback_parse(
                    "CASEVAULT_COMPLIANCE_SCAN_INTERVAL_SECS",
                    "COMPLIANCE_SCAN_INTERVAL_SECS",
                    d.scan_interval.as_secs(),
                )
                .max(1),
            ),
        }
    }

    /// Days allowed for the given priority.
    pub fn allowed_days(&self, priority: CasePriority) -> i64 {
        match priority {
            CasePriority::Low => self.low_days,
            CasePriority::Medium => self.medium_days,
            CasePriority::High => self.high_days,
            CasePriority::Critical => self.critical_days,
        }
    }
}

/// Notification dispatcher configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationConfig {
    /// How often due notifications are polled.
    pub poll_interval: Duration,
    /// Attempts before a notification is marked failed.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub backoff_base: Duration,
    /// Timeout for a single webhook request.
    pub webhook_timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_attempts: 5,
            backoff_base: Duration::from_secs(60),
            webhook_timeout: Duration::from_secs(10),
        }
    }
}

impl NotificationConfig {
    /// Load notification configuration from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            poll_interval: Duration::from_secs(
                get_env_with_fallback_parse(
                    "CASEVAULT_NOTIFY_POLL_INTERVAL_SECS",
                    "NOTIFY_POLL_INTERVAL_SECS",
                    d.poll_interval.as_secs(),
                )
                .max(1),
            ),
            max_attempts: get_env_with_fallback_parse(
                "CASEVAULT_NOTIFY_MAX_ATTEMPTS",
                "NOTIFY_MAX_ATTEMPTS",
                d.max_attempts,
            )
            .max(1),
            backoff_base: Duration::from_secs(get_env_with_fallback_parse(
                "CASEVAULT_NOTIFY_BACKOFF_BASE_SECS",
                "NOTIFY_BACKOFF_BASE_SECS",
                d.backoff_base.as_secs(),
            )),
            webhook_timeout: Duration::from_secs(
                get_env_with_fallback_parse(
                    "CASEVAULT_NOTIFY_WEBHOOK_TIMEOUT_SECS",
                    "NOTIFY_WEBHOOK_TIMEOUT_SECS",
                    d.webhook_timeout.as_secs(),
                )
                .max(1),
            ),
        }
    }
}
