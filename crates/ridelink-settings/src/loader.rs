//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RidelinkSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `RIDELINK_*` environment variable overrides
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::RidelinkSettings;

/// Resolve the path to the settings file (`~/.ridelink/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".ridelink").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RidelinkSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// validation are errors.
pub fn load_settings_from_path(path: &Path) -> Result<RidelinkSettings> {
    load_with(path, &|name| std::env::var(name).ok())
}

fn load_with(path: &Path, env: &dyn Fn(&str) -> Option<String>) -> Result<RidelinkSettings> {
    let defaults = serde_json::to_value(RidelinkSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RidelinkSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `RIDELINK_*` environment variable overrides.
///
/// Invalid values are logged and ignored (file/default value stays).
pub fn apply_env_overrides(settings: &mut RidelinkSettings) {
    apply_overrides(settings, &|name| std::env::var(name).ok());
}

fn apply_overrides(settings: &mut RidelinkSettings, env: &dyn Fn(&str) -> Option<String>) {
    let read = EnvReader { env };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read.string("RIDELINK_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read.u64("RIDELINK_PORT", 0, u64::from(u16::MAX)) {
        settings.server.port = u16::try_from(v).unwrap_or(settings.server.port);
    }
    if let Some(v) = read.u64("RIDELINK_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
        settings.server.heartbeat_interval_secs = v;
        settings.server.heartbeat_timeout_secs = settings.server.heartbeat_timeout_secs.max(v);
    }
    if let Some(v) = read.usize("RIDELINK_MAX_CONNECTIONS", 1, 10_000) {
        settings.server.max_connections = v;
    }

    // ── Upstream ────────────────────────────────────────────────────
    if let Some(v) = read.string("RIDELINK_NOTIFICATION_URL") {
        settings.upstream.notification.url = v;
    }
    if let Some(v) = read.string("RIDELINK_LOCATION_URL") {
        settings.upstream.location.url = v;
    }
    if let Some(v) = read.u64("RIDELINK_RECONNECT_DELAY_MS", 1, 3_600_000) {
        settings.upstream.notification.reconnect.base_delay_ms = v;
        settings.upstream.location.reconnect.base_delay_ms = v;
    }
    if let Some(v) = read.u64("RIDELINK_MAX_RECONNECT_ATTEMPTS", 0, u64::from(u32::MAX)) {
        // 0 means unlimited
        let max = u32::try_from(v).ok().filter(|n| *n > 0);
        settings.upstream.notification.reconnect.max_attempts = max;
        settings.upstream.location.reconnect.max_attempts = max;
    }
    if let Some(v) = read.bool("RIDELINK_NOTIFICATION_RECONNECT") {
        settings.upstream.notification.reconnect.enabled = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read.string("RIDELINK_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read.bool("RIDELINK_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `usize` within an inclusive range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<'a> {
    env: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvReader<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.env)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.env)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.env)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.env)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
