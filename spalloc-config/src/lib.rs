//! Configuration schema for the `compat.*` keys listed in spec §6.
//!
//! Follows `nativelink-config`'s pattern of serde-derived structs with
//! `shellexpand`-aware string/numeric fields so values like `"$PORT"` or
//! `"~/spalloc"` resolve against the environment at load time.

use std::borrow::Cow;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_port() -> u16 {
    22244
}

fn default_thread_pool_size() -> usize {
    0
}

fn default_service_user() -> String {
    "spalloc".to_string()
}

fn default_notify_wait_time() -> Duration {
    Duration::from_secs(60)
}

fn default_keepalive() -> Duration {
    Duration::from_secs(60)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_true() -> bool {
    true
}

/// Expand `$VAR`/`~` references in a config string at deserialize time.
pub fn convert_string_with_shellexpand<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match shellexpand::env(&raw) {
        Ok(expanded) => Ok(expanded.into_owned()),
        Err(_) => Ok(raw),
    }
}

fn convert_optional_string_with_shellexpand<'de, D>(
    deserializer: D,
) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(|raw| match shellexpand::env(&raw) {
        Ok(expanded) => expanded.into_owned(),
        Err(_) => raw,
    }))
}

/// The `compat` section of the service's configuration file.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CompatConfig {
    /// `compat.enable` — whether to run the compat server at all.
    #[serde(default = "default_true")]
    pub enable: bool,

    /// `compat.port` — TCP port to listen on. Default 22244.
    #[serde(default = "default_port")]
    pub port: u16,

    /// `compat.host` — bind address. `None` means all interfaces.
    #[serde(default, deserialize_with = "convert_optional_host")]
    pub host: Option<IpAddr>,

    /// `compat.threadPoolSize` — if > 0, a fixed-size executor of that
    /// size is used; `0` (the default) means an unbounded/cached pool.
    #[serde(default = "default_thread_pool_size")]
    pub thread_pool_size: usize,

    /// `compat.serviceUser` — principal name used for jobs this service
    /// creates on behalf of clients.
    #[serde(default = "default_service_user", deserialize_with = "convert_string_with_shellexpand")]
    pub service_user: String,

    /// `compat.notifyWaitTime` — notifier long-poll interval. Default 60s.
    #[serde(default = "default_notify_wait_time", with = "humantime_serde")]
    pub notify_wait_time: Duration,

    /// `compat.defaultKeepalive` — keepalive used when a client omits one.
    #[serde(default = "default_keepalive", with = "humantime_serde")]
    pub default_keepalive: Duration,

    /// Service shutdown grace period (§4.7 `SHUTDOWN_TIMEOUT`).
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Socket receive timeout used for the cancellation pulse (§4.5, §5).
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,
}

impl Default for CompatConfig {
    fn default() -> Self {
        CompatConfig {
            enable: default_true(),
            port: default_port(),
            host: None,
            thread_pool_size: default_thread_pool_size(),
            service_user: default_service_user(),
            notify_wait_time: default_notify_wait_time(),
            default_keepalive: default_keepalive(),
            shutdown_timeout: default_shutdown_timeout(),
            read_timeout: default_read_timeout(),
        }
    }
}

fn convert_optional_host<'de, D>(deserializer: D) -> Result<Option<IpAddr>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = convert_optional_string_with_shellexpand(deserializer)?;
    match raw {
        None => Ok(None),
        Some(raw) if raw.is_empty() => Ok(None),
        Some(raw) => raw
            .parse::<IpAddr>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

impl CompatConfig {
    /// Parse a JSON5 configuration document (the format `nativelink-config`
    /// uses for its own config files).
    pub fn from_json5(contents: &str) -> Result<Self, serde_json5::Error> {
        serde_json5::from_str(contents)
    }

    pub fn bind_addr(&self) -> Cow<'static, str> {
        let host = self
            .host
            .map(|h| h.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        Cow::Owned(format!("{host}:{port}", port = self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = CompatConfig::default();
        assert!(cfg.enable);
        assert_eq!(cfg.port, 22244);
        assert_eq!(cfg.host, None);
        assert_eq!(cfg.notify_wait_time, Duration::from_secs(60));
        assert_eq!(cfg.default_keepalive, Duration::from_secs(60));
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(3));
        assert_eq!(cfg.read_timeout, Duration::from_secs(2));
    }

    #[test]
    fn parses_json5_with_partial_overrides() {
        let cfg: CompatConfig = CompatConfig::from_json5(
            r#"{
                port: 22555,
                serviceUser: "spalloc",
                notifyWaitTime: "30s",
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.port, 22555);
        assert_eq!(cfg.notify_wait_time, Duration::from_secs(30));
    }
}
