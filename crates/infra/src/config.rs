//! Process configuration loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default dequeue timeout, in seconds.
pub const DEFAULT_QUEUE_TIMEOUT_SECS: f64 = 5.0;
pub const DEFAULT_WEB_PORT: u16 = 80;
pub const DEFAULT_DATABASE_PATH: &str = "./database.sqlite";
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime configuration shared by the orchestrator and its workers.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Upper bound of a single dequeue wait in the consumer loop.
    pub queue_timeout: Duration,
    pub web_port: u16,
    pub bind_host: String,
    pub database_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_timeout: Duration::from_secs_f64(DEFAULT_QUEUE_TIMEOUT_SECS),
            web_port: DEFAULT_WEB_PORT,
            bind_host: DEFAULT_BIND_HOST.to_string(),
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
        }
    }
}

impl Config {
    /// Load `.env` (if present) and read configuration from the environment.
    ///
    /// Recognised keys: `QUEUE_TIMEOUT`, `WEB_PORT`, `BIND_HOST`, `DATABASE_PATH`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup (env, map, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(raw) = lookup("QUEUE_TIMEOUT") {
            cfg.queue_timeout = parse_timeout("QUEUE_TIMEOUT", &raw)?;
        }

        if let Some(raw) = lookup("WEB_PORT") {
            cfg.web_port = raw.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                key: "WEB_PORT",
                value: raw.clone(),
                reason: e.to_string(),
            })?;
        }

        if let Some(raw) = lookup("BIND_HOST") {
            if !raw.trim().is_empty() {
                cfg.bind_host = raw.trim().to_string();
            }
        }

        if let Some(raw) = lookup("DATABASE_PATH") {
            if !raw.trim().is_empty() {
                cfg.database_path = PathBuf::from(raw.trim());
            }
        }

        Ok(cfg)
    }

    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    pub fn with_web_port(mut self, port: u16) -> Self {
        self.web_port = port;
        self
    }

    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    /// `host:port` the API binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.web_port)
    }
}

fn parse_timeout(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let secs: f64 = raw.trim().parse().map_err(|_| invalid("not a number"))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(invalid("must be a positive number of seconds"));
    }

    Duration::try_from_secs_f64(secs).map_err(|e| invalid(&e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.queue_timeout, Duration::from_secs(5));
        assert_eq!(cfg.web_port, 80);
        assert_eq!(cfg.database_path, PathBuf::from("./database.sqlite"));
        assert_eq!(cfg.bind_addr(), "0.0.0.0:80");
    }

    #[test]
    fn reads_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("QUEUE_TIMEOUT", "0.25"),
            ("WEB_PORT", "8080"),
            ("DATABASE_PATH", "/tmp/charges.sqlite"),
        ]))
        .unwrap();

        assert_eq!(cfg.queue_timeout, Duration::from_millis(250));
        assert_eq!(cfg.web_port, 8080);
        assert_eq!(cfg.database_path, PathBuf::from("/tmp/charges.sqlite"));
    }

    #[test]
    fn rejects_bad_timeout() {
        for bad in ["abc", "0", "-1", "inf", "NaN"] {
            let err = Config::from_lookup(lookup(&[("QUEUE_TIMEOUT", bad)])).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { key: "QUEUE_TIMEOUT", .. }), "{bad}");
        }
    }

    #[test]
    fn rejects_bad_port() {
        let err = Config::from_lookup(lookup(&[("WEB_PORT", "70000")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "WEB_PORT", .. }));
    }
}
