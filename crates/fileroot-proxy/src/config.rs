//! Runtime configuration parsed from environment variables

use crate::error::{ProxyError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the file-root proxy
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub web_root: PathBuf,
    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    pub workers: usize,
    pub accept_queue: usize,
    pub sweep_interval: Duration,
    /// Also sweep on the accept loop after every connection
    pub sweep_on_accept: bool,
    /// Fail the response when the write-through to the cache fails
    pub cache_write_required: bool,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 9888,
            web_root: PathBuf::from("./htdocs"),
            cache_dir: PathBuf::from("./cache"),
            cache_ttl: Duration::from_secs(5 * 60),
            workers: 16,
            accept_queue: 64,
            sweep_interval: Duration::from_secs(60),
            sweep_on_accept: false,
            cache_write_required: false,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Parse configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from any variable source, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            port: parse_var(&lookup, "PORT")?.unwrap_or(defaults.port),
            web_root: lookup("WEB_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.web_root),
            cache_dir: lookup("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            cache_ttl: parse_var(&lookup, "CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            workers: parse_var(&lookup, "WORKERS")?.unwrap_or(defaults.workers),
            accept_queue: parse_var(&lookup, "ACCEPT_QUEUE")?.unwrap_or(defaults.accept_queue),
            sweep_interval: parse_var(&lookup, "SWEEP_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            sweep_on_accept: parse_var(&lookup, "SWEEP_ON_ACCEPT")?
                .unwrap_or(defaults.sweep_on_accept),
            cache_write_required: parse_var(&lookup, "CACHE_WRITE_REQUIRED")?
                .unwrap_or(defaults.cache_write_required),
            request_timeout: parse_var(&lookup, "REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        };

        if config.workers == 0 {
            return Err(ProxyError::Config("WORKERS must be at least 1".to_string()));
        }
        if config.accept_queue == 0 {
            return Err(ProxyError::Config(
                "ACCEPT_QUEUE must be at least 1".to_string(),
            ));
        }
        if config.sweep_interval.is_zero() {
            return Err(ProxyError::Config(
                "SWEEP_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ProxyError::Config(format!("{} has an invalid value: {:?}", name, raw))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.port, 9888);
        assert_eq!(config.web_root, PathBuf::from("./htdocs"));
        assert_eq!(config.cache_dir, PathBuf::from("./cache"));
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert!(!config.sweep_on_accept);
        assert!(!config.cache_write_required);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("PORT", "8080"),
            ("WEB_ROOT", "/srv/www"),
            ("CACHE_TTL_SECS", "3000"),
            ("WORKERS", "4"),
            ("SWEEP_ON_ACCEPT", "true"),
            ("CACHE_WRITE_REQUIRED", "true"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.web_root, PathBuf::from("/srv/www"));
        assert_eq!(config.cache_ttl, Duration::from_secs(3000));
        assert_eq!(config.workers, 4);
        assert!(config.sweep_on_accept);
        assert!(config.cache_write_required);
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let err = Config::from_lookup(lookup_from(&[("PORT", "not-a-port")])).unwrap_err();
        assert!(matches!(err, ProxyError::Config(ref msg) if msg.contains("PORT")));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = Config::from_lookup(lookup_from(&[("WORKERS", "0")])).unwrap_err();
        assert!(format!("{}", err).contains("WORKERS"));
    }
}
