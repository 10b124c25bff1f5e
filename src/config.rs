//! Configuration types.
//!
//! Built once at startup from environment variables and passed by value
//! into the daemon. Nothing reads the environment after that.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Credentials for the remote status store.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL of the project, without trailing slash (e.g. `https://xyz.supabase.co`).
    pub url: String,
    pub api_key: SecretString,
}

impl RemoteConfig {
    /// Validate a URL/key pair.
    ///
    /// The URL must be an absolute http(s) URL and the key non-empty.
    pub fn new(url: &str, api_key: &str) -> Result<Self, ConfigError> {
        let parsed = reqwest::Url::parse(url.trim()).map_err(|e| ConfigError::InvalidValue {
            key: "SUPABASE_URL".to_string(),
            message: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                key: "SUPABASE_URL".to_string(),
                message: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        if api_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "SUPABASE_KEY".to_string(),
                message: "key is empty".to_string(),
            });
        }

        Ok(Self {
            url: parsed.as_str().trim_end_matches('/').to_string(),
            api_key: SecretString::from(api_key.trim().to_string()),
        })
    }

    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory of per-session `*.jsonl` event logs.
    pub sessions_dir: PathBuf,
    /// Job list file (`jobs.json`).
    pub jobs_file: PathBuf,
    /// Pause between cycles.
    pub interval: Duration,
    /// Upper bound on a single remote call.
    pub call_timeout: Duration,
    /// Records reconciled in parallel within one batch.
    pub max_concurrency: usize,
    /// Fail startup if the sessions directory is missing.
    pub require_sources: bool,
    /// Remote store credentials. `None` means degraded (local) mode.
    pub remote: Option<RemoteConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let openclaw = home_dir().join(".openclaw");
        Self {
            sessions_dir: openclaw.join("agents/main/sessions"),
            jobs_file: openclaw.join("cron/jobs.json"),
            interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            require_sources: false,
            remote: None,
        }
    }
}

impl SyncConfig {
    /// Parse the process environment and run the startup checks.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(|key| std::env::var(key).ok())
    }

    /// [`SyncConfig::from_lookup`] followed by [`SyncConfig::validate`].
    pub fn load_from<F>(lookup: F) -> crate::error::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::from_lookup(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// Malformed numbers are fatal. Malformed remote credentials are not:
    /// they are logged and the config falls back to local mode.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let sessions_dir = lookup("OPENCLAW_SESSIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.sessions_dir);
        let jobs_file = lookup("OPENCLAW_CRON_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.jobs_file);

        let interval_secs: u64 =
            parse_var(&lookup, "SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL_SECS)?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SYNC_INTERVAL_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let timeout_secs: u64 =
            parse_var(&lookup, "SYNC_CALL_TIMEOUT_SECS", DEFAULT_CALL_TIMEOUT_SECS)?;
        let max_concurrency: usize =
            parse_var(&lookup, "SYNC_MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY)?;
        let require_sources: bool = parse_var(&lookup, "CLAW_SYNC_REQUIRE_SOURCES", false)?;

        let remote = match (lookup("SUPABASE_URL"), lookup("SUPABASE_KEY")) {
            (None, None) => None,
            (Some(url), Some(key)) => match RemoteConfig::new(&url, &key) {
                Ok(remote) => Some(remote),
                Err(e) => {
                    tracing::warn!("Ignoring remote credentials, running in local mode: {e}");
                    None
                }
            },
            (Some(_), None) | (None, Some(_)) => {
                tracing::warn!(
                    "Only one of SUPABASE_URL / SUPABASE_KEY is set, running in local mode"
                );
                None
            }
        };

        Ok(Self {
            sessions_dir,
            jobs_file,
            interval: Duration::from_secs(interval_secs),
            call_timeout: Duration::from_secs(timeout_secs),
            max_concurrency: max_concurrency.max(1),
            require_sources,
            remote,
        })
    }

    /// Startup checks that must hold before the first cycle.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.require_sources && !self.sessions_dir.is_dir() {
            return Err(ConfigError::InvalidPath {
                key: "OPENCLAW_SESSIONS_DIR".to_string(),
                path: self.sessions_dir.clone(),
            });
        }
        Ok(())
    }

    pub fn is_degraded(&self) -> bool {
        self.remote.is_none()
    }
}

/// Directory for rolling log files, if file logging is enabled.
///
/// Read separately from [`SyncConfig`] because logging is set up before
/// the config is loaded.
pub fn log_dir_from_env() -> Option<PathBuf> {
    std::env::var("CLAW_SYNC_LOG_DIR")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            })
        }
        _ => Ok(default),
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = SyncConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.call_timeout, Duration::from_secs(10));
        assert_eq!(config.max_concurrency, 4);
        assert!(config.is_degraded());
        assert!(config.sessions_dir.ends_with(".openclaw/agents/main/sessions"));
        assert!(config.jobs_file.ends_with(".openclaw/cron/jobs.json"));
    }

    #[test]
    fn overrides_from_env() {
        let config = SyncConfig::from_lookup(lookup_from(&[
            ("OPENCLAW_SESSIONS_DIR", "/tmp/sessions"),
            ("OPENCLAW_CRON_FILE", "/tmp/jobs.json"),
            ("SYNC_INTERVAL_SECS", "5"),
            ("SYNC_MAX_CONCURRENCY", "0"),
        ]))
        .unwrap();
        assert_eq!(config.sessions_dir, PathBuf::from("/tmp/sessions"));
        assert_eq!(config.jobs_file, PathBuf::from("/tmp/jobs.json"));
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.max_concurrency, 1);
    }

    #[test]
    fn bad_interval_is_fatal() {
        let err = SyncConfig::from_lookup(lookup_from(&[("SYNC_INTERVAL_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SYNC_INTERVAL_SECS"));

        let err =
            SyncConfig::from_lookup(lookup_from(&[("SYNC_INTERVAL_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn load_surfaces_startup_failures() {
        let err = SyncConfig::load_from(lookup_from(&[("SYNC_MAX_CONCURRENCY", "many")]))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Config(ConfigError::InvalidValue { ref key, .. })
                if key == "SYNC_MAX_CONCURRENCY"
        ));

        let err = SyncConfig::load_from(lookup_from(&[
            ("OPENCLAW_SESSIONS_DIR", "/no/such/sessions"),
            ("CLAW_SYNC_REQUIRE_SOURCES", "true"),
        ]))
        .unwrap_err();
        assert!(matches!(err, crate::error::Error::Config(ConfigError::InvalidPath { .. })));
        assert!(err.to_string().starts_with("Configuration error: "));

        let config = SyncConfig::load_from(lookup_from(&[])).unwrap();
        assert!(config.is_degraded());
    }

    #[test]
    fn valid_credentials_enable_remote() {
        let config = SyncConfig::from_lookup(lookup_from(&[
            ("SUPABASE_URL", "https://example.supabase.co/"),
            ("SUPABASE_KEY", "secret"),
        ]))
        .unwrap();
        let remote = config.remote.expect("remote configured");
        assert_eq!(remote.url, "https://example.supabase.co");
        assert_eq!(remote.api_key(), "secret");
    }

    #[test]
    fn malformed_credentials_degrade() {
        let config = SyncConfig::from_lookup(lookup_from(&[
            ("SUPABASE_URL", "not a url"),
            ("SUPABASE_KEY", "secret"),
        ]))
        .unwrap();
        assert!(config.is_degraded());

        let config = SyncConfig::from_lookup(lookup_from(&[
            ("SUPABASE_URL", "ftp://example.com"),
            ("SUPABASE_KEY", "secret"),
        ]))
        .unwrap();
        assert!(config.is_degraded());

        let config =
            SyncConfig::from_lookup(lookup_from(&[("SUPABASE_URL", "https://example.com")]))
                .unwrap();
        assert!(config.is_degraded());
    }

    #[test]
    fn api_key_not_in_debug_output() {
        let remote = RemoteConfig::new("https://example.com", "super-secret").unwrap();
        assert!(!format!("{remote:?}").contains("super-secret"));
    }

    #[test]
    fn require_sources_rejects_missing_dir() {
        let config = SyncConfig {
            sessions_dir: PathBuf::from("/definitely/not/here"),
            require_sources: true,
            ..SyncConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPath { .. })
        ));

        let lenient = SyncConfig {
            require_sources: false,
            ..config
        };
        assert!(lenient.validate().is_ok());
    }
}
