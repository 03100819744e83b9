use eyre::Context as _;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Upper bound for any single lock acquisition (store-wide or per-account).
    pub lock_timeout_ms: u64,
    /// First backoff step between lock attempts.
    pub lock_retry_base_ms: u64,
    /// Backoff cap between lock attempts.
    pub lock_retry_max_ms: u64,
    /// Number of store operations the async service runs at once.
    pub max_concurrent_ops: usize,
    /// Free-form label written into the dump header.
    pub dump_label: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 10_000,
            lock_retry_base_ms: 5,
            lock_retry_max_ms: 200,
            max_concurrent_ops: 8,
            dump_label: format!("shardwallet {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl StoreConfig {
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_backoff(&self) -> crate::retry::BackoffConfig {
        crate::retry::BackoffConfig {
            base_delay: Duration::from_millis(self.lock_retry_base_ms),
            max_delay: Duration::from_millis(self.lock_retry_max_ms.max(self.lock_retry_base_ms)),
            jitter_max_ms: self.lock_retry_base_ms,
        }
    }
}

/// Apply environment variable overrides on top of whatever was loaded from disk.
fn apply_env_overrides(cfg: &mut StoreConfig) {
    fn env_num<T: std::str::FromStr>(var: &str) -> Option<T> {
        std::env::var(var).ok().and_then(|v| v.trim().parse().ok())
    }

    if let Some(n) = env_num::<u64>("SHARDWALLET_LOCK_TIMEOUT_MS") {
        cfg.lock_timeout_ms = n;
    }
    if let Some(n) = env_num::<usize>("SHARDWALLET_MAX_CONCURRENT_OPS") {
        if n > 0 {
            cfg.max_concurrent_ops = n;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(paths: &crate::paths::AppPaths) -> Self {
        Self {
            path: paths.config_file(),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<StoreConfig> {
        if !self.path.exists() {
            let mut cfg = StoreConfig::default();
            self.save(&cfg)?;
            apply_env_overrides(&mut cfg);
            return Ok(cfg);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let mut cfg: StoreConfig = toml::from_str(&s).context("parse config.toml")?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &StoreConfig) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_atomic_restrictive(
            &self.path,
            s.as_bytes(),
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write config.toml")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_falls_back_to_defaults() -> eyre::Result<()> {
        let cfg: StoreConfig = toml::from_str("lock_timeout_ms = 250\n")?;
        assert_eq!(cfg.lock_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.max_concurrent_ops, StoreConfig::default().max_concurrent_ops);
        Ok(())
    }

    #[test]
    fn first_load_writes_the_default_file() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = crate::paths::AppPaths {
            config_dir: dir.path().join("cfg"),
            data_dir: dir.path().join("data"),
            log_file: dir.path().join("data").join("log.jsonl"),
        };
        let store = ConfigStore::new(&paths);
        store.load_or_init_default()?;
        assert!(paths.config_file().exists());
        let again = store.load_or_init_default()?;
        assert_eq!(again.lock_retry_max_ms, StoreConfig::default().lock_retry_max_ms);
        Ok(())
    }

    #[test]
    fn backoff_cap_never_drops_below_base() {
        let cfg = StoreConfig {
            lock_retry_base_ms: 50,
            lock_retry_max_ms: 10,
            ..StoreConfig::default()
        };
        let b = cfg.lock_backoff();
        assert_eq!(b.max_delay, Duration::from_millis(50));
    }
}
