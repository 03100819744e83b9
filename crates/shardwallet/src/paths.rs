use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::{Path, PathBuf};

pub const INDEX_FILE: &str = "index.json";
pub const RINDEX_FILE: &str = "rindex.json";
pub const DEFAULT_ACCOUNT_FILE: &str = "default.json";
pub const STORE_LOCK_FILE: &str = ".wallet.lock";
pub const LOCK_SUFFIX: &str = ".lock";

/// Fixed locations inside one wallet store directory.
#[derive(Debug, Clone)]
pub struct StorePaths {
    root: PathBuf,
}

impl StorePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn rindex(&self) -> PathBuf {
        self.root.join(RINDEX_FILE)
    }

    pub fn default_account(&self) -> PathBuf {
        self.root.join(DEFAULT_ACCOUNT_FILE)
    }

    pub fn store_lock(&self) -> PathBuf {
        self.root.join(STORE_LOCK_FILE)
    }

    /// Sidecar lock file guarding one account record.
    pub fn account_lock(account_file: &Path) -> PathBuf {
        let mut s = account_file.as_os_str().to_owned();
        s.push(LOCK_SUFFIX);
        PathBuf::from(s)
    }
}

/// Process-level locations used by the command-line binary.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl AppPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("SHARDWALLET_DATA_DIR"),
            std::env::var("SHARDWALLET_CONFIG_DIR"),
        ) {
            let data_dir = PathBuf::from(data_dir);
            let config_dir = PathBuf::from(config_dir);
            let log_file = data_dir.join("shardwallet.log.jsonl");
            return Ok(Self {
                config_dir,
                data_dir,
                log_file,
            });
        }

        let proj =
            ProjectDirs::from("", "", "shardwallet").context("failed to resolve project dirs")?;
        let config_dir = proj.config_dir().to_path_buf();
        let data_dir = proj.data_dir().to_path_buf();
        let log_file = data_dir.join("shardwallet.log.jsonl");

        Ok(Self {
            config_dir,
            data_dir,
            log_file,
        })
    }

    pub fn default_wallet_dir(&self) -> PathBuf {
        self.data_dir.join("wallet")
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn ensure_private_dirs(&self) -> eyre::Result<()> {
        crate::fsutil::ensure_private_dir(&self.config_dir)?;
        crate::fsutil::ensure_private_dir(&self.data_dir)?;
        Ok(())
    }
}
