use crate::{
    cipher,
    config::StoreConfig,
    paths::AppPaths,
    wallet::{rindex::AddressMap, WalletStore},
};
use eyre::Context as _;
use serde::Serialize;
use serde_json::json;
use std::{
    fs,
    path::{Path, PathBuf},
};

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

fn try_parse_config(path: &Path) -> eyre::Result<StoreConfig> {
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: StoreConfig = toml::from_str(&s).context("parse config.toml")?;
    Ok(cfg)
}

/// Consistency of the reverse index with the account files.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct IndexHealth {
    pub accounts: usize,
    pub addresses: usize,
    pub indexed: usize,
    /// Addresses in account files that the reverse index lacks or maps elsewhere.
    pub missing_from_index: Vec<String>,
    /// Reverse-index entries that no account file backs.
    pub orphaned: Vec<String>,
    /// Plaintext private keys left in an encrypted wallet.
    pub plaintext_keys: usize,
}

impl IndexHealth {
    pub fn is_consistent(&self) -> bool {
        self.missing_from_index.is_empty() && self.orphaned.is_empty()
    }
}

/// Compare the account files with the reverse index. Reads only; takes no locks.
pub fn inspect(store: &WalletStore) -> eyre::Result<IndexHealth> {
    let encrypted = store.is_encrypted()?;
    let indexed = store.reverse_index().current();

    let mut health = IndexHealth {
        indexed: indexed.len(),
        ..IndexHealth::default()
    };
    let mut owned = AddressMap::new();
    for (name, record) in store.files().enumerate()? {
        health.accounts += 1;
        for entry in record.addresses {
            health.addresses += 1;
            if encrypted && !cipher::is_sealed(&entry.private_key) {
                health.plaintext_keys += 1;
            }
            if indexed.get(&entry.address).map(String::as_str) != Some(name.as_str()) {
                health.missing_from_index.push(entry.address.clone());
            }
            owned.insert(entry.address, name.as_str().to_owned());
        }
    }
    health.orphaned = indexed
        .into_iter()
        .filter(|(address, account)| owned.get(address) != Some(account))
        .map(|(address, _)| address)
        .collect();
    health.missing_from_index.sort();

    if !health.is_consistent() {
        tracing::warn!(
            missing = health.missing_from_index.len(),
            orphaned = health.orphaned.len(),
            "reverse index out of sync with account files; run reindex"
        );
    }
    Ok(health)
}

#[derive(Debug)]
struct ConfigReport {
    path: PathBuf,
    exists: bool,
    parse_ok: bool,
    error: Option<String>,
}

#[derive(Debug)]
struct WalletReport {
    root: PathBuf,
    exists: bool,
    encrypted: Option<bool>,
    health: Option<IndexHealth>,
    error: Option<String>,
}

#[derive(Debug)]
struct DoctorReport {
    version: &'static str,
    paths: AppPaths,
    config: ConfigReport,
    wallet: WalletReport,
    env: serde_json::Value,
}

fn collect(paths: &AppPaths, wallet_root: &Path, cfg: &StoreConfig) -> DoctorReport {
    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    let (parse_ok, config_err) = if config_exists {
        match try_parse_config(&config_path) {
            Ok(_) => (true, None),
            Err(e) => (false, Some(format!("{e:#}"))),
        }
    } else {
        (false, None)
    };

    // Never create a wallet just to inspect it.
    let exists = wallet_root.join(crate::paths::INDEX_FILE).is_file();
    let inspected = exists.then(|| {
        WalletStore::open_with(
            wallet_root,
            crate::wallet::StoreOptions {
                config: cfg.clone(),
                ..crate::wallet::StoreOptions::default()
            },
        )
        .and_then(|store| Ok((store.is_encrypted()?, inspect(&store)?)))
    });
    let (encrypted, health, error) = match inspected {
        Some(Ok((enc, h))) => (Some(enc), Some(h), None),
        Some(Err(e)) => (None, None, Some(format!("{e:#}"))),
        None => (None, None, None),
    };

    let env = json!({
      "SHARDWALLET_CONFIG_DIR": env_opt("SHARDWALLET_CONFIG_DIR"),
      "SHARDWALLET_DATA_DIR": env_opt("SHARDWALLET_DATA_DIR"),
      "SHARDWALLET_LOCK_TIMEOUT_MS": env_opt("SHARDWALLET_LOCK_TIMEOUT_MS"),
      "SHARDWALLET_PASSPHRASE_set": std::env::var("SHARDWALLET_PASSPHRASE").is_ok(),
    });

    DoctorReport {
        version: env!("CARGO_PKG_VERSION"),
        paths: paths.clone(),
        config: ConfigReport {
            path: config_path,
            exists: config_exists,
            parse_ok,
            error: config_err,
        },
        wallet: WalletReport {
            root: wallet_root.to_path_buf(),
            exists,
            encrypted,
            health,
            error,
        },
        env,
    }
}

fn to_json(r: &DoctorReport) -> serde_json::Value {
    let ok = r.wallet.error.is_none()
        && r.wallet.health.as_ref().is_none_or(IndexHealth::is_consistent);
    let mut hints = vec![];
    if !r.wallet.exists {
        hints.push("The wallet is created on first use, e.g. `shardwallet address`.");
    }
    if r.wallet.health.as_ref().is_some_and(|h| !h.is_consistent()) {
        hints.push("The reverse index is out of sync; run `shardwallet reindex`.");
    }
    if r.wallet.health.as_ref().is_some_and(|h| h.plaintext_keys > 0) {
        hints.push("Some keys are still plaintext; run `shardwallet encrypt` to finish sealing.");
    }
    json!({
      "ok": ok,
      "version": r.version,
      "paths": {
        "config_dir": r.paths.config_dir,
        "data_dir": r.paths.data_dir,
        "log_file": r.paths.log_file,
      },
      "config": {
        "path": r.config.path,
        "exists": r.config.exists,
        "parse_ok": r.config.parse_ok,
        "error": r.config.error,
      },
      "wallet": {
        "root": r.wallet.root,
        "exists": r.wallet.exists,
        "encrypted": r.wallet.encrypted,
        "health": r.wallet.health,
        "error": r.wallet.error,
      },
      "env": r.env,
      "hints": hints,
    })
}

pub fn run(
    out: &mut impl std::io::Write,
    paths: &AppPaths,
    wallet_root: &Path,
    cfg: &StoreConfig,
) -> eyre::Result<()> {
    let report = collect(paths, wallet_root, cfg);
    let s = serde_json::to_string_pretty(&to_json(&report)).context("serialize doctor json")?;
    writeln!(out, "{s}").context("write doctor json")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{keys::SequentialKeys, wallet::StoreOptions};
    use std::sync::Arc;

    #[test]
    fn clean_store_is_consistent() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = WalletStore::open_with(
            dir.path(),
            StoreOptions {
                keys: Arc::new(SequentialKeys::default()),
                ..StoreOptions::default()
            },
        )?;
        store.get_default_address("")?;
        store.create_address("alice")?;
        store.create_address("alice")?;

        let h = inspect(&store)?;
        assert_eq!(h.accounts, 2);
        assert_eq!(h.addresses, 3);
        assert_eq!(h.indexed, 3);
        assert!(h.is_consistent());
        Ok(())
    }

    #[test]
    fn drift_is_reported_both_ways() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = WalletStore::open_with(
            dir.path(),
            StoreOptions {
                keys: Arc::new(SequentialKeys::default()),
                ..StoreOptions::default()
            },
        )?;
        let a = store.create_address("alice")?;
        let mut rindex = AddressMap::new();
        rindex.insert("ghost".to_owned(), "bob".to_owned());
        crate::fsutil::write_json_atomic(&dir.path().join("rindex.json"), &rindex)?;

        let h = inspect(&store)?;
        assert_eq!(h.missing_from_index, vec![a]);
        assert_eq!(h.orphaned, vec!["ghost".to_owned()]);

        store.reindex()?;
        assert!(inspect(&store)?.is_consistent());
        Ok(())
    }
}
