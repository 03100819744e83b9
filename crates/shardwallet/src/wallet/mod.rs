//! The wallet store: account records on disk, the primary index and the reverse index.
//!
//! Locking protocol:
//! - every read-modify-write of one account holds that account's lock;
//! - every write of `index.json` / `rindex.json` holds the store lock;
//! - the store lock is only ever taken while holding an account lock, never the reverse.
//!
//! Account files are the source of truth. The reverse index is derived and can always
//! be rebuilt with [`WalletStore::reindex`].

pub mod files;
pub mod lock;
pub mod rindex;

use crate::{
    account::{AccountName, AccountRecord, AddressEntry},
    cipher::{self, AesGcmCipher, Cipher, UnlockKey},
    config::StoreConfig,
    errors::WalletError,
    fsutil,
    keys::{Ed25519KeyProvider, KeyProvider},
    paths::StorePaths,
};
use base64::Engine as _;
use eyre::Context as _;
use files::AccountFiles;
use lock::{FileLock, Locker};
use rindex::{AddressMap, ReverseIndex};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

pub const STORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Balance reported by `list_accounts`; balances come from an external service.
pub const UNKNOWN_BALANCE: i64 = -1;

/// Contents of `index.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryIndex {
    pub version: String,
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase_salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase_check: Option<String>,
}

impl Default for PrimaryIndex {
    fn default() -> Self {
        Self {
            version: STORE_VERSION.to_owned(),
            encrypted: false,
            passphrase_salt: None,
            passphrase_check: None,
        }
    }
}

impl PrimaryIndex {
    fn salt(&self) -> eyre::Result<[u8; 16]> {
        let s = self
            .passphrase_salt
            .as_deref()
            .ok_or_else(|| eyre::eyre!("encrypted wallet has no passphrase salt"))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .context("decode passphrase_salt")?;
        <[u8; 16]>::try_from(bytes.as_slice())
            .map_err(|e| eyre::eyre!("passphrase_salt must decode to 16 bytes: {e}"))
    }
}

/// Collaborators and tuning for [`WalletStore::open_with`].
pub struct StoreOptions {
    pub config: StoreConfig,
    pub keys: Arc<dyn KeyProvider>,
    pub cipher: Arc<dyn Cipher>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            config: StoreConfig::default(),
            keys: Arc::new(Ed25519KeyProvider),
            cipher: Arc::new(AesGcmCipher),
        }
    }
}

pub struct WalletStore {
    paths: StorePaths,
    files: AccountFiles,
    rindex: ReverseIndex,
    locker: Locker,
    keys: Arc<dyn KeyProvider>,
    cipher: Arc<dyn Cipher>,
    unlocked: Mutex<Option<UnlockKey>>,
    config: StoreConfig,
}

impl std::fmt::Debug for WalletStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletStore")
            .field("root", &self.paths.root())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WalletStore {
    pub fn open(path: impl Into<PathBuf>) -> eyre::Result<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    /// Open (creating if needed) the store at `path`. Existing content is never replaced.
    pub fn open_with(path: impl Into<PathBuf>, opts: StoreOptions) -> eyre::Result<Self> {
        let paths = StorePaths::new(path);
        if !paths.root().exists() {
            tracing::info!(root = %paths.root().display(), "wallet dir does not exist, creating");
        }
        fsutil::ensure_private_dir(paths.root())?;

        let locker = Locker::new(opts.config.lock_timeout(), opts.config.lock_backoff());
        {
            let _guard = locker.acquire(&paths.store_lock())?;
            if !paths.index().exists() {
                fsutil::write_json_atomic(&paths.index(), &PrimaryIndex::default())?;
            }
            if !paths.rindex().exists() {
                fsutil::write_json_atomic(&paths.rindex(), &AddressMap::new())?;
            }
        }
        let index: PrimaryIndex = fsutil::read_json(&paths.index())?;
        tracing::debug!(
            root = %paths.root().display(),
            version = %index.version,
            encrypted = index.encrypted,
            "opened wallet"
        );

        Ok(Self {
            files: AccountFiles::new(paths.clone()),
            rindex: ReverseIndex::load(paths.rindex()),
            paths,
            locker,
            keys: opts.keys,
            cipher: opts.cipher,
            unlocked: Mutex::new(None),
            config: opts.config,
        })
    }

    pub fn root(&self) -> &Path {
        self.paths.root()
    }

    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) const fn files(&self) -> &AccountFiles {
        &self.files
    }

    pub(crate) const fn reverse_index(&self) -> &ReverseIndex {
        &self.rindex
    }

    /// The primary index as currently on disk.
    pub fn index(&self) -> eyre::Result<PrimaryIndex> {
        fsutil::read_json(&self.paths.index())
    }

    fn save_index(&self, idx: &PrimaryIndex, _store_lock: &FileLock) -> eyre::Result<()> {
        fsutil::write_json_atomic(&self.paths.index(), idx).context("write wallet index")
    }

    fn store_lock(&self) -> eyre::Result<FileLock> {
        self.locker.acquire(&self.paths.store_lock())
    }

    /// The address of `account` that was created first, creating the account if needed.
    pub fn get_default_address(&self, account: &str) -> eyre::Result<String> {
        let name = AccountName::parse(account)?;
        let record = self.ensure_account(&name)?;
        record
            .addresses
            .first()
            .map(|e| e.address.clone())
            .ok_or_else(|| eyre::eyre!("account {name:?} has no addresses"))
    }

    pub fn resolve_account(&self, address: &str) -> eyre::Result<String> {
        Ok(self.rindex.lookup(address)?)
    }

    /// Every account with a placeholder balance.
    pub fn list_accounts(&self) -> eyre::Result<BTreeMap<String, i64>> {
        Ok(self
            .files
            .enumerate()?
            .map(|(name, _)| (name.as_str().to_owned(), UNKNOWN_BALANCE))
            .collect())
    }

    /// The stored key entry for `address` (private key sealed if the wallet is encrypted).
    ///
    /// Any inconsistency between the reverse index and the account files is reported as
    /// `UnknownAddress` and logged as drift.
    pub fn get_keys_for_address(&self, address: &str) -> eyre::Result<AddressEntry> {
        let account = self.rindex.lookup(address)?;
        let drift = |why: &str| -> eyre::Report {
            tracing::warn!(address, account = %account, why, "reverse index drift; run reindex");
            WalletError::UnknownAddress.into()
        };
        let Ok(name) = AccountName::parse(&account) else {
            return Err(drift("indexed account name is invalid"));
        };
        match self.files.load(&name) {
            Ok(Some(record)) => record
                .find(address)
                .cloned()
                .ok_or_else(|| drift("account does not own the address")),
            Ok(None) => Err(drift("account file missing")),
            Err(e) => Err(drift(&format!("account file unreadable: {e:#}"))),
        }
    }

    /// The plaintext private key for `address`. Sealed keys need the wallet unlocked.
    pub fn reveal_private_key(&self, address: &str) -> eyre::Result<String> {
        let entry = self.get_keys_for_address(address)?;
        if !cipher::is_sealed(&entry.private_key) {
            return Ok(entry.private_key);
        }
        self.with_unlock_key(|key| {
            self.cipher
                .open(key, address, &entry.private_key)
                .context("decrypt private key")
        })
    }

    /// Mint a new address in `account`. A fresh account is created with exactly one
    /// address, which is the one returned.
    pub fn create_address(&self, account: &str) -> eyre::Result<String> {
        let name = AccountName::parse(account)?;
        let _account_lock = self.files.lock(&name, &self.locker)?;

        let loaded = self.files.load_or_create(&name, || self.mint_entry())?;
        if let Some(first) = loaded.created {
            self.register(&first.address, &name)?;
            return Ok(first.address);
        }

        let mut record = loaded.record;
        let (entry, sealed) = self.mint_entry()?;
        let address = entry.address.clone();
        record.encrypted |= sealed;
        record.addresses.push(entry);
        // Account first: if the index write below fails, reindex recovers from this file.
        self.files.save(&name, &record)?;
        self.register(&address, &name)?;
        tracing::info!(
            account = %name,
            address = %address,
            total = record.addresses.len(),
            "created address"
        );
        Ok(address)
    }

    pub fn addresses_of(&self, account: &str) -> eyre::Result<Vec<String>> {
        let name = AccountName::parse(account)?;
        Ok(self.ensure_account(&name)?.address_list())
    }

    /// Rebuild the reverse index from the account files. Returns the number of entries.
    ///
    /// The scan runs without account locks. Entries registered while it ran are kept if
    /// their account really owns them; everything else comes from the scan.
    pub fn reindex(&self) -> eyre::Result<usize> {
        tracing::info!(root = %self.root().display(), "reindexing wallet");
        let mut fresh = AddressMap::new();
        for (name, record) in self.files.enumerate()? {
            for entry in record.addresses {
                fresh.insert(entry.address, name.as_str().to_owned());
            }
        }

        let guard = self.store_lock()?;
        let total = self
            .rindex
            .rebuild(fresh, |address, account| self.owns(account, address), &guard)?;
        tracing::info!(entries = total, "reindex complete");
        Ok(total)
    }

    pub fn backup(&self, destination: &Path) -> eyre::Result<()> {
        crate::export::backup(self, destination)
    }

    pub fn dump(&self, destination: &Path, version_label: &str) -> eyre::Result<()> {
        crate::export::dump(self, destination, version_label)
    }

    pub fn is_encrypted(&self) -> eyre::Result<bool> {
        Ok(self.index()?.encrypted)
    }

    pub fn is_locked(&self) -> eyre::Result<bool> {
        Ok(self.is_encrypted()? && self.unlock_slot().is_none())
    }

    /// Encrypt every private key with `passphrase`. The wallet is locked afterwards.
    ///
    /// The index is flipped first, then accounts are sealed one by one. An account that a
    /// concurrent caller is creating during the sealing pass may be missed; its first key
    /// was minted before the flip and stays in plaintext until [`Self::seal_plaintext_keys`]
    /// runs again. `doctor` reports such keys as `plaintext_keys`.
    pub fn encrypt_wallet(&self, passphrase: &SecretString) -> eyre::Result<usize> {
        let key = {
            let guard = self.store_lock()?;
            let mut idx = self.index()?;
            if idx.encrypted {
                return Err(WalletError::AlreadyEncrypted.into());
            }
            let salt = cipher::random_salt16();
            let key = self.cipher.derive_key(passphrase, &salt)?;
            idx.passphrase_salt = Some(base64::engine::general_purpose::STANDARD.encode(salt));
            idx.passphrase_check = Some(self.cipher.make_canary(&key)?);
            idx.encrypted = true;
            // From here on, new keys are minted sealed.
            self.save_index(&idx, &guard)?;
            key
        };
        *self.unlock_slot() = Some(key);
        let sealed = self.seal_plaintext_keys();
        self.lock();
        let sealed = sealed?;
        tracing::info!(sealed, "wallet encrypted");
        Ok(sealed)
    }

    /// Seal any private keys still stored in plaintext (left by an interrupted
    /// `encrypt_wallet`). Needs the wallet unlocked.
    pub fn seal_plaintext_keys(&self) -> eyre::Result<usize> {
        let mut sealed = 0_usize;
        let names: Vec<AccountName> = self.files.enumerate()?.map(|(n, _)| n).collect();
        for name in names {
            let _account_lock = self.files.lock(&name, &self.locker)?;
            let Some(mut record) = self.files.load(&name)? else {
                continue;
            };
            let mut changed = 0_usize;
            self.with_unlock_key(|key| {
                for entry in &mut record.addresses {
                    if !cipher::is_sealed(&entry.private_key) {
                        entry.private_key =
                            self.cipher.seal(key, &entry.address, &entry.private_key)?;
                        changed += 1;
                    }
                }
                Ok(())
            })?;
            if changed > 0 || !record.encrypted {
                record.encrypted = true;
                self.files.save(&name, &record)?;
            }
            sealed += changed;
        }
        Ok(sealed)
    }

    pub fn unlock(&self, passphrase: &SecretString) -> eyre::Result<()> {
        let idx = self.index()?;
        if !idx.encrypted {
            return Err(WalletError::NotEncrypted.into());
        }
        let key = self.cipher.derive_key(passphrase, &idx.salt()?)?;
        let verified = idx
            .passphrase_check
            .as_deref()
            .is_some_and(|c| self.cipher.check_canary(&key, c));
        if !verified {
            tracing::warn!("unlock rejected: wrong passphrase");
            return Err(WalletError::WrongPassphrase.into());
        }
        *self.unlock_slot() = Some(key);
        Ok(())
    }

    pub fn lock(&self) {
        *self.unlock_slot() = None;
    }

    fn unlock_slot(&self) -> std::sync::MutexGuard<'_, Option<UnlockKey>> {
        self.unlocked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_unlock_key<T>(
        &self,
        f: impl FnOnce(&UnlockKey) -> eyre::Result<T>,
    ) -> eyre::Result<T> {
        let slot = self.unlock_slot();
        let key = slot.as_ref().ok_or(WalletError::WalletLocked)?;
        f(key)
    }

    /// A fresh entry from the key provider, sealed when the wallet is encrypted.
    fn mint_entry(&self) -> eyre::Result<(AddressEntry, bool)> {
        let encrypted = self.is_encrypted()?;
        let mut entry = self.keys.generate().context("generate key pair")?;
        if encrypted {
            entry.private_key = self.with_unlock_key(|key| {
                self.cipher.seal(key, &entry.address, &entry.private_key)
            })?;
        }
        Ok((entry, encrypted))
    }

    /// Load `name`, creating it with one address if needed. Every account returned has
    /// at least one address.
    fn ensure_account(&self, name: &AccountName) -> eyre::Result<AccountRecord> {
        if let Some(record) = self.files.load(name)? {
            if !record.addresses.is_empty() {
                return Ok(record);
            }
        }

        let _account_lock = self.files.lock(name, &self.locker)?;
        let loaded = self.files.load_or_create(name, || self.mint_entry())?;
        if let Some(first) = &loaded.created {
            self.register(&first.address, name)?;
            return Ok(loaded.record);
        }

        let mut record = loaded.record;
        if record.addresses.is_empty() {
            tracing::warn!(account = %name, "account has no addresses; minting one");
            let (entry, sealed) = self.mint_entry()?;
            let address = entry.address.clone();
            record.encrypted |= sealed;
            record.addresses.push(entry);
            self.files.save(name, &record)?;
            self.register(&address, name)?;
        }
        Ok(record)
    }

    fn register(&self, address: &str, name: &AccountName) -> eyre::Result<()> {
        let res = self
            .store_lock()
            .and_then(|guard| self.rindex.register(address, name, &guard));
        if let Err(e) = &res {
            tracing::error!(
                address,
                account = %name,
                error = %format!("{e:#}"),
                "reverse index update failed; account file is authoritative, run reindex"
            );
        }
        res
    }

    fn owns(&self, account: &str, address: &str) -> bool {
        AccountName::parse(account)
            .ok()
            .and_then(|name| self.files.load(&name).ok().flatten())
            .is_some_and(|record| record.find(address).is_some())
    }
}
