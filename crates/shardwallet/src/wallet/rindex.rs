use super::lock::FileLock;
use crate::{account::AccountName, errors::WalletError, fsutil};
use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{PoisonError, RwLock},
};

pub type AddressMap = BTreeMap<String, String>;

/// In-memory `address -> account` map backed by `rindex.json`.
///
/// Account files are authoritative; this is a cache that can always be rebuilt from
/// them. Writers must hold the store lock, which the `&FileLock` parameters witness.
/// The map is a `BTreeMap`, so the persisted document is byte-stable for equal contents.
#[derive(Debug)]
pub struct ReverseIndex {
    path: PathBuf,
    map: RwLock<AddressMap>,
}

impl ReverseIndex {
    /// Load `rindex.json`. A missing or unparseable file yields an empty index, to be
    /// repaired by a rebuild.
    pub fn load(path: PathBuf) -> Self {
        let map = read_disk(&path).unwrap_or_default();
        Self {
            path,
            map: RwLock::new(map),
        }
    }

    pub fn lookup(&self, address: &str) -> Result<String, WalletError> {
        if let Some(account) = self.read().get(address) {
            return Ok(account.clone());
        }
        // Another instance may have registered it, or rebuilt the index, since we loaded.
        if let Some(disk) = read_disk(&self.path) {
            let found = disk.get(address).cloned();
            *self.write() = disk;
            if let Some(account) = found {
                return Ok(account);
            }
        }
        tracing::debug!(address, "address not in reverse index");
        Err(WalletError::UnknownAddress)
    }

    /// Record `address -> account` and persist the whole index.
    pub fn register(
        &self,
        address: &str,
        account: &AccountName,
        _store_lock: &FileLock,
    ) -> eyre::Result<()> {
        // The disk copy is the latest state any instance wrote under the store lock.
        let mut snapshot = self.current();
        snapshot.insert(address.to_owned(), account.as_str().to_owned());
        fsutil::write_json_atomic(&self.path, &snapshot)?;
        tracing::debug!(
            address,
            account = %account,
            entries = snapshot.len(),
            "registered address"
        );
        *self.write() = snapshot;
        Ok(())
    }

    /// Replace the index with `scan`, the result of a full account scan, and persist it.
    ///
    /// Entries on disk that the scan lacks were registered after it started; they are
    /// kept only if `still_owned(address, account)` confirms them. Returns the entry count.
    pub fn rebuild(
        &self,
        mut scan: AddressMap,
        still_owned: impl Fn(&str, &str) -> bool,
        _store_lock: &FileLock,
    ) -> eyre::Result<usize> {
        for (address, account) in self.current() {
            if !scan.contains_key(&address) && still_owned(&address, &account) {
                scan.insert(address, account);
            }
        }
        fsutil::write_json_atomic(&self.path, &scan)?;
        let total = scan.len();
        *self.write() = scan;
        Ok(total)
    }

    /// Entries currently on disk, or the in-memory view if the file is unreadable.
    pub fn current(&self) -> AddressMap {
        read_disk(&self.path).unwrap_or_else(|| self.read().clone())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, AddressMap> {
        self.map.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, AddressMap> {
        self.map.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_disk(path: &std::path::Path) -> Option<AddressMap> {
    if !path.exists() {
        return None;
    }
    match fsutil::read_json(path) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %format!("{e:#}"),
                "reverse index unreadable; run reindex"
            );
            None
        }
    }
}
