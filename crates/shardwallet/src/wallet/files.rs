use super::lock::{FileLock, Locker};
use crate::{
    account::{AccountName, AccountRecord, AddressEntry},
    errors::WalletError,
    fsutil,
    paths::StorePaths,
};
use eyre::Context as _;
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

const ACCOUNT_EXT: &str = "json";

/// Result of [`AccountFiles::load_or_create`].
#[derive(Debug)]
pub struct Loaded {
    pub record: AccountRecord,
    /// Set when the record did not exist and was minted with this first address.
    pub created: Option<AddressEntry>,
}

/// Maps account names to sharded record files and reads/writes them.
///
/// Nothing here takes locks on its own; callers hold the account lock across any
/// read-modify-write.
#[derive(Debug, Clone)]
pub struct AccountFiles {
    paths: StorePaths,
}

impl AccountFiles {
    pub const fn new(paths: StorePaths) -> Self {
        Self { paths }
    }

    /// `(directory, file)` for an account: the root + `default.json` for the default
    /// account, `<shard>/<name>.json` otherwise.
    pub fn resolve_path(&self, name: &AccountName) -> eyre::Result<(PathBuf, PathBuf)> {
        let root = self.paths.root();
        let Some(shard) = name.shard() else {
            return Ok((root.to_path_buf(), self.paths.default_account()));
        };
        let dir = fsutil::safe_join(root, &[shard])?;
        let file = fsutil::safe_join(&dir, &[&format!("{name}.{ACCOUNT_EXT}")])?;
        Ok((dir, file))
    }

    pub fn lock(&self, name: &AccountName, locker: &Locker) -> eyre::Result<FileLock> {
        let (dir, file) = self.resolve_path(name)?;
        fsutil::ensure_private_dir(&dir)?;
        locker.acquire(&StorePaths::account_lock(&file))
    }

    /// Read an account record. `Ok(None)` when it does not exist; a file that exists but
    /// does not parse is `CorruptAccountRecord`.
    pub fn load(&self, name: &AccountName) -> eyre::Result<Option<AccountRecord>> {
        let (_, file) = self.resolve_path(name)?;
        read_record(&file)
    }

    /// Load the record, minting it with one fresh address if absent.
    pub fn load_or_create(
        &self,
        name: &AccountName,
        mint: impl FnOnce() -> eyre::Result<(AddressEntry, bool)>,
    ) -> eyre::Result<Loaded> {
        if let Some(record) = self.load(name)? {
            return Ok(Loaded {
                record,
                created: None,
            });
        }
        let (entry, encrypted) = mint()?;
        let record = AccountRecord::new(entry.clone(), encrypted);
        self.save(name, &record)?;
        tracing::info!(account = %name, address = %entry.address, "created account");
        Ok(Loaded {
            record,
            created: Some(entry),
        })
    }

    /// Replace the account file with `record`.
    pub fn save(&self, name: &AccountName, record: &AccountRecord) -> eyre::Result<()> {
        let (dir, file) = self.resolve_path(name)?;
        fsutil::ensure_private_dir(&dir)?;
        fsutil::write_json_atomic(&file, record)
            .with_context(|| format!("save account {name:?}"))?;
        tracing::debug!(account = %name, addresses = record.addresses.len(), "saved account");
        Ok(())
    }

    /// Every account file in the store, sorted by path. Records are parsed lazily and
    /// unreadable ones are skipped with a warning.
    pub fn enumerate(&self) -> eyre::Result<impl Iterator<Item = (AccountName, AccountRecord)>> {
        let candidates = self.candidates()?;
        Ok(candidates.into_iter().filter_map(|(name, path)| {
            match read_record(&path) {
                Ok(Some(record)) => Some((name, record)),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %format!("{e:#}"),
                        "skipping unreadable account file"
                    );
                    None
                }
            }
        }))
    }

    /// Account files on disk, without reading them.
    fn candidates(&self) -> eyre::Result<Vec<(AccountName, PathBuf)>> {
        let root = self.paths.root();
        let mut out = vec![];
        let default = self.paths.default_account();
        if default.is_file() {
            out.push((AccountName::default_account(), default));
        }

        let mut shards = vec![];
        for entry in fs::read_dir(root).with_context(|| format!("read dir {}", root.display()))? {
            let entry = entry.context("read dir entry")?;
            let Some(shard) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if fsutil::is_temp_name(&shard) {
                continue;
            }
            // Symlinked shards are not followed.
            if entry.file_type().is_ok_and(|t| t.is_dir()) {
                shards.push((shard, entry.path()));
            }
        }
        shards.sort();

        for (shard, dir) in shards {
            let mut files = vec![];
            let listing = match fs::read_dir(&dir) {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable shard");
                    continue;
                }
            };
            for entry in listing.filter_map(Result::ok) {
                let path = entry.path();
                if let Some(name) = account_name_for(&shard, &path) {
                    files.push((name, path));
                }
            }
            files.sort();
            out.extend(files);
        }
        Ok(out)
    }
}

/// Name of the account stored at `<shard>/<file>`, if the file is a well-formed record path.
fn account_name_for(shard: &str, path: &Path) -> Option<AccountName> {
    let file_name = path.file_name()?.to_str()?;
    if fsutil::is_temp_name(file_name) || path.extension()? != ACCOUNT_EXT {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    match AccountName::parse(stem) {
        Ok(name) if name.shard() == Some(shard) => Some(name),
        Ok(_) | Err(_) => {
            tracing::warn!(path = %path.display(), "ignoring misplaced or misnamed account file");
            None
        }
    }
}

fn read_record(file: &Path) -> eyre::Result<Option<AccountRecord>> {
    match fs::metadata(file) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(eyre::Report::new(e).wrap_err(format!("stat {}", file.display()))),
    }
    match fsutil::read_json::<AccountRecord>(file) {
        Ok(r) => Ok(Some(r)),
        Err(e) => {
            let vanished = e
                .downcast_ref::<std::io::Error>()
                .is_some_and(|io| io.kind() == ErrorKind::NotFound);
            if vanished {
                return Ok(None);
            }
            tracing::debug!(
                path = %file.display(),
                error = %format!("{e:#}"),
                "account file does not parse"
            );
            Err(
                eyre::Report::new(WalletError::CorruptAccountRecord(file.to_path_buf()))
                    .wrap_err(format!("{e:#}")),
            )
        }
    }
}
