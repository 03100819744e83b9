//! Read-only exporters: a zip archive of the store tree and a plaintext key dump.
//!
//! Neither takes account locks. Every store file is replaced by atomic rename, so each
//! file read here is a complete version of that file.

use crate::{errors::WalletError, fsutil, paths::LOCK_SUFFIX, wallet::WalletStore};
use eyre::Context as _;
use std::{
    fmt::Write as _,
    fs,
    io::{Cursor, Write as _},
    path::{Path, PathBuf},
};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

/// Placeholder column in dump lines, kept for a future per-key timestamp.
pub const DUMP_RESERVED: &str = "RESERVED";

/// Validate `destination` and return it with its parent directory canonicalized.
fn check_destination(destination: &Path) -> eyre::Result<PathBuf> {
    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let (Some(file_name), true) = (destination.file_name(), parent.is_dir()) else {
        tracing::warn!(
            destination = %destination.display(),
            "export destination parent does not exist"
        );
        return Err(WalletError::InvalidPath.into());
    };
    let parent = parent
        .canonicalize()
        .with_context(|| format!("resolve {}", parent.display()))?;
    Ok(parent.join(file_name))
}

/// Store files to archive, relative to the root with `/` separators, sorted.
/// Lock files, dot files (temp files, the store lock) and `skip` are left out.
fn archive_members(root: &Path, skip: &Path) -> eyre::Result<Vec<(String, PathBuf)>> {
    let root = root
        .canonicalize()
        .with_context(|| format!("resolve {}", root.display()))?;
    let mut out = vec![];
    let mut stack = vec![(String::new(), root)];
    while let Some((prefix, dir)) = stack.pop() {
        for entry in fs::read_dir(&dir).with_context(|| format!("read dir {}", dir.display()))? {
            let entry = entry.context("read dir entry")?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                tracing::warn!(path = %entry.path().display(), "skipping non-utf8 path in backup");
                continue;
            };
            if fsutil::is_temp_name(&name) || name.ends_with(LOCK_SUFFIX) || entry.path() == skip {
                continue;
            }
            let rel = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };
            let ft = entry.file_type().context("stat dir entry")?;
            if ft.is_dir() {
                stack.push((rel, entry.path()));
            } else if ft.is_file() {
                out.push((rel, entry.path()));
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Write a deflated zip of every store file to `destination`.
///
/// Entries are sorted and carry a fixed timestamp, so equal store contents give an
/// identical archive.
pub fn backup(store: &WalletStore, destination: &Path) -> eyre::Result<()> {
    let target = check_destination(destination)?;
    let members = archive_members(store.root(), &target)?;

    let opts = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(fsutil::MODE_FILE_PRIVATE);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut archived = 0_usize;
    for (name, path) in members {
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(eyre::Report::new(e).wrap_err(format!("read {}", path.display())))
            }
        };
        zip.start_file(name.as_str(), opts)
            .with_context(|| format!("start zip entry {name}"))?;
        zip.write_all(&bytes)
            .with_context(|| format!("write zip entry {name}"))?;
        archived += 1;
    }
    let buf = zip.finish().context("finish zip")?.into_inner();
    fsutil::write_atomic_restrictive(destination, &buf, fsutil::MODE_FILE_PRIVATE)
        .with_context(|| format!("write backup {}", destination.display()))?;
    tracing::info!(
        destination = %destination.display(),
        files = archived,
        bytes = buf.len(),
        "wallet backup written"
    );
    Ok(())
}

/// Write a text dump of every key to `destination`.
///
/// Private keys are written as stored: sealed strings for an encrypted wallet.
/// Unreadable account records are skipped.
pub fn dump(store: &WalletStore, destination: &Path, version_label: &str) -> eyre::Result<()> {
    check_destination(destination)?;
    let encrypted = store.is_encrypted()?;

    let mut out = String::new();
    writeln!(out, "# Wallet dump created by {version_label}")?;
    writeln!(
        out,
        "# * Created on {}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
    )?;
    writeln!(
        out,
        "# * Wallet is {}",
        if encrypted { "Encrypted" } else { "Unencrypted" }
    )?;

    let mut lines = 0_usize;
    for (name, record) in store.files().enumerate()? {
        for entry in &record.addresses {
            let key: String = entry
                .private_key
                .chars()
                .filter(|c| !matches!(c, '\n' | '\r'))
                .collect();
            writeln!(
                out,
                "{key} {DUMP_RESERVED} account={name} addr={}",
                entry.address
            )?;
            lines += 1;
        }
    }

    fsutil::write_atomic_restrictive(destination, out.as_bytes(), fsutil::MODE_FILE_PRIVATE)
        .with_context(|| format!("write dump {}", destination.display()))?;
    tracing::info!(
        destination = %destination.display(),
        keys = lines,
        encrypted,
        "wallet dump written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        keys::SequentialKeys,
        wallet::{StoreOptions, WalletStore},
    };
    use eyre::ContextCompat as _;
    use std::{io::Read as _, sync::Arc};

    fn store(root: &Path) -> eyre::Result<WalletStore> {
        WalletStore::open_with(
            root,
            StoreOptions {
                keys: Arc::new(SequentialKeys::default()),
                ..StoreOptions::default()
            },
        )
    }

    fn populated(root: &Path) -> eyre::Result<WalletStore> {
        let s = store(root)?;
        s.get_default_address("")?;
        s.create_address("alice")?;
        s.create_address("alice")?;
        s.create_address("Bob+2")?;
        Ok(s)
    }

    #[test]
    fn dump_lists_every_key_with_header() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let s = populated(&dir.path().join("w"))?;
        let dest = dir.path().join("dump.txt");
        s.dump(&dest, "shardwallet test")?;

        let text = fs::read_to_string(&dest)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# Wallet dump created by shardwallet test");
        assert!(lines[1].starts_with("# * Created on "));
        assert!(lines[1].ends_with('Z'));
        assert_eq!(lines[2], "# * Wallet is Unencrypted");
        assert_eq!(
            &lines[3..],
            &[
                "priv-0000 RESERVED account= addr=addr-0000",
                "priv-0003 RESERVED account=Bob+2 addr=addr-0003",
                "priv-0001 RESERVED account=alice addr=addr-0001",
                "priv-0002 RESERVED account=alice addr=addr-0002",
            ]
        );
        Ok(())
    }

    #[test]
    fn dump_skips_corrupt_records_and_strips_newlines() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("w");
        let s = store(&root)?;
        s.create_address("alice")?;
        fs::write(root.join("al").join("alex.json"), b"{{{")?;
        fs::write(
            root.join("al").join("alan.json"),
            br#"{"encrypted":false,"addresses":[["a9","ab\ncd\r","p9"]]}"#,
        )?;

        let dest = dir.path().join("dump.txt");
        s.dump(&dest, "v")?;
        let text = fs::read_to_string(&dest)?;
        let body: Vec<&str> = text.lines().skip(3).collect();
        assert_eq!(
            body,
            vec![
                "abcd RESERVED account=alan addr=a9",
                "priv-0000 RESERVED account=alice addr=addr-0000",
            ]
        );
        Ok(())
    }

    #[test]
    fn dump_into_missing_dir_is_invalid_path_and_writes_nothing() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let s = populated(&dir.path().join("w"))?;
        let dest = dir.path().join("missing").join("dump.txt");
        let err = s.dump(&dest, "v").err().context("must fail")?;
        assert_eq!(WalletError::of(&err), Some(&WalletError::InvalidPath));
        assert!(!dest.exists());
        assert!(!dir.path().join("missing").exists());

        let err = s
            .backup(&dir.path().join("nope").join("b.zip"))
            .err()
            .context("must fail")?;
        assert_eq!(WalletError::of(&err), Some(&WalletError::InvalidPath));
        Ok(())
    }

    #[test]
    fn backup_archives_store_files_deterministically() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let s = populated(&dir.path().join("w"))?;
        let one = dir.path().join("one.zip");
        let two = dir.path().join("two.zip");
        s.backup(&one)?;
        s.backup(&two)?;
        assert_eq!(fs::read(&one)?, fs::read(&two)?);

        let mut archive = zip::ZipArchive::new(fs::File::open(&one)?)?;
        let names: Vec<String> = archive.file_names().map(str::to_owned).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(
            sorted,
            vec![
                "Bo/Bob+2.json",
                "al/alice.json",
                "default.json",
                "index.json",
                "rindex.json",
            ]
        );

        let mut body = String::new();
        archive.by_name("al/alice.json")?.read_to_string(&mut body)?;
        let on_disk = fs::read_to_string(dir.path().join("w").join("al").join("alice.json"))?;
        assert_eq!(body, on_disk);
        Ok(())
    }

    #[test]
    fn backup_inside_the_store_does_not_archive_itself() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("w");
        let s = populated(&root)?;
        let dest = root.join("backup.zip");
        s.backup(&dest)?;
        let first = fs::read(&dest)?;
        s.backup(&dest)?;
        assert_eq!(fs::read(&dest)?, first);

        let archive = zip::ZipArchive::new(fs::File::open(&dest)?)?;
        assert!(archive.file_names().all(|n| n != "backup.zip"));
        assert_eq!(archive.len(), 5);
        Ok(())
    }
}
