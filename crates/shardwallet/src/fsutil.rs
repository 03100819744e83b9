use eyre::Context as _;
use rand::Rng as _;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write as _,
    path::{Component, Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _};

pub const MODE_DIR_PRIVATE: u32 = 0o700;
pub const MODE_FILE_PRIVATE: u32 = 0o600;

fn is_symlink(p: &Path) -> eyre::Result<bool> {
    let md = fs::symlink_metadata(p).with_context(|| format!("stat {}", p.display()))?;
    Ok(md.file_type().is_symlink())
}

pub fn ensure_private_dir(dir: &Path) -> eyre::Result<()> {
    if dir.exists() {
        if is_symlink(dir)? {
            eyre::bail!("refusing to use symlinked directory: {}", dir.display());
        }
        let md = fs::metadata(dir).with_context(|| format!("stat {}", dir.display()))?;
        if !md.is_dir() {
            eyre::bail!("expected directory at {}", dir.display());
        }
    } else {
        fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    }

    #[cfg(unix)]
    {
        let md = fs::metadata(dir).with_context(|| format!("stat {}", dir.display()))?;
        let mode = md.permissions().mode();
        if (mode & 0o077) != 0 {
            fs::set_permissions(dir, fs::Permissions::from_mode(MODE_DIR_PRIVATE))
                .with_context(|| format!("chmod {:o} {}", MODE_DIR_PRIVATE, dir.display()))?;
        }
    }

    Ok(())
}

/// Join `rel` under `root`, refusing anything that could land outside it.
///
/// Every component must be a plain name without separators; `..`, `.`, roots and
/// drive prefixes are rejected.
pub fn safe_join(root: &Path, rel: &[&str]) -> eyre::Result<PathBuf> {
    let mut out = root.to_path_buf();
    for part in rel {
        let mut comps = Path::new(part).components();
        match (comps.next(), comps.next()) {
            (Some(Component::Normal(c)), None) if c == *part && !part.contains(['/', '\\']) => {
                out.push(c);
            }
            _ => eyre::bail!("refusing unsafe path component {part:?}"),
        }
    }
    Ok(out)
}

/// Temp files live next to their target and start with a dot, so walkers can skip them.
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with('.')
}

fn tmp_path_for(parent: &Path, final_name: &Path) -> PathBuf {
    let base = final_name
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let mut rand_bytes = [0_u8; 8];
    rand::rng().fill_bytes(&mut rand_bytes);
    let suffix = hex::encode(rand_bytes);
    parent.join(format!(".{base}.tmp.{suffix}"))
}

/// Write `bytes` to `path` via temp file + fsync + rename, so readers only ever see a
/// complete old or complete new file.
pub fn write_atomic_restrictive(path: &Path, bytes: &[u8], mode: u32) -> eyre::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| eyre::eyre!("missing parent for {}", path.display()))?;

    if path.exists() && is_symlink(path)? {
        eyre::bail!("refusing to write to symlink: {}", path.display());
    }

    let tmp = tmp_path_for(parent, path);

    let mut f = {
        #[cfg(unix)]
        {
            OpenOptions::new()
                .create_new(true)
                .write(true)
                .mode(mode)
                .open(&tmp)
                .with_context(|| format!("open temp {}", tmp.display()))?
        }
        #[cfg(not(unix))]
        {
            let _ = mode;
            OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&tmp)
                .with_context(|| format!("open temp {}", tmp.display()))?
        }
    };

    let written = f
        .write_all(bytes)
        .and_then(|()| f.flush())
        .and_then(|()| f.sync_all());
    drop(f);
    if let Err(e) = written {
        drop(fs::remove_file(&tmp));
        return Err(eyre::Report::new(e).wrap_err(format!("write {}", tmp.display())));
    }

    // `rename` is atomic on Unix. On Windows, this can fail if the destination exists.
    #[cfg(windows)]
    {
        if path.exists() {
            fs::remove_file(path).with_context(|| format!("remove existing {}", path.display()))?;
        }
    }

    if let Err(e) = fs::rename(&tmp, path) {
        drop(fs::remove_file(&tmp));
        return Err(eyre::Report::new(e).wrap_err(format!(
            "rename {} -> {}",
            tmp.display(),
            path.display()
        )));
    }

    Ok(())
}

pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, v: &T) -> eyre::Result<()> {
    let s = serde_json::to_vec(v).context("serialize json")?;
    write_atomic_restrictive(path, &s, MODE_FILE_PRIVATE)
        .with_context(|| format!("write {}", path.display()))
}

/// Read a JSON document. A UTF-8 BOM is tolerated, since some editors add one.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> eyre::Result<T> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes);
    let v = serde_json::from_slice(body).with_context(|| format!("parse {}", path.display()))?;
    Ok(v)
}
