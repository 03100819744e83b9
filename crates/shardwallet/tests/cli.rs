use std::{path::Path, process::Command};

use eyre::Context as _;
use serde_json::Value;

struct Env {
    cfg_dir: tempfile::TempDir,
    data_dir: tempfile::TempDir,
}

impl Env {
    fn new() -> eyre::Result<Self> {
        Ok(Self {
            cfg_dir: tempfile::tempdir()?,
            data_dir: tempfile::tempdir()?,
        })
    }

    fn wallet(&self) -> std::path::PathBuf {
        self.data_dir.path().join("w")
    }

    fn cmd(&self, args: &[&str]) -> Command {
        let mut c = Command::new(assert_cmd::cargo::cargo_bin!("shardwallet"));
        c.env("SHARDWALLET_CONFIG_DIR", self.cfg_dir.path())
            .env("SHARDWALLET_DATA_DIR", self.data_dir.path())
            .env_remove("SHARDWALLET_PASSPHRASE")
            .env_remove("RUST_LOG")
            .arg("--wallet")
            .arg(self.wallet())
            .args(args);
        c
    }

    /// Run and parse stdout; returns (exit success, json).
    fn run(&self, args: &[&str]) -> eyre::Result<(bool, Value)> {
        self.run_cmd(self.cmd(args), args)
    }

    fn run_cmd(&self, mut c: Command, args: &[&str]) -> eyre::Result<(bool, Value)> {
        let out = c.output().with_context(|| format!("run shardwallet {args:?}"))?;
        let v: Value = serde_json::from_slice(&out.stdout).with_context(|| {
            format!(
                "parse stdout of {args:?}: stdout={} stderr={}",
                String::from_utf8_lossy(&out.stdout),
                String::from_utf8_lossy(&out.stderr)
            )
        })?;
        Ok((out.status.success(), v))
    }

    fn ok(&self, args: &[&str]) -> eyre::Result<Value> {
        let (success, v) = self.run(args)?;
        assert!(success, "{args:?} failed: {v}");
        Ok(v)
    }
}

fn error_code(v: &Value) -> Option<i64> {
    v.get("error")?.get("code")?.as_i64()
}

#[test]
fn paths_and_doctor_leave_the_wallet_unopened() -> eyre::Result<()> {
    let env = Env::new()?;
    let v = env.ok(&["paths"])?;
    assert_eq!(v["wallet"].as_str(), env.wallet().to_str());
    env.ok(&["doctor"])?;
    assert!(!env.wallet().exists());

    env.ok(&["list"])?;
    assert!(env.wallet().join("index.json").is_file());
    Ok(())
}

#[test]
fn doctor_runs_and_returns_valid_json() -> eyre::Result<()> {
    let env = Env::new()?;
    let v = env.ok(&["doctor"])?;
    assert_eq!(v.get("ok").and_then(Value::as_bool), Some(true));
    assert!(v.get("version").and_then(|x| x.as_str()).is_some());
    assert!(v.get("paths").and_then(|x| x.as_object()).is_some());
    assert_eq!(v["wallet"]["exists"].as_bool(), Some(false));
    assert!(!env.wallet().exists(), "doctor must not create the wallet");
    Ok(())
}

#[test]
fn accounts_and_addresses_roundtrip_through_the_cli() -> eyre::Result<()> {
    let env = Env::new()?;
    let default = env.ok(&["address"])?;
    let default = default.as_str().ok_or_else(|| eyre::eyre!("address must be a string"))?;
    assert_eq!(env.ok(&["address", "default"])?.as_str(), Some(default));

    let first = env.ok(&["new-address", "AbCdEf12"])?;
    assert!(env.wallet().join("Ab").join("AbCdEf12.json").is_file());
    let second = env.ok(&["new-address", "AbCdEf12"])?;
    assert_ne!(first, second);

    let addrs = env.ok(&["addresses", "AbCdEf12"])?;
    assert_eq!(addrs, Value::Array(vec![first.clone(), second]));

    let first = first.as_str().ok_or_else(|| eyre::eyre!("address must be a string"))?;
    assert_eq!(env.ok(&["account", first])?.as_str(), Some("AbCdEf12"));
    assert_eq!(env.ok(&["account", default])?.as_str(), Some(""));

    let list = env.ok(&["list"])?;
    assert_eq!(list, serde_json::json!({ "": -1, "AbCdEf12": -1 }));

    let key = env.ok(&["dump-privkey", first])?;
    assert_eq!(key.as_str().map(str::len), Some(64));
    Ok(())
}

#[test]
fn domain_errors_are_json_with_exit_status_one() -> eyre::Result<()> {
    let env = Env::new()?;
    let out = env.cmd(&["new-address", "../../etc"]).output()?;
    assert_eq!(out.status.code(), Some(1));
    let v: Value = serde_json::from_slice(&out.stdout)?;
    assert_eq!(error_code(&v), Some(-33001));

    let (success, v) = env.run(&["account", "no-such-address"])?;
    assert!(!success);
    assert_eq!(error_code(&v), Some(-33003));

    let missing = env.data_dir.path().join("nope").join("dump.txt");
    let missing = missing.to_str().ok_or_else(|| eyre::eyre!("utf-8 temp path"))?;
    let (success, v) = env.run(&["dump", missing])?;
    assert!(!success);
    assert_eq!(error_code(&v), Some(-33002));
    assert!(!Path::new(missing).exists());
    Ok(())
}

#[test]
fn reindex_restores_a_deleted_reverse_index() -> eyre::Result<()> {
    let env = Env::new()?;
    let addr = env.ok(&["new-address", "alice"])?;
    let addr = addr.as_str().ok_or_else(|| eyre::eyre!("address must be a string"))?.to_owned();
    std::fs::remove_file(env.wallet().join("rindex.json"))?;

    let v = env.ok(&["reindex"])?;
    assert_eq!(v["entries"].as_u64(), Some(1));
    assert_eq!(env.ok(&["account", &addr])?.as_str(), Some("alice"));
    Ok(())
}

#[test]
fn backup_and_dump_write_files() -> eyre::Result<()> {
    let env = Env::new()?;
    env.ok(&["new-address", "alice"])?;
    let zip = env.data_dir.path().join("b.zip");
    let dump = env.data_dir.path().join("d.txt");
    let zip_s = zip.to_str().ok_or_else(|| eyre::eyre!("utf-8 temp path"))?;
    let dump_s = dump.to_str().ok_or_else(|| eyre::eyre!("utf-8 temp path"))?;
    assert_eq!(env.ok(&["backup", zip_s])?, Value::Bool(true));
    assert_eq!(env.ok(&["dump", dump_s])?, Value::Bool(true));
    assert!(zip.is_file());
    let text = std::fs::read_to_string(&dump)?;
    assert!(text.starts_with("# Wallet dump created by shardwallet "));
    assert!(text.contains("# * Wallet is Unencrypted"));
    assert!(text.contains(" RESERVED account=alice addr="));
    Ok(())
}

#[test]
fn encrypted_wallet_needs_the_passphrase() -> eyre::Result<()> {
    let env = Env::new()?;
    let addr = env.ok(&["new-address", "alice"])?;
    let addr = addr.as_str().ok_or_else(|| eyre::eyre!("address must be a string"))?.to_owned();
    let plain = env.ok(&["dump-privkey", &addr])?;

    let mut c = env.cmd(&["encrypt"]);
    c.env("SHARDWALLET_PASSPHRASE", "correct horse");
    let (success, v) = env.run_cmd(c, &["encrypt"])?;
    assert!(success, "encrypt failed: {v}");
    assert_eq!(v["sealed"].as_u64(), Some(1));

    // No passphrase and no terminal: the command cannot unlock.
    let out = env.cmd(&["dump-privkey", &addr]).output()?;
    assert!(!out.status.success());

    let mut c = env.cmd(&["dump-privkey", &addr]);
    c.env("SHARDWALLET_PASSPHRASE", "correct horse");
    let (success, v) = env.run_cmd(c, &["dump-privkey"])?;
    assert!(success, "dump-privkey failed: {v}");
    assert_eq!(v, plain);

    let mut c = env.cmd(&["dump-privkey", &addr]);
    c.env("SHARDWALLET_PASSPHRASE", "wrong");
    let (success, v) = env.run_cmd(c, &["dump-privkey"])?;
    assert!(!success);
    assert_eq!(error_code(&v), Some(-33007));
    Ok(())
}
