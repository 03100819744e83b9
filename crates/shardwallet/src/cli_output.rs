//! Centralised helpers for CLI output: JSON results on stdout, operator notices on stderr.

use crate::errors::RpcError;
use eyre::Context as _;
use secrecy::{ExposeSecret as _, SecretString};
use serde::Serialize;
use std::io::{IsTerminal as _, Write as _};

pub const PASSPHRASE_ENV: &str = "SHARDWALLET_PASSPHRASE";

fn stderr_writeln(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    if stderr.write_all(b"\n").is_err() {
        return;
    }
    let _flush = stderr.flush();
}

/// Write one JSON value as a single line on stdout.
pub fn print_json<T: Serialize + ?Sized>(v: &T) -> eyre::Result<()> {
    let s = serde_json::to_string(v).context("serialize output")?;
    writeln!(std::io::stdout().lock(), "{s}").context("write stdout")?;
    Ok(())
}

/// Write `{"error": ...}` on stdout.
pub fn print_error(err: &RpcError) -> eyre::Result<()> {
    print_json(&serde_json::json!({ "error": err }))
}

/// Tell the operator a wallet was created (stderr only; stdout stays machine-readable).
pub fn print_wallet_created(root: &std::path::Path) {
    stderr_writeln(&format!("shardwallet: created wallet at {}", root.display()));
}

/// Passphrase from `SHARDWALLET_PASSPHRASE`, or prompted on the terminal.
///
/// With `confirm`, the prompt asks twice and the answers must match.
pub fn read_passphrase(prompt: &str, confirm: bool) -> eyre::Result<SecretString> {
    if let Ok(pw) = std::env::var(PASSPHRASE_ENV) {
        if pw.is_empty() {
            eyre::bail!("{PASSPHRASE_ENV} is set but empty");
        }
        return Ok(SecretString::new(pw.into()));
    }
    if !std::io::stdin().is_terminal() {
        eyre::bail!("no terminal to prompt for a passphrase; set {PASSPHRASE_ENV}");
    }

    let first = SecretString::new(
        rpassword::prompt_password(format!("{prompt}: "))
            .context("read passphrase")?
            .into(),
    );
    if first.expose_secret().is_empty() {
        eyre::bail!("passphrase must not be empty");
    }
    if confirm {
        let again = SecretString::new(
            rpassword::prompt_password("Repeat passphrase: ")
                .context("read passphrase confirmation")?
                .into(),
        );
        if again.expose_secret() != first.expose_secret() {
            eyre::bail!("passphrases do not match");
        }
    }
    Ok(first)
}
