use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

/// JSON-RPC "internal error", used for failures that are not wallet domain errors.
pub const RPC_INTERNAL_ERROR: i64 = -32603;

/// A structured error suitable for returning to an RPC client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub data: Value,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: false,
            data: Value::Null,
        }
    }

    /// Classify any report: wallet domain errors keep their code, everything else is internal.
    pub fn from_report(report: &eyre::Report) -> Self {
        WalletError::of(report).map_or_else(
            || Self::new(RPC_INTERNAL_ERROR, format!("{report:#}")),
            |e| e.clone().into(),
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("invalid account name: 2 to 128 chars from the base64 charset only")]
    InvalidAccountName,

    #[error("path does not exist")]
    InvalidPath,

    #[error("unknown address")]
    UnknownAddress,

    #[error("corrupt account record: {}", .0.display())]
    CorruptAccountRecord(PathBuf),

    #[error("timed out waiting for lock: {0}")]
    LockTimeout(String),

    #[error("wallet is locked")]
    WalletLocked,

    #[error("wrong passphrase")]
    WrongPassphrase,

    #[error("wallet is already encrypted")]
    AlreadyEncrypted,

    #[error("wallet is not encrypted")]
    NotEncrypted,
}

impl WalletError {
    /// Find the wallet error behind a report, if there is one.
    pub fn of(report: &eyre::Report) -> Option<&Self> {
        report.downcast_ref::<Self>()
    }

    pub const fn code(&self) -> i64 {
        match self {
            Self::InvalidAccountName => -33001,
            Self::InvalidPath => -33002,
            Self::UnknownAddress => -33003,
            Self::CorruptAccountRecord(_) => -33004,
            Self::LockTimeout(_) => -33005,
            Self::WalletLocked => -33006,
            Self::WrongPassphrase => -33007,
            Self::AlreadyEncrypted | Self::NotEncrypted => -33008,
        }
    }

    /// Only lock contention is worth retrying; everything else is terminal for the request.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout(_))
    }
}

impl From<WalletError> for RpcError {
    fn from(e: WalletError) -> Self {
        let mut out = Self::new(e.code(), e.to_string());
        out.retryable = e.is_retryable();
        if let WalletError::CorruptAccountRecord(path) = &e {
            out.data = serde_json::json!({ "path": path });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_errors_survive_context_wrapping() {
        let report = eyre::Report::new(WalletError::UnknownAddress).wrap_err("dump_privkey");
        assert_eq!(WalletError::of(&report), Some(&WalletError::UnknownAddress));
        let rpc = RpcError::from_report(&report);
        assert_eq!(rpc.code, -33003);
        assert!(!rpc.retryable);
    }

    #[test]
    fn lock_timeout_is_the_only_retryable_error() {
        let rpc: RpcError = WalletError::LockTimeout("rindex".into()).into();
        assert_eq!(rpc.code, -33005);
        assert!(rpc.retryable);
        assert!(!WalletError::InvalidPath.is_retryable());
    }

    #[test]
    fn foreign_errors_map_to_internal() {
        let report = eyre::eyre!("disk on fire");
        let rpc = RpcError::from_report(&report);
        assert_eq!(rpc.code, RPC_INTERNAL_ERROR);
        assert!(rpc.message.contains("disk on fire"));
    }
}
