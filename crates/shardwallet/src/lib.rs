//! File-backed wallet account store.
//!
//! Accounts are JSON records sharded by the first two characters of their name under
//! a wallet directory, next to `index.json` (store metadata) and `rindex.json`
//! (address to account). [`wallet::WalletStore`] is the entry point;
//! [`service::WalletService`] puts it behind a bounded async worker pool.

#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

pub mod account;
pub mod cipher;
pub mod cli_output;
pub mod config;
pub mod doctor;
pub mod errors;
pub mod export;
pub mod fsutil;
pub mod keys;
pub mod paths;
pub mod retry;
pub mod service;
pub mod wallet;

pub use errors::{RpcError, WalletError};
pub use wallet::{StoreOptions, WalletStore};
