#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand};
use eyre::Context as _;
use shardwallet::{
    cli_output,
    config::{ConfigStore, StoreConfig},
    doctor,
    errors::{RpcError, WalletError},
    paths::{AppPaths, INDEX_FILE},
    service::WalletService,
    wallet::{StoreOptions, WalletStore},
};
use std::{
    future::Future,
    path::{Path, PathBuf},
    process::ExitCode,
};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "shardwallet", version)]
struct Cli {
    /// Wallet directory (defaults to `wallet/` in the data dir).
    #[arg(long, global = true)]
    wallet: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print resolved paths (useful for debugging).
    Paths,

    /// Print a self-diagnostic report (safe to paste; contains no secrets).
    Doctor,

    #[command(flatten)]
    Wallet(WalletCommand),
}

/// Commands that open the wallet.
#[derive(Subcommand, Debug)]
enum WalletCommand {
    /// Print the first address of an account, creating the account if needed.
    Address {
        /// Account name; empty or `default` is the default account.
        #[arg(default_value = "")]
        account: String,
    },

    /// Create a new address in an account.
    NewAddress {
        #[arg(default_value = "")]
        account: String,
    },

    /// Print the account that owns an address.
    Account { address: String },

    /// List accounts with their (unknown) balances.
    List,

    /// List the addresses of an account.
    Addresses {
        #[arg(default_value = "")]
        account: String,
    },

    /// Print the private key of an address. Prompts for the passphrase if the wallet is encrypted.
    DumpPrivkey { address: String },

    /// Rebuild the address index from the account files.
    Reindex,

    /// Write a zip archive of the wallet directory.
    Backup { destination: PathBuf },

    /// Write a text dump of every key.
    Dump { destination: PathBuf },

    /// Encrypt every private key with a passphrase (or finish an interrupted run).
    Encrypt,
}

fn init_logging(paths: &AppPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("shardwallet.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

/// Run `op`; if the wallet turns out to be locked, unlock it with the passphrase and retry once.
async fn unlocking<T, F, Fut>(svc: &WalletService, op: F) -> eyre::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = eyre::Result<T>>,
{
    match op().await {
        Err(e) if WalletError::of(&e) == Some(&WalletError::WalletLocked) => {
            let pass = cli_output::read_passphrase("Wallet passphrase", false)?;
            svc.unlock(pass).await?;
            op().await
        }
        res => res,
    }
}

fn open_service(root: &Path, cfg: &StoreConfig) -> eyre::Result<WalletService> {
    let fresh = !root.join(INDEX_FILE).exists();
    let store = WalletStore::open_with(
        root,
        StoreOptions {
            config: cfg.clone(),
            ..StoreOptions::default()
        },
    )
    .with_context(|| format!("open wallet {}", root.display()))?;
    if fresh {
        cli_output::print_wallet_created(root);
    }
    Ok(WalletService::new(store))
}

async fn run(cli: Cli, paths: &AppPaths, cfg: &StoreConfig) -> eyre::Result<()> {
    let root = cli.wallet.unwrap_or_else(|| paths.default_wallet_dir());

    match cli.cmd {
        Command::Paths => cli_output::print_json(&serde_json::json!({
          "config_dir": paths.config_dir,
          "data_dir": paths.data_dir,
          "log_file": paths.log_file,
          "wallet": root,
        })),
        Command::Doctor => doctor::run(&mut std::io::stdout().lock(), paths, &root, cfg)
            .context("doctor failed"),
        Command::Wallet(cmd) => {
            let svc = open_service(&root, cfg)?;
            run_wallet_command(cmd, &svc, cfg).await
        }
    }
}

async fn run_wallet_command(
    cmd: WalletCommand,
    svc: &WalletService,
    cfg: &StoreConfig,
) -> eyre::Result<()> {
    match cmd {
        WalletCommand::Address { account } => {
            let addr = unlocking(svc, || svc.get_default_address(account.clone())).await?;
            cli_output::print_json(&addr)
        }
        WalletCommand::NewAddress { account } => {
            let addr = unlocking(svc, || svc.create_address(account.clone())).await?;
            cli_output::print_json(&addr)
        }
        WalletCommand::Account { address } => {
            cli_output::print_json(&svc.resolve_account(address).await?)
        }
        WalletCommand::List => cli_output::print_json(&svc.list_accounts().await?),
        WalletCommand::Addresses { account } => {
            let addrs = unlocking(svc, || svc.addresses_of(account.clone())).await?;
            cli_output::print_json(&addrs)
        }
        WalletCommand::DumpPrivkey { address } => {
            let key = unlocking(svc, || svc.reveal_private_key(address.clone())).await?;
            cli_output::print_json(&key)
        }
        WalletCommand::Reindex => {
            let entries = svc.reindex().await?;
            cli_output::print_json(&serde_json::json!({ "entries": entries }))
        }
        WalletCommand::Backup { destination } => {
            svc.backup(destination).await?;
            cli_output::print_json(&true)
        }
        WalletCommand::Dump { destination } => {
            svc.dump(destination, cfg.dump_label.clone()).await?;
            cli_output::print_json(&true)
        }
        WalletCommand::Encrypt => {
            let sealed = if svc.store().is_encrypted()? {
                let pass = cli_output::read_passphrase("Wallet passphrase", false)?;
                svc.unlock(pass).await?;
                let sealed = svc.seal_plaintext_keys().await;
                svc.lock().await?;
                match sealed? {
                    0 => return Err(WalletError::AlreadyEncrypted.into()),
                    n => n,
                }
            } else {
                let pass = cli_output::read_passphrase("New wallet passphrase", true)?;
                svc.encrypt_wallet(pass).await?
            };
            cli_output::print_json(&serde_json::json!({ "encrypted": true, "sealed": sealed }))
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = AppPaths::discover()?;
    paths.ensure_private_dirs()?;
    let _log_guard = init_logging(&paths);
    let cfg = ConfigStore::new(&paths)
        .load_or_init_default()
        .context("load config")?;

    match run(cli, &paths, &cfg).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) if WalletError::of(&e).is_some() => {
            tracing::debug!(error = %format!("{e:#}"), "command failed");
            cli_output::print_error(&RpcError::from_report(&e))?;
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e),
    }
}
