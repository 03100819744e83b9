use crate::{account::AddressEntry, wallet::WalletStore};
use eyre::Context as _;
use secrecy::SecretString;
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};
use tokio::sync::Semaphore;

/// Async front for a [`WalletStore`] shared by many request handlers.
///
/// Store calls block on file I/O and file locks, so each one runs on the blocking pool.
/// At most `max_concurrent_ops` run at once; further callers wait for a permit.
#[derive(Debug, Clone)]
pub struct WalletService {
    store: Arc<WalletStore>,
    permits: Arc<Semaphore>,
}

impl WalletService {
    pub fn new(store: WalletStore) -> Self {
        let n = store.config().max_concurrent_ops.max(1);
        Self {
            store: Arc::new(store),
            permits: Arc::new(Semaphore::new(n)),
        }
    }

    pub fn store(&self) -> &WalletStore {
        &self.store
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> eyre::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&WalletStore) -> eyre::Result<T> + Send + 'static,
    {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .context("wallet service is shut down")?;
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .with_context(|| format!("wallet task {op} failed to complete"))?
    }

    pub async fn get_default_address(&self, account: String) -> eyre::Result<String> {
        self.run("get_default_address", move |s| s.get_default_address(&account))
            .await
    }

    pub async fn resolve_account(&self, address: String) -> eyre::Result<String> {
        self.run("resolve_account", move |s| s.resolve_account(&address))
            .await
    }

    pub async fn create_address(&self, account: String) -> eyre::Result<String> {
        self.run("create_address", move |s| s.create_address(&account))
            .await
    }

    pub async fn get_keys_for_address(&self, address: String) -> eyre::Result<AddressEntry> {
        self.run("get_keys_for_address", move |s| s.get_keys_for_address(&address))
            .await
    }

    pub async fn reveal_private_key(&self, address: String) -> eyre::Result<String> {
        self.run("reveal_private_key", move |s| s.reveal_private_key(&address))
            .await
    }

    pub async fn list_accounts(&self) -> eyre::Result<BTreeMap<String, i64>> {
        self.run("list_accounts", WalletStore::list_accounts).await
    }

    pub async fn addresses_of(&self, account: String) -> eyre::Result<Vec<String>> {
        self.run("addresses_of", move |s| s.addresses_of(&account))
            .await
    }

    pub async fn reindex(&self) -> eyre::Result<usize> {
        self.run("reindex", WalletStore::reindex).await
    }

    pub async fn backup(&self, destination: PathBuf) -> eyre::Result<()> {
        self.run("backup", move |s| s.backup(&destination)).await
    }

    pub async fn dump(&self, destination: PathBuf, version_label: String) -> eyre::Result<()> {
        self.run("dump", move |s| s.dump(&destination, &version_label))
            .await
    }

    pub async fn encrypt_wallet(&self, passphrase: SecretString) -> eyre::Result<usize> {
        self.run("encrypt_wallet", move |s| s.encrypt_wallet(&passphrase))
            .await
    }

    pub async fn seal_plaintext_keys(&self) -> eyre::Result<usize> {
        self.run("seal_plaintext_keys", WalletStore::seal_plaintext_keys)
            .await
    }

    pub async fn unlock(&self, passphrase: SecretString) -> eyre::Result<()> {
        self.run("unlock", move |s| s.unlock(&passphrase)).await
    }

    pub async fn lock(&self) -> eyre::Result<()> {
        self.run("lock", |s| {
            s.lock();
            Ok(())
        })
        .await
    }
}
