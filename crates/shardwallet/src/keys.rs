use crate::account::AddressEntry;
use ed25519_dalek::SigningKey;
use rand::Rng as _;
use sha2::{Digest as _, Sha224};
use zeroize::Zeroize as _;

/// Source of fresh key material for new addresses.
///
/// Each call must return a new, collision-free address.
pub trait KeyProvider: Send + Sync {
    fn generate(&self) -> eyre::Result<AddressEntry>;
}

/// Ed25519 keys; the address is the hex SHA-224 of the public key.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519KeyProvider;

pub fn address_for_public_key(public_key: &[u8]) -> String {
    hex::encode(Sha224::digest(public_key))
}

impl KeyProvider for Ed25519KeyProvider {
    fn generate(&self) -> eyre::Result<AddressEntry> {
        let mut seed = [0_u8; 32];
        rand::rng().fill_bytes(&mut seed);
        let signing = SigningKey::from_bytes(&seed);
        let public = signing.verifying_key().to_bytes();
        let entry = AddressEntry {
            address: address_for_public_key(&public),
            private_key: hex::encode(seed),
            public_key: hex::encode(public),
        };
        seed.zeroize();
        Ok(entry)
    }
}

/// Deterministic provider for tests: `addr-0000`, `addr-0001`, ...
#[cfg(test)]
#[derive(Debug, Default)]
pub struct SequentialKeys {
    next: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl KeyProvider for SequentialKeys {
    fn generate(&self) -> eyre::Result<AddressEntry> {
        let n = self
            .next
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(AddressEntry {
            address: format!("addr-{n:04}"),
            private_key: format!("priv-{n:04}"),
            public_key: format!("pub-{n:04}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::VerifyingKey;

    #[test]
    fn generated_entries_are_consistent() -> eyre::Result<()> {
        let e = Ed25519KeyProvider.generate()?;
        assert_eq!(e.address.len(), 56);
        let seed: [u8; 32] = hex::decode(&e.private_key)?
            .try_into()
            .map_err(|v: Vec<u8>| eyre::eyre!("seed length {}", v.len()))?;
        let public = SigningKey::from_bytes(&seed).verifying_key();
        assert_eq!(hex::encode(public.to_bytes()), e.public_key);
        let pk_bytes: [u8; 32] = hex::decode(&e.public_key)?
            .try_into()
            .map_err(|v: Vec<u8>| eyre::eyre!("pubkey length {}", v.len()))?;
        VerifyingKey::from_bytes(&pk_bytes)?;
        assert_eq!(address_for_public_key(&pk_bytes), e.address);
        Ok(())
    }

    #[test]
    fn addresses_do_not_repeat() -> eyre::Result<()> {
        let a = Ed25519KeyProvider.generate()?;
        let b = Ed25519KeyProvider.generate()?;
        assert_ne!(a.address, b.address);
        Ok(())
    }
}
