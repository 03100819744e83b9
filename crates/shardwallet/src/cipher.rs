//! Private-key sealing for encrypted wallets.
//!
//! A wallet key is derived once from the passphrase (Argon2id). Each private key is then
//! sealed with AES-256-GCM under an HKDF subkey bound to its address, so a sealed key
//! cannot be swapped between addresses without failing authentication.

use aes_gcm::{
    aead::{Aead as _, KeyInit as _},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine as _;
use eyre::Context as _;
use hkdf::Hkdf;
use rand::Rng as _;
use secrecy::{ExposeSecret as _, SecretString};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

const SEALED_PREFIX: &str = "enc1";
const CANARY_ADDRESS: &str = "passphrase-check";
const CANARY_PLAINTEXT: &str = "shardwallet";

/// Wallet key derived from a passphrase. Wiped when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct UnlockKey([u8; 32]);

impl std::fmt::Debug for UnlockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("UnlockKey(..)")
    }
}

/// Protects private key material at rest.
pub trait Cipher: Send + Sync {
    fn derive_key(&self, passphrase: &SecretString, salt: &[u8; 16]) -> eyre::Result<UnlockKey>;
    fn seal(&self, key: &UnlockKey, address: &str, private_key: &str) -> eyre::Result<String>;
    fn open(&self, key: &UnlockKey, address: &str, sealed: &str) -> eyre::Result<String>;

    /// One-shot decrypt straight from the passphrase.
    fn decrypt(
        &self,
        sealed: &str,
        address: &str,
        passphrase: &SecretString,
        salt: &[u8; 16],
    ) -> eyre::Result<String> {
        let key = self.derive_key(passphrase, salt)?;
        self.open(&key, address, sealed)
    }

    /// Sealed known plaintext, stored in the index to verify a passphrase later.
    fn make_canary(&self, key: &UnlockKey) -> eyre::Result<String> {
        self.seal(key, CANARY_ADDRESS, CANARY_PLAINTEXT)
    }

    fn check_canary(&self, key: &UnlockKey, canary: &str) -> bool {
        self.open(key, CANARY_ADDRESS, canary)
            .is_ok_and(|s| s == CANARY_PLAINTEXT)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmCipher;

pub fn fill_random(buf: &mut [u8]) {
    let mut rng = rand::rng();
    rng.fill_bytes(buf);
}

pub fn random_salt16() -> [u8; 16] {
    let mut s = [0_u8; 16];
    fill_random(&mut s);
    s
}

pub fn is_sealed(s: &str) -> bool {
    s.starts_with(SEALED_PREFIX) && s.split(':').count() == 3
}

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

fn derive_subkey(master: &UnlockKey, address: &str) -> eyre::Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(None, &master.0);
    let info = format!("shardwallet:{address}:privkey");
    let mut out = [0_u8; 32];
    hk.expand(info.as_bytes(), &mut out)
        .map_err(|e| eyre::eyre!("hkdf expand: {e}"))?;
    Ok(out)
}

impl Cipher for AesGcmCipher {
    fn derive_key(&self, passphrase: &SecretString, salt: &[u8; 16]) -> eyre::Result<UnlockKey> {
        // Frozen Argon2id parameters (argon2 0.5 defaults) so upgrades never change keys.
        let params = Params::new(19 * 1024, 2, 1, Some(32))
            .map_err(|e| eyre::eyre!("argon2 params: {e}"))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut out = [0_u8; 32];
        argon2
            .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut out)
            .map_err(|e| eyre::eyre!("argon2 hash: {e}"))?;
        Ok(UnlockKey(out))
    }

    fn seal(&self, key: &UnlockKey, address: &str, private_key: &str) -> eyre::Result<String> {
        let mut sub = derive_subkey(key, address)?;
        let cipher = Aes256Gcm::new_from_slice(&sub).context("aes init")?;
        sub.zeroize();
        let mut nonce = [0_u8; 12];
        fill_random(&mut nonce);
        let ct = cipher
            .encrypt(Nonce::from_slice(&nonce), private_key.as_bytes())
            .map_err(|e| eyre::eyre!("aes encrypt: {e}"))?;
        Ok(format!(
            "{SEALED_PREFIX}:{}:{}",
            b64().encode(nonce),
            b64().encode(ct)
        ))
    }

    fn open(&self, key: &UnlockKey, address: &str, sealed: &str) -> eyre::Result<String> {
        let mut parts = sealed.split(':');
        let (Some(SEALED_PREFIX), Some(nonce_b64), Some(ct_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            eyre::bail!("not a sealed private key");
        };
        let nonce = b64().decode(nonce_b64).context("decode nonce")?;
        if nonce.len() != 12 {
            eyre::bail!("invalid nonce length");
        }
        let ct = b64().decode(ct_b64).context("decode ciphertext")?;

        let mut sub = derive_subkey(key, address)?;
        let cipher = Aes256Gcm::new_from_slice(&sub).context("aes init")?;
        sub.zeroize();
        let pt = cipher
            .decrypt(Nonce::from_slice(&nonce), ct.as_ref())
            .map_err(|e| eyre::eyre!("aes decrypt: {e}"))?;
        String::from_utf8(pt).context("private key must be utf-8")
    }
}
