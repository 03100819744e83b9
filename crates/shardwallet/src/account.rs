//! Account naming rules and the on-disk account record.

use crate::errors::WalletError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_NAME_LEN: usize = 2;
pub const MAX_NAME_LEN: usize = 128;

/// Alias accepted for the default account. Always canonicalised to the empty name.
pub const DEFAULT_ALIAS: &str = "default";

/// A validated, canonical account name.
///
/// The empty name is the default account. `"default"` is accepted as an alias and
/// canonicalised to `""`, so both spellings address the same record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountName(String);

impl AccountName {
    pub fn default_account() -> Self {
        Self(String::new())
    }

    pub fn parse(raw: &str) -> Result<Self, WalletError> {
        validate(raw)?;
        if raw == DEFAULT_ALIAS {
            return Ok(Self::default_account());
        }
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }

    /// Shard directory for a non-default account: its first two characters.
    pub fn shard(&self) -> Option<&str> {
        if self.is_default() {
            return None;
        }
        // Validated names are ASCII, so byte 2 is a char boundary.
        self.0.get(..MIN_NAME_LEN)
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const fn is_name_char(c: char) -> bool {
    // Base64 alphabet minus '/', which would split the path.
    c.is_ascii_alphanumeric() || c == '+'
}

/// Check an account name against the naming rule without touching the filesystem.
pub fn validate(name: &str) -> Result<(), WalletError> {
    if name.is_empty() {
        return Ok(());
    }
    let len = name.len();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len) || !name.chars().all(is_name_char) {
        return Err(WalletError::InvalidAccountName);
    }
    Ok(())
}

/// One key pair owned by an account. Serialised as `[address, private_key, public_key]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String, String)", into = "(String, String, String)")]
pub struct AddressEntry {
    pub address: String,
    /// Plain hex, or a sealed string when the owning record is encrypted.
    pub private_key: String,
    pub public_key: String,
}

impl From<(String, String, String)> for AddressEntry {
    fn from((address, private_key, public_key): (String, String, String)) -> Self {
        Self {
            address,
            private_key,
            public_key,
        }
    }
}

impl From<AddressEntry> for (String, String, String) {
    fn from(e: AddressEntry) -> Self {
        (e.address, e.private_key, e.public_key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub encrypted: bool,
    pub addresses: Vec<AddressEntry>,
}

impl AccountRecord {
    pub fn new(first: AddressEntry, encrypted: bool) -> Self {
        Self {
            encrypted,
            addresses: vec![first],
        }
    }

    pub fn find(&self, address: &str) -> Option<&AddressEntry> {
        self.addresses.iter().find(|e| e.address == address)
    }

    pub fn address_list(&self) -> Vec<String> {
        self.addresses.iter().map(|e| e.address.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_default_alias_are_the_same_account() -> eyre::Result<()> {
        assert_eq!(AccountName::parse("")?, AccountName::parse("default")?);
        assert!(AccountName::parse("default")?.is_default());
        assert_eq!(AccountName::parse("default")?.shard(), None);
        Ok(())
    }

    #[test]
    fn length_bounds_are_inclusive() {
        assert!(validate("ab").is_ok());
        assert!(validate(&"a".repeat(128)).is_ok());
        assert_eq!(validate("a"), Err(WalletError::InvalidAccountName));
        assert_eq!(validate(&"a".repeat(129)), Err(WalletError::InvalidAccountName));
    }

    #[test]
    fn only_base64_without_slash_is_accepted() {
        assert!(validate("Ab+9zZ").is_ok());
        for bad in ["a/b", "../x", "ab=", "a b", "ab.", "héllo", "ab\0", "a\\b"] {
            assert_eq!(validate(bad), Err(WalletError::InvalidAccountName), "{bad:?}");
        }
    }

    #[test]
    fn shard_is_first_two_chars() -> eyre::Result<()> {
        assert_eq!(AccountName::parse("AbCdEf12")?.shard(), Some("Ab"));
        assert_eq!(AccountName::parse("de")?.shard(), Some("de"));
        Ok(())
    }

    #[test]
    fn record_uses_positional_address_triples() -> eyre::Result<()> {
        let raw = r#"{"encrypted":false,"addresses":[["addr1","priv1","pub1"]]}"#;
        let rec: AccountRecord = serde_json::from_str(raw)?;
        assert_eq!(rec.find("addr1").map(|e| e.public_key.as_str()), Some("pub1"));
        assert_eq!(serde_json::to_string(&rec)?, raw);
        Ok(())
    }
}
