//! Core Ethereum domain types.

use {
    serde::{Deserialize, Deserializer, Serialize},
    std::fmt::{self, Debug, Display, Formatter},
};

pub use ethereum_types::{H160, H256, U256};

/// An EVM account address.
pub type Address = H160;

/// A transaction hash.
pub type TxHash = H256;

/// A chain identifier as used in AMB routing tables and store keys.
///
/// Chain identifiers are decimal strings for EVM chains (e.g. `"80001"`),
/// but the AMB address space admits arbitrary strings, so they are not
/// parsed as numbers. They are normalized to lowercase because the store
/// key space is lowercase.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Self::new(String::deserialize(deserializer)?))
    }
}

impl Display for ChainId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for ChainId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "ChainId({})", self.0)
    }
}

impl From<&str> for ChainId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Gas amount.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Gas(pub U256);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_id_is_lowercased() {
        assert_eq!(ChainId::new("0xABC").as_str(), "0xabc");
        assert_eq!(ChainId::new("80001"), ChainId::from("80001"));
    }
}
