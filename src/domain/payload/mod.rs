//! Decoders for the protocol wire formats.
//!
//! Two layered, bit-exact formats are understood: the generalized-incentives
//! envelope and the Catalyst swap payload it carries. All multi-byte integers
//! are big-endian; all addresses travel in the 65-byte cross-ecosystem
//! encoding. Everything in this module is a pure function of its input bytes.

use {
    crate::domain::eth::{Address, H256, U256},
    serde::{de, Deserialize, Deserializer, Serialize, Serializer},
    std::fmt::{self, Debug, Formatter},
    web3::{
        ethabi::{self, Token},
        signing::keccak256,
    },
};

pub mod catalyst;
pub mod incentives;

pub use {
    catalyst::{AssetSwapPayload, CatalystPayload, LiquiditySwapPayload},
    incentives::{IncentivesEnvelope, IncentivesMessage},
};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PayloadError {
    #[error("payload too short: expected at least {expected} bytes, got {got}")]
    TooShort { expected: usize, got: usize },
    #[error("unknown context byte {0:#04x}")]
    UnknownContext(u8),
    #[error("invalid encoded address length {0}")]
    InvalidAddressLength(u8),
    #[error("address is not an EVM address (encoded length {0})")]
    NotAnEvmAddress(u8),
}

/// The protocol-wide cross-ecosystem address encoding: one length byte
/// followed by a 64-byte right-justified address payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bytes65(pub [u8; 65]);

impl Bytes65 {
    pub const LEN: usize = 65;

    /// Wraps an address of up to 64 bytes.
    pub fn from_address_bytes(address: &[u8]) -> Result<Self, PayloadError> {
        if address.is_empty() || address.len() > 64 {
            return Err(PayloadError::InvalidAddressLength(address.len() as u8));
        }
        let mut bytes = [0_u8; Self::LEN];
        bytes[0] = address.len() as u8;
        bytes[Self::LEN - address.len()..].copy_from_slice(address);
        Ok(Self(bytes))
    }

    pub fn from_evm_address(address: Address) -> Self {
        // A 20-byte address always fits.
        Self::from_address_bytes(address.as_bytes()).unwrap()
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, PayloadError> {
        let bytes: [u8; Self::LEN] =
            bytes.try_into().map_err(|_| PayloadError::TooShort {
                expected: Self::LEN,
                got: bytes.len(),
            })?;
        Ok(Self(bytes))
    }

    /// The embedded address: the first byte is the length `L`, the address is
    /// the last `L` bytes of the 64-byte payload region.
    pub fn address_bytes(&self) -> Result<&[u8], PayloadError> {
        let len = self.0[0] as usize;
        if len == 0 || len > 64 {
            return Err(PayloadError::InvalidAddressLength(self.0[0]));
        }
        Ok(&self.0[Self::LEN - len..])
    }

    pub fn to_evm_address(&self) -> Result<Address, PayloadError> {
        let address = self.address_bytes()?;
        if address.len() != 20 {
            return Err(PayloadError::NotAnEvmAddress(self.0[0]));
        }
        Ok(Address::from_slice(address))
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl Debug for Bytes65 {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Bytes65(0x{})", hex::encode(self.0))
    }
}

impl Serialize for Bytes65 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for Bytes65 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let stripped = s
            .strip_prefix("0x")
            .ok_or_else(|| de::Error::custom("missing \"0x\" prefix"))?;
        let bytes = hex::decode(stripped).map_err(de::Error::custom)?;
        Self::from_slice(&bytes).map_err(de::Error::custom)
    }
}

/// The identifier of a swap as derived on the source chain.
///
/// `keccak256(abi.encode(toAccount, units, fromAmount, fromAsset,
/// blockNumber mod 2³²))` with `toAccount` in its 65-byte encoding and
/// `fromAsset` as a plain EVM address.
pub fn swap_id(
    to_account: &Bytes65,
    units: U256,
    from_amount: U256,
    from_asset: Address,
    block_number: u32,
) -> H256 {
    let encoded = ethabi::encode(&[
        Token::Bytes(to_account.as_bytes().to_vec()),
        Token::Uint(units),
        Token::Uint(from_amount),
        Token::Address(from_asset),
        Token::Uint(block_number.into()),
    ]);
    H256(keccak256(&encoded))
}

/// The identifier of an underwrite as derived on the destination chain.
///
/// Deterministic in its six arguments; two identical orders produce the same
/// identifier, which doubles as the dedup key.
pub fn underwrite_id(
    to_vault: Address,
    to_asset: Address,
    units: U256,
    min_out: U256,
    to_account: Address,
    underwrite_incentive_x16: u16,
    cdata: &[u8],
) -> H256 {
    let encoded = ethabi::encode(&[
        Token::Address(to_vault),
        Token::Address(to_asset),
        Token::Uint(units),
        Token::Uint(min_out),
        Token::Address(to_account),
        Token::Uint(underwrite_incentive_x16.into()),
        Token::Bytes(cdata.to_vec()),
    ]);
    H256(keccak256(&encoded))
}

pub(super) fn read_u64_be(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0_u64, |acc, byte| (acc << 8) | u64::from(*byte))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes65_round_trips_every_address_length() {
        for len in 1..=32 {
            let address: Vec<u8> = (0..len).map(|i| i as u8 + 1).collect();
            let encoded = Bytes65::from_address_bytes(&address).unwrap();
            assert_eq!(encoded.0[0], len as u8);
            assert_eq!(encoded.address_bytes().unwrap(), address.as_slice());
        }
    }

    #[test]
    fn bytes65_intermediate_bytes_are_zero() {
        let encoded = Bytes65::from_evm_address(Address::repeat_byte(0xcc));
        assert!(encoded.0[1..45].iter().all(|byte| *byte == 0));
        assert_eq!(encoded.to_evm_address().unwrap(), Address::repeat_byte(0xcc));
    }

    #[test]
    fn bytes65_rejects_non_evm_lengths() {
        let encoded = Bytes65::from_address_bytes(&[0xaa; 32]).unwrap();
        assert_eq!(
            encoded.to_evm_address(),
            Err(PayloadError::NotAnEvmAddress(32))
        );
    }

    #[test]
    fn swap_id_matches_hand_laid_abi_encoding() {
        let to_account = Bytes65::from_evm_address(Address::repeat_byte(0xcc));
        let units = U256::from(100_u64) * U256::exp10(18);
        let from_amount = U256::exp10(16);
        let from_asset = Address::repeat_byte(0xdd);
        let block_number = 17_000_000_u32;

        // Hand-laid `abi.encode(bytes,uint256,uint256,address,uint32)`
        // pre-image, independent of the ABI library: five head words, then
        // the dynamic `bytes` tail (length word + 65 bytes padded to three
        // words).
        let mut expected = Vec::new();
        let mut word = [0_u8; 32];
        word[31] = 0xa0; // offset of the dynamic tail: 5 * 32
        expected.extend_from_slice(&word);
        let mut word = [0_u8; 32];
        units.to_big_endian(&mut word);
        expected.extend_from_slice(&word);
        let mut word = [0_u8; 32];
        from_amount.to_big_endian(&mut word);
        expected.extend_from_slice(&word);
        let mut word = [0_u8; 32];
        word[12..].copy_from_slice(from_asset.as_bytes());
        expected.extend_from_slice(&word);
        let mut word = [0_u8; 32];
        word[28..].copy_from_slice(&block_number.to_be_bytes());
        expected.extend_from_slice(&word);
        let mut word = [0_u8; 32];
        word[31] = 65;
        expected.extend_from_slice(&word);
        let mut tail = [0_u8; 96];
        tail[..65].copy_from_slice(to_account.as_bytes());
        expected.extend_from_slice(&tail);

        assert_eq!(
            swap_id(&to_account, units, from_amount, from_asset, block_number),
            H256(keccak256(&expected)),
        );
    }

    #[test]
    fn underwrite_id_matches_hand_laid_abi_encoding() {
        let to_vault = Address::repeat_byte(0xbb);
        let to_asset = Address::repeat_byte(0xee);
        let units = U256::from(42_u64);
        let min_out = U256::zero();
        let to_account = Address::repeat_byte(0xcc);
        let incentive = 655_u16;
        let cdata = [0x01, 0x02, 0x03];

        // Seven head words (the last one the offset of the dynamic `bytes`
        // tail), then the tail: length word plus right-padded data.
        let mut encoded = Vec::new();
        for address in [to_vault, to_asset] {
            let mut word = [0_u8; 32];
            word[12..].copy_from_slice(address.as_bytes());
            encoded.extend_from_slice(&word);
        }
        let mut word = [0_u8; 32];
        units.to_big_endian(&mut word);
        encoded.extend_from_slice(&word);
        let mut word = [0_u8; 32];
        min_out.to_big_endian(&mut word);
        encoded.extend_from_slice(&word);
        let mut word = [0_u8; 32];
        word[12..].copy_from_slice(to_account.as_bytes());
        encoded.extend_from_slice(&word);
        let mut word = [0_u8; 32];
        word[30..].copy_from_slice(&incentive.to_be_bytes());
        encoded.extend_from_slice(&word);
        let mut word = [0_u8; 32];
        word[31] = 0xe0; // offset of the dynamic tail: 7 * 32
        encoded.extend_from_slice(&word);
        let mut word = [0_u8; 32];
        word[31] = cdata.len() as u8;
        encoded.extend_from_slice(&word);
        let mut tail = [0_u8; 32];
        tail[..cdata.len()].copy_from_slice(&cdata);
        encoded.extend_from_slice(&tail);

        assert_eq!(
            underwrite_id(to_vault, to_asset, units, min_out, to_account, incentive, &cdata),
            H256(keccak256(&encoded)),
        );
    }

    #[test]
    fn identifiers_are_deterministic() {
        let to_account = Bytes65::from_evm_address(Address::repeat_byte(0x11));
        let id = |block| swap_id(&to_account, 1.into(), 2.into(), Address::zero(), block);
        assert_eq!(id(7), id(7));
        assert_ne!(id(7), id(8));
    }
}
