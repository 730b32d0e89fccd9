//! The Catalyst swap payload carried inside a source-to-destination
//! incentives envelope.

use {
    super::{Bytes65, PayloadError},
    crate::domain::eth::U256,
};

pub const CONTEXT_ASSET_SWAP: u8 = 0x00;
pub const CONTEXT_LIQUIDITY_SWAP: u8 = 0x01;

// Byte offsets of the asset-swap layout, after the context byte.
const FROM_VAULT: usize = 1;
const TO_VAULT: usize = 66;
const TO_ACCOUNT: usize = 131;
const UNITS: usize = 196;
const TO_ASSET_INDEX: usize = 228;
const MIN_OUT: usize = 229;
const FROM_AMOUNT: usize = 261;
const FROM_ASSET: usize = 293;
const BLOCK_NUMBER: usize = 358;
const UNDERWRITE_INCENTIVE: usize = 362;
const CDATA: usize = 364;

// The liquidity-swap layout shares the leading vault/account fields.
const LIQUIDITY_FIXED_END: usize = 228;

#[derive(Clone, Debug, PartialEq)]
pub enum CatalystPayload {
    AssetSwap(AssetSwapPayload),
    /// Decoded but not actioned by the underwriter.
    LiquiditySwap(LiquiditySwapPayload),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssetSwapPayload {
    pub from_vault: Bytes65,
    pub to_vault: Bytes65,
    pub to_account: Bytes65,
    pub units: U256,
    pub to_asset_index: u8,
    pub min_out: U256,
    pub from_amount: U256,
    pub from_asset: Bytes65,
    /// The source-chain block number truncated to 32 bits.
    pub block_number: u32,
    pub underwrite_incentive_x16: u16,
    pub cdata: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LiquiditySwapPayload {
    pub from_vault: Bytes65,
    pub to_vault: Bytes65,
    pub to_account: Bytes65,
    pub units: U256,
    pub body: Vec<u8>,
}

pub fn parse(raw: &[u8]) -> Result<CatalystPayload, PayloadError> {
    match raw.first() {
        Some(&CONTEXT_ASSET_SWAP) => parse_asset_swap(raw).map(CatalystPayload::AssetSwap),
        Some(&CONTEXT_LIQUIDITY_SWAP) => {
            parse_liquidity_swap(raw).map(CatalystPayload::LiquiditySwap)
        }
        Some(&context) => Err(PayloadError::UnknownContext(context)),
        None => Err(PayloadError::TooShort { expected: 1, got: 0 }),
    }
}

fn parse_asset_swap(raw: &[u8]) -> Result<AssetSwapPayload, PayloadError> {
    if raw.len() < CDATA {
        return Err(PayloadError::TooShort {
            expected: CDATA,
            got: raw.len(),
        });
    }
    Ok(AssetSwapPayload {
        from_vault: Bytes65::from_slice(&raw[FROM_VAULT..TO_VAULT])?,
        to_vault: Bytes65::from_slice(&raw[TO_VAULT..TO_ACCOUNT])?,
        to_account: Bytes65::from_slice(&raw[TO_ACCOUNT..UNITS])?,
        units: U256::from_big_endian(&raw[UNITS..TO_ASSET_INDEX]),
        to_asset_index: raw[TO_ASSET_INDEX],
        min_out: U256::from_big_endian(&raw[MIN_OUT..FROM_AMOUNT]),
        from_amount: U256::from_big_endian(&raw[FROM_AMOUNT..FROM_ASSET]),
        from_asset: Bytes65::from_slice(&raw[FROM_ASSET..BLOCK_NUMBER])?,
        block_number: u32::from_be_bytes(
            raw[BLOCK_NUMBER..UNDERWRITE_INCENTIVE].try_into().unwrap(),
        ),
        underwrite_incentive_x16: u16::from_be_bytes(
            raw[UNDERWRITE_INCENTIVE..CDATA].try_into().unwrap(),
        ),
        cdata: raw[CDATA..].to_vec(),
    })
}

fn parse_liquidity_swap(raw: &[u8]) -> Result<LiquiditySwapPayload, PayloadError> {
    if raw.len() < LIQUIDITY_FIXED_END {
        return Err(PayloadError::TooShort {
            expected: LIQUIDITY_FIXED_END,
            got: raw.len(),
        });
    }
    Ok(LiquiditySwapPayload {
        from_vault: Bytes65::from_slice(&raw[FROM_VAULT..TO_VAULT])?,
        to_vault: Bytes65::from_slice(&raw[TO_VAULT..TO_ACCOUNT])?,
        to_account: Bytes65::from_slice(&raw[TO_ACCOUNT..UNITS])?,
        units: U256::from_big_endian(&raw[UNITS..TO_ASSET_INDEX]),
        body: raw[LIQUIDITY_FIXED_END..].to_vec(),
    })
}

/// Encodes an asset-swap payload. The counterpart of [`parse`], used to
/// produce wire fixtures.
pub fn encode_asset_swap(payload: &AssetSwapPayload) -> Vec<u8> {
    let mut raw = Vec::with_capacity(CDATA + payload.cdata.len());
    raw.push(CONTEXT_ASSET_SWAP);
    raw.extend_from_slice(payload.from_vault.as_bytes());
    raw.extend_from_slice(payload.to_vault.as_bytes());
    raw.extend_from_slice(payload.to_account.as_bytes());
    let mut word = [0_u8; 32];
    payload.units.to_big_endian(&mut word);
    raw.extend_from_slice(&word);
    raw.push(payload.to_asset_index);
    payload.min_out.to_big_endian(&mut word);
    raw.extend_from_slice(&word);
    payload.from_amount.to_big_endian(&mut word);
    raw.extend_from_slice(&word);
    raw.extend_from_slice(payload.from_asset.as_bytes());
    raw.extend_from_slice(&payload.block_number.to_be_bytes());
    raw.extend_from_slice(&payload.underwrite_incentive_x16.to_be_bytes());
    raw.extend_from_slice(&payload.cdata);
    raw
}

#[cfg(test)]
mod tests {
    use {super::*, crate::domain::eth::Address};

    fn asset_swap_fixture() -> AssetSwapPayload {
        AssetSwapPayload {
            from_vault: Bytes65::from_evm_address(Address::repeat_byte(0xaa)),
            to_vault: Bytes65::from_evm_address(Address::repeat_byte(0xbb)),
            to_account: Bytes65::from_evm_address(Address::repeat_byte(0xcc)),
            units: U256::from(100_u64) * U256::exp10(18),
            to_asset_index: 0,
            min_out: U256::zero(),
            from_amount: U256::exp10(16),
            from_asset: Bytes65::from_evm_address(Address::repeat_byte(0xdd)),
            block_number: 17_000_000,
            underwrite_incentive_x16: 655,
            cdata: vec![],
        }
    }

    #[test]
    fn round_trips_asset_swap() {
        let payload = asset_swap_fixture();
        let raw = encode_asset_swap(&payload);
        assert_eq!(raw.len(), 364);
        assert_eq!(parse(&raw), Ok(CatalystPayload::AssetSwap(payload)));
    }

    #[test]
    fn round_trips_asset_swap_with_cdata() {
        let payload = AssetSwapPayload {
            cdata: vec![0x01; 77],
            ..asset_swap_fixture()
        };
        let raw = encode_asset_swap(&payload);
        assert_eq!(parse(&raw), Ok(CatalystPayload::AssetSwap(payload)));
    }

    #[test]
    fn block_number_is_truncated_to_32_bits() {
        let payload = AssetSwapPayload {
            block_number: (17_000_000_000_u64 % (1_u64 << 32)) as u32,
            ..asset_swap_fixture()
        };
        let raw = encode_asset_swap(&payload);
        match parse(&raw).unwrap() {
            CatalystPayload::AssetSwap(parsed) => {
                assert_eq!(parsed.block_number, payload.block_number)
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn parses_liquidity_swap_prefix() {
        let mut raw = encode_asset_swap(&asset_swap_fixture());
        raw[0] = CONTEXT_LIQUIDITY_SWAP;
        match parse(&raw).unwrap() {
            CatalystPayload::LiquiditySwap(parsed) => {
                assert_eq!(parsed.units, asset_swap_fixture().units);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_context() {
        let mut raw = encode_asset_swap(&asset_swap_fixture());
        raw[0] = 0x17;
        assert_eq!(parse(&raw), Err(PayloadError::UnknownContext(0x17)));
    }

    #[test]
    fn rejects_truncated_payload() {
        let raw = encode_asset_swap(&asset_swap_fixture());
        assert!(matches!(
            parse(&raw[..200]),
            Err(PayloadError::TooShort { .. })
        ));
    }
}
