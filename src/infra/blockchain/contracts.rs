//! The on-chain surface the pipeline invokes: calldata builders, return-data
//! decoders, and event topics/decoders for the factory, vault, interface and
//! ERC-20 contracts.

use {
    crate::domain::{
        eth::{Address, H256, U256},
        payload::Bytes65,
    },
    web3::{
        ethabi::{self, ParamType, Token},
        signing::keccak256,
        types::Log,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum AbiError {
    #[error("malformed return data: {0}")]
    ReturnData(String),
    #[error("log is missing its identifier topic")]
    MissingTopic,
    #[error(transparent)]
    Ethabi(#[from] ethabi::Error),
}

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend(ethabi::encode(tokens));
    data
}

// `CatalystFactory.isCreatedByFactory(deployer, vault)`
pub fn is_created_by_factory_call(deployer: Address, vault: Address) -> Vec<u8> {
    encode_call(
        "isCreatedByFactory(address,address)",
        &[Token::Address(deployer), Token::Address(vault)],
    )
}

// `CatalystVault._tokenIndexing(index)`
pub fn token_indexing_call(index: u8) -> Vec<u8> {
    encode_call("_tokenIndexing(uint256)", &[Token::Uint(index.into())])
}

// `CatalystVault.calcReceiveAsset(toAsset, units)`
pub fn calc_receive_asset_call(to_asset: Address, units: U256) -> Vec<u8> {
    encode_call(
        "calcReceiveAsset(address,uint256)",
        &[Token::Address(to_asset), Token::Uint(units)],
    )
}

// `CatalystChainInterface.underwriteAndCheckConnection(...)`
#[allow(clippy::too_many_arguments)]
pub fn underwrite_and_check_connection_call(
    source_identifier: H256,
    from_vault: &Bytes65,
    to_vault: Address,
    to_asset: Address,
    units: U256,
    min_out: U256,
    to_account: &Bytes65,
    underwrite_incentive_x16: u16,
    cdata: &[u8],
) -> Vec<u8> {
    encode_call(
        "underwriteAndCheckConnection(bytes32,bytes,address,address,uint256,uint256,bytes,uint16,\
         bytes)",
        &[
            Token::FixedBytes(source_identifier.as_bytes().to_vec()),
            Token::Bytes(from_vault.as_bytes().to_vec()),
            Token::Address(to_vault),
            Token::Address(to_asset),
            Token::Uint(units),
            Token::Uint(min_out),
            Token::Bytes(to_account.as_bytes().to_vec()),
            Token::Uint(underwrite_incentive_x16.into()),
            Token::Bytes(cdata.to_vec()),
        ],
    )
}

// ERC-20
pub fn approve_call(spender: Address, amount: U256) -> Vec<u8> {
    encode_call(
        "approve(address,uint256)",
        &[Token::Address(spender), Token::Uint(amount)],
    )
}

pub fn allowance_call(owner: Address, spender: Address) -> Vec<u8> {
    encode_call(
        "allowance(address,address)",
        &[Token::Address(owner), Token::Address(spender)],
    )
}

pub fn balance_of_call(owner: Address) -> Vec<u8> {
    encode_call("balanceOf(address)", &[Token::Address(owner)])
}

pub fn decode_bool_return(data: &[u8]) -> Result<bool, AbiError> {
    let tokens = ethabi::decode(&[ParamType::Bool], data)?;
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_bool)
        .ok_or_else(|| AbiError::ReturnData("expected a bool".to_string()))
}

pub fn decode_address_return(data: &[u8]) -> Result<Address, AbiError> {
    let tokens = ethabi::decode(&[ParamType::Address], data)?;
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_address)
        .ok_or_else(|| AbiError::ReturnData("expected an address".to_string()))
}

pub fn decode_uint_return(data: &[u8]) -> Result<U256, AbiError> {
    let tokens = ethabi::decode(&[ParamType::Uint(256)], data)?;
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| AbiError::ReturnData("expected a uint256".to_string()))
}

// Events emitted by the destination interface.

const SWAP_UNDERWRITTEN_SIGNATURE: &str =
    "SwapUnderwritten(bytes32,address,uint96,address,address,uint256,address,uint256)";
const FULFILL_UNDERWRITE_SIGNATURE: &str = "FulfillUnderwrite(bytes32)";
const EXPIRE_UNDERWRITE_SIGNATURE: &str = "ExpireUnderwrite(bytes32,address,uint256)";

pub fn swap_underwritten_topic() -> H256 {
    H256(keccak256(SWAP_UNDERWRITTEN_SIGNATURE.as_bytes()))
}

pub fn fulfill_underwrite_topic() -> H256 {
    H256(keccak256(FULFILL_UNDERWRITE_SIGNATURE.as_bytes()))
}

pub fn expire_underwrite_topic() -> H256 {
    H256(keccak256(EXPIRE_UNDERWRITE_SIGNATURE.as_bytes()))
}

#[derive(Clone, Debug, PartialEq)]
pub struct SwapUnderwrittenLog {
    pub identifier: H256,
    pub underwriter: Address,
    pub expiry: U256,
    pub target_vault: Address,
    pub to_asset: Address,
    pub units: U256,
    pub to_account: Address,
    pub out_amount: U256,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FulfillUnderwriteLog {
    pub identifier: H256,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExpireUnderwriteLog {
    pub identifier: H256,
    pub expirer: Address,
    pub reward: U256,
}

fn identifier_topic(log: &Log) -> Result<H256, AbiError> {
    log.topics.get(1).copied().ok_or(AbiError::MissingTopic)
}

fn take_address(tokens: &mut impl Iterator<Item = Token>) -> Result<Address, AbiError> {
    tokens
        .next()
        .and_then(Token::into_address)
        .ok_or_else(|| AbiError::ReturnData("expected an address".to_string()))
}

fn take_uint(tokens: &mut impl Iterator<Item = Token>) -> Result<U256, AbiError> {
    tokens
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| AbiError::ReturnData("expected a uint".to_string()))
}

pub fn decode_swap_underwritten(log: &Log) -> Result<SwapUnderwrittenLog, AbiError> {
    let identifier = identifier_topic(log)?;
    let tokens = ethabi::decode(
        &[
            ParamType::Address,
            ParamType::Uint(96),
            ParamType::Address,
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::Address,
            ParamType::Uint(256),
        ],
        &log.data.0,
    )?;
    let mut tokens = tokens.into_iter();
    Ok(SwapUnderwrittenLog {
        identifier,
        underwriter: take_address(&mut tokens)?,
        expiry: take_uint(&mut tokens)?,
        target_vault: take_address(&mut tokens)?,
        to_asset: take_address(&mut tokens)?,
        units: take_uint(&mut tokens)?,
        to_account: take_address(&mut tokens)?,
        out_amount: take_uint(&mut tokens)?,
    })
}

pub fn decode_fulfill_underwrite(log: &Log) -> Result<FulfillUnderwriteLog, AbiError> {
    Ok(FulfillUnderwriteLog {
        identifier: identifier_topic(log)?,
    })
}

pub fn decode_expire_underwrite(log: &Log) -> Result<ExpireUnderwriteLog, AbiError> {
    let identifier = identifier_topic(log)?;
    let tokens = ethabi::decode(&[ParamType::Address, ParamType::Uint(256)], &log.data.0)?;
    let mut tokens = tokens.into_iter();
    Ok(ExpireUnderwriteLog {
        identifier,
        expirer: take_address(&mut tokens)?,
        reward: take_uint(&mut tokens)?,
    })
}

// The approved vault proxy pattern: a minimal proxy whose embedded target
// must be one of the whitelisted vault templates.

const MINIMAL_PROXY_PREFIX: [u8; 11] = [
    0x3d, 0x3d, 0x3d, 0x3d, 0x36, 0x3d, 0x3d, 0x37, 0x36, 0x3d, 0x73,
];
const MINIMAL_PROXY_SUFFIX: [u8; 13] = [
    0x5a, 0xf4, 0x3d, 0x3d, 0x93, 0x80, 0x3e, 0x60, 0x2a, 0x57, 0xfd, 0x5b, 0xf3,
];

/// Extracts the delegation target of a minimal-proxy bytecode, or `None` if
/// the code does not match the pattern.
pub fn minimal_proxy_target(code: &[u8]) -> Option<Address> {
    let expected_len = MINIMAL_PROXY_PREFIX.len() + 20 + MINIMAL_PROXY_SUFFIX.len();
    if code.len() != expected_len
        || !code.starts_with(&MINIMAL_PROXY_PREFIX)
        || !code.ends_with(&MINIMAL_PROXY_SUFFIX)
    {
        return None;
    }
    Some(Address::from_slice(
        &code[MINIMAL_PROXY_PREFIX.len()..MINIMAL_PROXY_PREFIX.len() + 20],
    ))
}

/// Builds minimal-proxy bytecode for a target. Test fixture helper.
pub fn minimal_proxy_code(target: Address) -> Vec<u8> {
    let mut code = MINIMAL_PROXY_PREFIX.to_vec();
    code.extend_from_slice(target.as_bytes());
    code.extend_from_slice(&MINIMAL_PROXY_SUFFIX);
    code
}

/// Builds a [`Log`] carrying the given topics and ABI data. Test fixture
/// helper.
#[cfg(test)]
pub(crate) fn log_fixture(topics: Vec<H256>, data: Vec<u8>) -> Log {
    Log {
        address: Address::zero(),
        topics,
        data: web3::types::Bytes(data),
        block_hash: None,
        block_number: None,
        transaction_hash: None,
        transaction_index: None,
        log_index: None,
        transaction_log_index: None,
        log_type: None,
        removed: None,
    }
}
