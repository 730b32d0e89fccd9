//! Raw on-disk configuration format.

use {
    crate::{
        domain::eth::{Address, H256, U256},
        util::serialize,
    },
    bigdecimal::BigDecimal,
    serde::Deserialize,
    serde_with::serde_as,
    std::{collections::HashMap, net::SocketAddr, path::Path, time::Duration},
};

#[serde_as]
#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub api: Api,

    #[serde(default)]
    pub store: Store,

    pub relayer: Relayer,

    /// Per-AMB settings, keyed by the AMB name the relayer reports.
    #[serde(default)]
    pub ambs: HashMap<String, Amb>,

    pub wallet: Wallet,

    pub chains: Vec<Chain>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Api {
    /// The socket address the admin API binds to.
    #[serde(default = "default_api_addr")]
    pub addr: SocketAddr,
}

impl Default for Api {
    fn default() -> Self {
        Self {
            addr: default_api_addr(),
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Store {
    /// Redis connection URL. When absent, state lives in process memory and
    /// is lost on restart (no external expirer can attach either).
    #[serde(default)]
    pub redis_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Relayer {
    /// The WebSocket endpoint serving AMB message events.
    pub ws_url: String,

    /// The HTTP endpoint accepting message prioritisation requests.
    #[serde(default)]
    pub http_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Amb {
    /// Whether successfully underwritten swaps should be prioritised with
    /// the relayer.
    #[serde(default)]
    pub relay_prioritisation: bool,
}

#[serde_as]
#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Wallet {
    /// The account underwrites are sent from. The node (or signing proxy)
    /// behind the chain RPC must be able to sign for it.
    pub account: Address,

    /// How often to poll for a submitted transaction's receipt.
    #[serde(with = "humantime_serde", default = "default_receipt_poll_interval")]
    pub receipt_poll_interval: Duration,
}

#[serde_as]
#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Chain {
    pub chain_id: String,

    /// The chain RPC endpoint.
    pub rpc: String,

    /// Optional second RPC used to resolve block queries when the primary
    /// serves a sequenced view (Arbitrum-like setups).
    #[serde(default)]
    pub resolver: Option<String>,

    /// Absolute first block to scan, or a negative offset relative to the
    /// chain head at startup. Defaults to the head.
    #[serde(default)]
    pub starting_block: Option<i64>,

    #[serde(with = "humantime_serde", default = "default_retry_interval")]
    pub retry_interval: Duration,

    #[serde(with = "humantime_serde", default = "default_processing_interval")]
    pub processing_interval: Duration,

    /// Upper bound on the block range of a single log query.
    #[serde(default)]
    pub max_blocks: Option<u64>,

    #[serde(default = "default_max_pending_transactions")]
    pub max_pending_transactions: usize,

    #[serde(default = "default_max_tries")]
    pub max_tries: u32,

    /// Minimum remaining AMB relay deadline for a swap to be considered.
    /// Must be at least one hour.
    #[serde(with = "humantime_serde", default = "default_min_relay_deadline_duration")]
    pub min_relay_deadline_duration: Duration,

    /// Minimum delivery gas an AMB message must carry.
    #[serde(default)]
    pub min_max_gas_delivery: u64,

    #[serde(with = "humantime_serde", default)]
    pub underwrite_delay: Duration,

    /// Swaps older than this are not underwritten.
    #[serde(with = "humantime_serde", default = "default_max_underwrite_delay")]
    pub max_underwrite_delay: Duration,

    #[serde(with = "humantime_serde", default = "default_max_submission_delay")]
    pub max_submission_delay: Duration,

    /// The share of an underwrite withheld by the protocol as collateral.
    #[serde(default = "default_underwriting_collateral")]
    pub underwriting_collateral: BigDecimal,

    /// Relative overestimate applied to the expected output when reserving
    /// token allowance.
    #[serde(default = "default_allowance_buffer")]
    pub allowance_buffer: BigDecimal,

    #[serde_as(as = "Option<serialize::U256>")]
    #[serde(default)]
    pub max_underwrite_allowed: Option<U256>,

    #[serde_as(as = "serialize::U256")]
    #[serde(default)]
    pub min_underwrite_reward: U256,

    #[serde(default)]
    pub relative_min_underwrite_reward: BigDecimal,

    #[serde(default = "default_profitability_factor")]
    pub profitability_factor: BigDecimal,

    #[serde_as(as = "Option<serialize::U256>")]
    #[serde(default)]
    pub low_token_balance_warning: Option<U256>,

    /// Wallet balances are re-queried after this many spending transactions.
    #[serde(default = "default_token_balance_update_interval")]
    pub token_balance_update_interval: u64,

    /// Underwrites whose estimated gas exceeds this are dropped.
    #[serde_as(as = "Option<serialize::U256>")]
    #[serde(default)]
    pub max_gas_limit: Option<U256>,

    /// Derive swap identifiers from the transaction block number the relayer
    /// reports instead of the message block number (Arbitrum-like chains
    /// encode the L1 block number in the payload).
    #[serde(default)]
    pub swap_id_uses_l1_block_number: bool,

    pub relay_delivery_costs: RelayDeliveryCosts,

    #[serde(default)]
    pub tokens: HashMap<Address, Token>,

    pub endpoints: Vec<Endpoint>,
}

#[serde_as]
#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RelayDeliveryCosts {
    #[serde_as(as = "serialize::U256")]
    pub gas_usage: U256,

    /// The portion of `gas-usage` priced at the live gas price; must not
    /// exceed it. Defaults to `gas-usage`.
    #[serde_as(as = "Option<serialize::U256>")]
    #[serde(default)]
    pub gas_observed: Option<U256>,

    #[serde_as(as = "serialize::U256")]
    #[serde(default)]
    pub fee: U256,

    #[serde_as(as = "serialize::U256")]
    #[serde(default)]
    pub value: U256,
}

#[serde_as]
#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Token {
    pub token_id: String,

    #[serde(default)]
    pub allowance_buffer: Option<BigDecimal>,

    /// Absolute allowance slack kept on top of the required amount when
    /// approving. Without it, approvals are set to the maximum value once.
    #[serde_as(as = "Option<serialize::U256>")]
    #[serde(default)]
    pub approval_buffer: Option<U256>,

    #[serde_as(as = "Option<serialize::U256>")]
    #[serde(default)]
    pub max_underwrite_allowed: Option<U256>,

    #[serde_as(as = "Option<serialize::U256>")]
    #[serde(default)]
    pub min_underwrite_reward: Option<U256>,

    #[serde_as(as = "Option<serialize::U256>")]
    #[serde(default)]
    pub low_balance_warning: Option<U256>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Endpoint {
    pub interface_address: Address,
    pub incentives_address: Address,
    pub factory_address: Address,
    pub vault_templates: Vec<Address>,

    /// The channel id by which this chain's vaults address each peer chain.
    pub channels_on_destination: HashMap<String, H256>,

    #[serde(default)]
    pub relay_delivery_costs: Option<RelayDeliveryCosts>,
}

fn default_api_addr() -> SocketAddr {
    "0.0.0.0:9000".parse().unwrap()
}

fn default_receipt_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_processing_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_max_pending_transactions() -> usize {
    50
}

fn default_max_tries() -> u32 {
    3
}

fn default_min_relay_deadline_duration() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_max_underwrite_delay() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_submission_delay() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_underwriting_collateral() -> BigDecimal {
    "0.035".parse().unwrap()
}

fn default_allowance_buffer() -> BigDecimal {
    "0.05".parse().unwrap()
}

fn default_profitability_factor() -> BigDecimal {
    BigDecimal::from(1)
}

fn default_token_balance_update_interval() -> u64 {
    10
}

/// Reads and parses the raw configuration from a TOML file.
///
/// # Panics
///
/// This method panics if the config is invalid or on I/O errors.
pub async fn load(path: &Path) -> Config {
    let data = tokio::fs::read_to_string(path)
        .await
        .unwrap_or_else(|err| panic!("failed to read config file {path:?}: {err}"));
    toml::from_str(&data)
        .unwrap_or_else(|err| panic!("failed to parse config file {path:?}: {err}"))
}
