//! Validated domain configuration, produced from the raw file format.

use {
    crate::domain::{
        eth::{Address, ChainId, H256, U256},
        order::RelayDeliveryCosts,
    },
    bigdecimal::BigDecimal,
    itertools::Itertools,
    std::{collections::HashMap, net::SocketAddr, path::Path, time::Duration},
};

pub mod file;

#[derive(Clone, Debug)]
pub struct Config {
    pub api_addr: SocketAddr,
    pub redis_url: Option<String>,
    pub relayer: RelayerConfig,
    pub ambs: HashMap<String, AmbConfig>,
    pub wallet: WalletConfig,
    pub chains: Vec<ChainConfig>,
}

#[derive(Clone, Debug)]
pub struct RelayerConfig {
    pub ws_url: String,
    pub http_url: Option<reqwest::Url>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AmbConfig {
    pub relay_prioritisation: bool,
}

#[derive(Clone, Debug)]
pub struct WalletConfig {
    pub account: Address,
    pub receipt_poll_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub rpc: String,
    pub resolver: Option<String>,
    pub starting_block: Option<i64>,
    pub retry_interval: Duration,
    pub processing_interval: Duration,
    pub max_blocks: Option<u64>,
    pub max_pending_transactions: usize,
    pub max_tries: u32,
    pub min_relay_deadline_duration: Duration,
    pub min_max_gas_delivery: u64,
    pub underwrite_delay: Duration,
    pub max_underwrite_delay: Duration,
    pub max_submission_delay: Duration,
    pub underwriting_collateral: BigDecimal,
    pub allowance_buffer: BigDecimal,
    pub max_underwrite_allowed: Option<U256>,
    pub min_underwrite_reward: U256,
    pub relative_min_underwrite_reward: BigDecimal,
    pub profitability_factor: BigDecimal,
    pub low_token_balance_warning: Option<U256>,
    pub token_balance_update_interval: u64,
    pub max_gas_limit: Option<U256>,
    pub swap_id_uses_l1_block_number: bool,
    pub relay_delivery_costs: RelayDeliveryCosts,
    pub tokens: HashMap<Address, TokenConfig>,
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Clone, Debug)]
pub struct TokenConfig {
    pub token_id: String,
    pub allowance_buffer: Option<BigDecimal>,
    pub approval_buffer: Option<U256>,
    pub max_underwrite_allowed: Option<U256>,
    pub min_underwrite_reward: Option<U256>,
    pub low_balance_warning: Option<U256>,
}

#[derive(Clone, Debug)]
pub struct EndpointConfig {
    pub interface_address: Address,
    pub incentives_address: Address,
    pub factory_address: Address,
    pub vault_templates: Vec<Address>,
    pub channels_on_destination: HashMap<ChainId, H256>,
    pub relay_delivery_costs: Option<RelayDeliveryCosts>,
}

impl ChainConfig {
    pub fn endpoint_for_interface(&self, interface: Address) -> Option<&EndpointConfig> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.interface_address == interface)
    }

    pub fn token(&self, address: Address) -> Option<&TokenConfig> {
        self.tokens.get(&address)
    }

    pub fn approval_buffer_for(&self, token: Address) -> Option<U256> {
        self.token(token).and_then(|token| token.approval_buffer)
    }

    pub fn allowance_buffer_for(&self, token: Address) -> &BigDecimal {
        self.token(token)
            .and_then(|token| token.allowance_buffer.as_ref())
            .unwrap_or(&self.allowance_buffer)
    }

    pub fn max_underwrite_allowed_for(&self, token: Address) -> Option<U256> {
        self.token(token)
            .and_then(|token| token.max_underwrite_allowed)
            .or(self.max_underwrite_allowed)
    }

    pub fn min_underwrite_reward_for(&self, token: Address) -> U256 {
        self.token(token)
            .and_then(|token| token.min_underwrite_reward)
            .unwrap_or(self.min_underwrite_reward)
    }

    pub fn low_balance_warning_for(&self, token: Address) -> Option<U256> {
        self.token(token)
            .and_then(|token| token.low_balance_warning)
            .or(self.low_token_balance_warning)
    }
}

/// Load the underwriter configuration from a TOML file.
///
/// # Panics
///
/// This method panics if the config is invalid or on I/O errors.
pub async fn load(path: &Path) -> Config {
    from_file(file::load(path).await)
}

fn from_file(raw: file::Config) -> Config {
    let chains: Vec<_> = raw.chains.into_iter().map(chain_from_file).collect();

    assert!(!chains.is_empty(), "config declares no chains");
    if let Some(id) = chains.iter().map(|chain| &chain.chain_id).duplicates().next() {
        panic!("config declares chain {id} more than once");
    }

    Config {
        api_addr: raw.api.addr,
        redis_url: raw.store.redis_url,
        relayer: RelayerConfig {
            ws_url: raw.relayer.ws_url,
            http_url: raw.relayer.http_url.map(|url| {
                url.parse()
                    .unwrap_or_else(|err| panic!("invalid relayer http-url: {err}"))
            }),
        },
        ambs: raw
            .ambs
            .into_iter()
            .map(|(name, amb)| {
                (
                    name,
                    AmbConfig {
                        relay_prioritisation: amb.relay_prioritisation,
                    },
                )
            })
            .collect(),
        wallet: WalletConfig {
            account: raw.wallet.account,
            receipt_poll_interval: raw.wallet.receipt_poll_interval,
        },
        chains,
    }
}

fn chain_from_file(raw: file::Chain) -> ChainConfig {
    let chain_id = ChainId::new(&raw.chain_id);
    assert!(
        raw.min_relay_deadline_duration >= Duration::from_secs(60 * 60),
        "chain {chain_id}: min-relay-deadline-duration must be at least one hour",
    );
    assert!(
        !raw.endpoints.is_empty(),
        "chain {chain_id}: at least one endpoint is required",
    );
    assert!(
        raw.max_pending_transactions > 0,
        "chain {chain_id}: max-pending-transactions must be positive",
    );

    ChainConfig {
        relay_delivery_costs: delivery_costs_from_file(&chain_id, raw.relay_delivery_costs),
        endpoints: raw
            .endpoints
            .into_iter()
            .map(|endpoint| endpoint_from_file(&chain_id, endpoint))
            .collect(),
        tokens: raw
            .tokens
            .into_iter()
            .map(|(address, token)| {
                (
                    address,
                    TokenConfig {
                        token_id: token.token_id,
                        allowance_buffer: token.allowance_buffer,
                        approval_buffer: token.approval_buffer,
                        max_underwrite_allowed: token.max_underwrite_allowed,
                        min_underwrite_reward: token.min_underwrite_reward,
                        low_balance_warning: token.low_balance_warning,
                    },
                )
            })
            .collect(),
        chain_id,
        rpc: raw.rpc,
        resolver: raw.resolver,
        starting_block: raw.starting_block,
        retry_interval: raw.retry_interval,
        processing_interval: raw.processing_interval,
        max_blocks: raw.max_blocks,
        max_pending_transactions: raw.max_pending_transactions,
        max_tries: raw.max_tries,
        min_relay_deadline_duration: raw.min_relay_deadline_duration,
        min_max_gas_delivery: raw.min_max_gas_delivery,
        underwrite_delay: raw.underwrite_delay,
        max_underwrite_delay: raw.max_underwrite_delay,
        max_submission_delay: raw.max_submission_delay,
        underwriting_collateral: raw.underwriting_collateral,
        allowance_buffer: raw.allowance_buffer,
        max_underwrite_allowed: raw.max_underwrite_allowed,
        min_underwrite_reward: raw.min_underwrite_reward,
        relative_min_underwrite_reward: raw.relative_min_underwrite_reward,
        profitability_factor: raw.profitability_factor,
        low_token_balance_warning: raw.low_token_balance_warning,
        token_balance_update_interval: raw.token_balance_update_interval,
        max_gas_limit: raw.max_gas_limit,
        swap_id_uses_l1_block_number: raw.swap_id_uses_l1_block_number,
    }
}

fn delivery_costs_from_file(
    chain_id: &ChainId,
    raw: file::RelayDeliveryCosts,
) -> RelayDeliveryCosts {
    let gas_observed = raw.gas_observed.unwrap_or(raw.gas_usage);
    assert!(
        gas_observed <= raw.gas_usage,
        "chain {chain_id}: relay-delivery-costs gas-observed exceeds gas-usage",
    );
    RelayDeliveryCosts {
        gas_usage: raw.gas_usage,
        gas_observed,
        fee: raw.fee,
        value: raw.value,
    }
}

fn endpoint_from_file(chain_id: &ChainId, raw: file::Endpoint) -> EndpointConfig {
    assert!(
        !raw.vault_templates.is_empty(),
        "chain {chain_id}: endpoint 0x{:x} whitelists no vault templates",
        raw.interface_address,
    );
    EndpointConfig {
        interface_address: raw.interface_address,
        incentives_address: raw.incentives_address,
        factory_address: raw.factory_address,
        vault_templates: raw.vault_templates,
        channels_on_destination: raw
            .channels_on_destination
            .into_iter()
            .map(|(peer, channel)| (ChainId::new(peer), channel))
            .collect(),
        relay_delivery_costs: raw
            .relay_delivery_costs
            .map(|costs| delivery_costs_from_file(chain_id, costs)),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::io::Write};

    const EXAMPLE: &str = r#"
[relayer]
ws-url = "ws://relayer:8080"
http-url = "http://relayer:8080"

[ambs.wormhole]
relay-prioritisation = true

[wallet]
account = "0x7777777777777777777777777777777777777777"

[[chains]]
chain-id = "80001"
rpc = "http://localhost:8545"
starting-block = -128
underwrite-delay = "500ms"
min-underwrite-reward = "1000000000000"
relative-min-underwrite-reward = "0.001"
profitability-factor = "1.5"

[chains.relay-delivery-costs]
gas-usage = "200000"
gas-observed = "180000"
fee = "1000000000"

[chains.tokens.0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee]
token-id = "USDC"
allowance-buffer = "0.10"
max-underwrite-allowed = "5000000000000000000000"

[[chains.endpoints]]
interface-address = "0x1f1f1f1f1f1f1f1f1f1f1f1f1f1f1f1f1f1f1f1f"
incentives-address = "0x2222222222222222222222222222222222222222"
factory-address = "0x3333333333333333333333333333333333333333"
vault-templates = ["0x4444444444444444444444444444444444444444"]

[chains.endpoints.channels-on-destination]
"11155111" = "0x8000000000000000000000000000000000000000000000000000000000000001"
"#;

    #[tokio::test]
    async fn loads_example_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXAMPLE.as_bytes()).unwrap();

        let config = load(file.path()).await;
        assert_eq!(config.chains.len(), 1);
        let chain = &config.chains[0];
        assert_eq!(chain.chain_id, ChainId::new("80001"));
        assert_eq!(chain.starting_block, Some(-128));
        assert_eq!(chain.underwrite_delay, Duration::from_millis(500));
        // Defaults kick in where the file is silent.
        assert_eq!(chain.max_tries, 3);
        assert_eq!(chain.allowance_buffer, "0.05".parse().unwrap());

        let token = chain
            .token("0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee".parse().unwrap())
            .unwrap();
        assert_eq!(token.token_id, "USDC");
        assert_eq!(
            chain.allowance_buffer_for("0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee".parse().unwrap()),
            &"0.10".parse().unwrap(),
        );

        let endpoint = &chain.endpoints[0];
        assert_eq!(
            endpoint
                .channels_on_destination
                .get(&ChainId::new("11155111"))
                .unwrap(),
            &"0x8000000000000000000000000000000000000000000000000000000000000001"
                .parse()
                .unwrap(),
        );
        assert!(config.ambs["wormhole"].relay_prioritisation);
    }

    #[tokio::test]
    #[should_panic(expected = "min-relay-deadline-duration")]
    async fn rejects_short_relay_deadline() {
        let raw = EXAMPLE.replace(
            "underwrite-delay = \"500ms\"",
            "underwrite-delay = \"500ms\"\nmin-relay-deadline-duration = \"10m\"",
        );
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(raw.as_bytes()).unwrap();
        load(file.path()).await;
    }
}
