//! Mock collaborators for pipeline tests: the wallet contract and config
//! fixtures. Tests mock the wallet contract, never the EVM.

use {
    crate::{
        domain::{
            eth::{Address, ChainId, H256, TxHash, U256},
            order::RelayDeliveryCosts,
        },
        infra::{
            config::{ChainConfig, EndpointConfig, TokenConfig},
            wallet::{
                SubmitOptions, SubmitOutcome, Transaction, TransactionMetadata, Wallet,
                WalletError, WalletErrorKind,
            },
        },
    },
    async_trait::async_trait,
    maplit::hashmap,
    std::{
        sync::{Arc, Mutex},
        time::Duration,
    },
    web3::types::TransactionReceipt,
};

pub fn receipt_fixture(tx_hash: TxHash) -> TransactionReceipt {
    serde_json::from_value(serde_json::json!({
        "transactionHash": tx_hash,
        "transactionIndex": "0x0",
        "blockHash": H256::repeat_byte(0x0b),
        "blockNumber": "0x64",
        "from": Address::repeat_byte(0x77),
        "to": null,
        "cumulativeGasUsed": "0x5208",
        "gasUsed": "0x5208",
        "contractAddress": null,
        "logs": [],
        "status": "0x1",
        "logsBloom": format!("0x{}", "00".repeat(256)),
    }))
    .expect("a complete receipt deserializes")
}

/// What the mock wallet should answer with.
#[derive(Clone, Copy, Debug)]
pub enum MockBehavior {
    Confirm,
    RejectSubmission(WalletErrorKind),
    FailConfirmation(WalletErrorKind),
}

pub struct MockWallet {
    behavior: MockBehavior,
    submissions: Mutex<Vec<(Transaction, TransactionMetadata, SubmitOptions)>>,
}

impl MockWallet {
    pub fn new(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            submissions: Mutex::new(Vec::new()),
        })
    }

    pub fn confirming() -> Arc<Self> {
        Self::new(MockBehavior::Confirm)
    }

    pub fn rejecting() -> Arc<Self> {
        Self::new(MockBehavior::RejectSubmission(WalletErrorKind::Rpc))
    }

    pub fn submissions(&self) -> Vec<(Transaction, TransactionMetadata, SubmitOptions)> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Wallet for MockWallet {
    async fn submit(
        &self,
        transaction: Transaction,
        metadata: TransactionMetadata,
        options: SubmitOptions,
    ) -> SubmitOutcome {
        self.submissions
            .lock()
            .unwrap()
            .push((transaction, metadata, options));
        let nth = self.submissions.lock().unwrap().len() as u8;
        match self.behavior {
            MockBehavior::Confirm => {
                let tx_hash = TxHash::repeat_byte(0xf0 ^ nth);
                SubmitOutcome::Confirmed {
                    tx_hash,
                    receipt: receipt_fixture(tx_hash),
                }
            }
            MockBehavior::RejectSubmission(kind) => SubmitOutcome::SubmissionError(WalletError {
                kind,
                message: "mock submission error".to_string(),
            }),
            MockBehavior::FailConfirmation(kind) => {
                SubmitOutcome::ConfirmationError(WalletError {
                    kind,
                    message: "mock confirmation error".to_string(),
                })
            }
        }
    }
}

pub const INTERFACE: Address = Address::repeat_byte(0x1f);
pub const INCENTIVES: Address = Address::repeat_byte(0x22);
pub const FACTORY: Address = Address::repeat_byte(0x33);
pub const VAULT_TEMPLATE: Address = Address::repeat_byte(0x44);
pub const TO_ASSET: Address = Address::repeat_byte(0xee);

pub fn channel_to_sepolia() -> H256 {
    let mut channel = H256::zero();
    channel.0[31] = 0x01;
    channel
}

pub fn chain_config_fixture() -> ChainConfig {
    ChainConfig {
        chain_id: ChainId::new("80001"),
        rpc: "http://localhost:8545".to_string(),
        resolver: None,
        starting_block: None,
        retry_interval: Duration::from_millis(10),
        processing_interval: Duration::from_millis(10),
        max_blocks: Some(1_000),
        max_pending_transactions: 10,
        max_tries: 3,
        min_relay_deadline_duration: Duration::from_secs(60 * 60),
        min_max_gas_delivery: 100_000,
        underwrite_delay: Duration::from_millis(0),
        max_underwrite_delay: Duration::from_secs(300),
        max_submission_delay: Duration::from_secs(300),
        underwriting_collateral: "0.035".parse().unwrap(),
        allowance_buffer: "0.05".parse().unwrap(),
        max_underwrite_allowed: None,
        min_underwrite_reward: U256::zero(),
        relative_min_underwrite_reward: "0".parse().unwrap(),
        profitability_factor: "1.0".parse().unwrap(),
        low_token_balance_warning: None,
        token_balance_update_interval: 10,
        max_gas_limit: None,
        swap_id_uses_l1_block_number: false,
        relay_delivery_costs: RelayDeliveryCosts {
            gas_usage: U256::from(200_000_u64),
            gas_observed: U256::from(180_000_u64),
            fee: U256::from(1_000_000_000_u64),
            value: U256::zero(),
        },
        tokens: hashmap! {
            TO_ASSET => TokenConfig {
                token_id: "TST".to_string(),
                allowance_buffer: None,
                approval_buffer: Some(U256::from(10_u64)),
                max_underwrite_allowed: None,
                min_underwrite_reward: None,
                low_balance_warning: None,
            },
        },
        endpoints: vec![EndpointConfig {
            interface_address: INTERFACE,
            incentives_address: INCENTIVES,
            factory_address: FACTORY,
            vault_templates: vec![VAULT_TEMPLATE],
            channels_on_destination: hashmap! {
                ChainId::new("11155111") => channel_to_sepolia(),
            },
            relay_delivery_costs: None,
        }],
    }
}
