//! The order ladder: the in-memory representations of a prospective
//! underwrite as it moves through the pipeline stages.

use {
    crate::domain::{
        eth::{Address, H256, TxHash, U256},
        swap::{AmbMessageSendAssetDetails, SwapState},
    },
    chrono::{DateTime, Utc},
};

/// What relaying the AMB message to this chain is expected to cost.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayDeliveryCosts {
    pub gas_usage: U256,
    /// The portion of `gas_usage` priced at the current gas price when
    /// estimating; never exceeds `gas_usage`.
    pub gas_observed: U256,
    pub fee: U256,
    pub value: U256,
}

/// A swap snapshot destined for this chain, awaiting vault validation.
#[derive(Clone, Debug)]
pub struct DiscoverOrder {
    pub swap: SwapState,
    /// The AMB details of the swap, lifted out of the snapshot so the
    /// pipeline does not deal in optionals.
    pub amb: AmbMessageSendAssetDetails,
}

impl DiscoverOrder {
    /// The destination interface the AMB message is addressed to.
    pub fn interface_address(&self) -> Address {
        self.amb.to_application
    }
}

/// A validated order, ready for profitability evaluation.
#[derive(Clone, Debug)]
pub struct EvalOrder {
    pub swap: SwapState,
    pub amb: AmbMessageSendAssetDetails,
    pub interface_address: Address,
    pub to_asset: Address,
    pub expected_underwrite_id: H256,
    /// The channel id by which the destination vault addresses the source
    /// chain.
    pub source_identifier: H256,
    pub relay_delivery_costs: RelayDeliveryCosts,
}

/// An order that passed evaluation and is committed to submission.
#[derive(Clone, Debug)]
pub struct UnderwriteOrder {
    pub swap: SwapState,
    pub amb: AmbMessageSendAssetDetails,
    pub interface_address: Address,
    pub to_asset: Address,
    pub expected_underwrite_id: H256,
    pub source_identifier: H256,
    pub expected_return: U256,
    /// Reserved allowance, an overestimate of the expected output.
    pub to_asset_allowance: U256,
    pub gas_limit: U256,
    pub relay_cost: U256,
    pub underwrite_reward: U256,
    pub submission_deadline: DateTime<Utc>,
}

/// The receipt of a submitted underwrite.
#[derive(Clone, Debug)]
pub struct UnderwriteOrderResult {
    pub tx_hash: TxHash,
    pub receipt: web3::types::TransactionReceipt,
}
