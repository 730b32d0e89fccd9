//! The state of a swap observed from its source chain.

use {
    crate::{
        domain::{
            eth::{Address, ChainId, H256, TxHash, U256},
            payload::Bytes65,
        },
        util::serialize,
    },
    serde::{Deserialize, Serialize},
    serde_with::serde_as,
};

/// A swap observed from the source chain, keyed by
/// `(fromChainId, fromVault, swapId)`. Created when the AMB message for the
/// swap is received and its source block has been observed. Never deleted.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapState {
    pub from_chain_id: ChainId,
    pub from_vault: Address,
    pub swap_id: H256,
    pub status: SwapStatus,

    pub to_chain_id: ChainId,
    pub to_vault: Address,
    pub to_account: Bytes65,
    #[serde_as(as = "serialize::U256")]
    pub units: U256,
    pub to_asset_index: u8,
    #[serde_as(as = "serialize::U256")]
    pub min_out: U256,
    #[serde_as(as = "serialize::U256")]
    pub from_amount: U256,
    pub from_asset: Address,
    /// The source-chain block number encoded in the payload, mod 2³².
    pub block_number: u32,
    pub underwrite_incentive_x16: u16,
    #[serde_as(as = "serialize::Hex")]
    pub calldata: Vec<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amb_message_send_asset_details: Option<AmbMessageSendAssetDetails>,
    /// Attached by discovery once the destination asset is resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_asset: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_underwrite_id: Option<H256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_asset_event: Option<ReceiveAssetEvent>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SwapStatus {
    Pending,
    Completed,
}

/// Details of the AMB message that carried the swap, as reported by the
/// relayer and validated against the local chain monitor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmbMessageSendAssetDetails {
    pub amb: String,
    pub message_identifier: H256,
    pub from_incentives_address: Address,
    /// Populated inconsistently by upstream producers; never required
    /// downstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_incentives_address: Option<Address>,
    /// The destination-chain interface the message is addressed to.
    pub to_application: Address,
    /// Maximum gas the relayer delivers with (from the envelope).
    pub max_gas_delivery: u64,
    /// Unix-seconds relay deadline, when the AMB carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<u64>,
    pub block_number: u64,
    pub block_hash: H256,
    pub transaction_hash: TxHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_block_number: Option<u64>,
    /// Unix seconds at which the listener committed this observation.
    pub observed_at: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveAssetEvent {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub block_timestamp: u64,
}

/// The minimal description by which a swap can be recovered from the store.
/// Published on the send-asset channel and kept in the
/// expected-underwrite index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapDescription {
    pub from_chain_id: ChainId,
    pub from_vault: Address,
    pub swap_id: H256,
    pub to_chain_id: ChainId,
}

impl SwapState {
    pub fn description(&self) -> SwapDescription {
        SwapDescription {
            from_chain_id: self.from_chain_id.clone(),
            from_vault: self.from_vault,
            swap_id: self.swap_id,
            to_chain_id: self.to_chain_id.clone(),
        }
    }

    /// Merges a newer observation into an existing entry. Non-nil sub-records
    /// in the new value replace; the status is recomputed from the presence
    /// of the receive-asset event.
    pub fn merged_with(&self, newer: Self) -> Self {
        let mut merged = newer;
        if merged.amb_message_send_asset_details.is_none() {
            merged.amb_message_send_asset_details = self.amb_message_send_asset_details.clone();
        }
        if merged.to_asset.is_none() {
            merged.to_asset = self.to_asset;
        }
        if merged.expected_underwrite_id.is_none() {
            merged.expected_underwrite_id = self.expected_underwrite_id;
        }
        if merged.receive_asset_event.is_none() {
            merged.receive_asset_event = self.receive_asset_event.clone();
        }
        merged.recompute_status();
        merged
    }

    pub fn recompute_status(&mut self) {
        self.status = if self.receive_asset_event.is_some() {
            SwapStatus::Completed
        } else {
            SwapStatus::Pending
        };
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn swap_state_fixture() -> SwapState {
        SwapState {
            from_chain_id: ChainId::new("11155111"),
            from_vault: Address::repeat_byte(0xaa),
            swap_id: H256::repeat_byte(0x11),
            status: SwapStatus::Pending,
            to_chain_id: ChainId::new("80001"),
            to_vault: Address::repeat_byte(0xbb),
            to_account: Bytes65::from_evm_address(Address::repeat_byte(0xcc)),
            units: U256::exp10(20),
            to_asset_index: 0,
            min_out: U256::zero(),
            from_amount: U256::exp10(16),
            from_asset: Address::repeat_byte(0xdd),
            block_number: 17_000_000,
            underwrite_incentive_x16: 655,
            calldata: vec![],
            amb_message_send_asset_details: None,
            to_asset: None,
            expected_underwrite_id: None,
            receive_asset_event: None,
        }
    }

    #[test]
    fn merge_keeps_existing_sub_records() {
        let existing = SwapState {
            to_asset: Some(Address::repeat_byte(0xee)),
            ..swap_state_fixture()
        };
        let merged = existing.merged_with(swap_state_fixture());
        assert_eq!(merged.to_asset, Some(Address::repeat_byte(0xee)));
    }

    #[test]
    fn merge_recomputes_status_from_receive_asset() {
        let incoming = SwapState {
            receive_asset_event: Some(ReceiveAssetEvent {
                transaction_hash: TxHash::repeat_byte(0x99),
                block_number: 100,
                block_timestamp: 1_700_000_000,
            }),
            ..swap_state_fixture()
        };
        let merged = swap_state_fixture().merged_with(incoming);
        assert_eq!(merged.status, SwapStatus::Completed);
    }

    #[test]
    fn big_integers_serialize_as_decimal_strings() {
        let value = serde_json::to_value(swap_state_fixture()).unwrap();
        assert_eq!(value["units"], "100000000000000000000");
        assert_eq!(value["fromAmount"], "10000000000000000");
    }
}
