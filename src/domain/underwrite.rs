//! The state of an underwrite observed on the destination chain.

use {
    crate::{
        domain::eth::{Address, ChainId, H256, TxHash, U256},
        util::serialize,
    },
    serde::{Deserialize, Serialize},
    serde_with::serde_as,
};

/// An underwrite, keyed by `(toChainId, toInterface, underwriteId)`. Created
/// on the swap-underwritten event; moves to the completed key space upon a
/// fulfill or expire event. Those two outcomes are terminal and mutually
/// exclusive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnderwriteState {
    pub to_chain_id: ChainId,
    pub to_interface: Address,
    pub underwrite_id: H256,
    pub status: UnderwriteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap_underwritten_event: Option<SwapUnderwrittenEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfill_underwrite_event: Option<FulfillUnderwriteEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_underwrite_event: Option<ExpireUnderwriteEvent>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnderwriteStatus {
    Underwritten,
    Fulfilled,
    Expired,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapUnderwrittenEvent {
    pub underwriter: Address,
    #[serde_as(as = "serialize::U256")]
    pub expiry: U256,
    pub target_vault: Address,
    pub to_asset: Address,
    #[serde_as(as = "serialize::U256")]
    pub units: U256,
    pub to_account: Address,
    #[serde_as(as = "serialize::U256")]
    pub out_amount: U256,
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub block_timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillUnderwriteEvent {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub block_timestamp: u64,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpireUnderwriteEvent {
    pub expirer: Address,
    #[serde_as(as = "serialize::U256")]
    pub reward: U256,
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub block_timestamp: u64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error(
    "underwrite {underwrite_id:#x} on chain {to_chain_id} observed as both fulfilled and expired"
)]
pub struct ConflictingEventsError {
    pub to_chain_id: ChainId,
    pub underwrite_id: H256,
}

impl UnderwriteState {
    /// Merges a newer observation into an existing entry, event sub-records
    /// chronologically (non-nil incoming records replace). Observing both a
    /// fulfill and an expire event for the same identifier is an invariant
    /// violation.
    pub fn merged_with(&self, newer: Self) -> Result<Self, ConflictingEventsError> {
        let mut merged = newer;
        if merged.swap_underwritten_event.is_none() {
            merged.swap_underwritten_event = self.swap_underwritten_event.clone();
        }
        if merged.fulfill_underwrite_event.is_none() {
            merged.fulfill_underwrite_event = self.fulfill_underwrite_event.clone();
        }
        if merged.expire_underwrite_event.is_none() {
            merged.expire_underwrite_event = self.expire_underwrite_event.clone();
        }
        if merged.fulfill_underwrite_event.is_some() && merged.expire_underwrite_event.is_some() {
            return Err(ConflictingEventsError {
                to_chain_id: merged.to_chain_id,
                underwrite_id: merged.underwrite_id,
            });
        }
        merged.recompute_status();
        Ok(merged)
    }

    pub fn recompute_status(&mut self) {
        self.status = if self.fulfill_underwrite_event.is_some() {
            UnderwriteStatus::Fulfilled
        } else if self.expire_underwrite_event.is_some() {
            UnderwriteStatus::Expired
        } else {
            UnderwriteStatus::Underwritten
        };
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            UnderwriteStatus::Fulfilled | UnderwriteStatus::Expired
        )
    }

    /// The transaction hash that suffixes the completed store keys: the
    /// underwrite transaction when it was observed, otherwise the terminal
    /// event's transaction.
    pub fn completed_key_tx_hash(&self) -> Option<TxHash> {
        if let Some(event) = &self.swap_underwritten_event {
            return Some(event.transaction_hash);
        }
        if let Some(event) = &self.fulfill_underwrite_event {
            return Some(event.transaction_hash);
        }
        self.expire_underwrite_event
            .as_ref()
            .map(|event| event.transaction_hash)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn underwritten_state_fixture() -> UnderwriteState {
        UnderwriteState {
            to_chain_id: ChainId::new("80001"),
            to_interface: Address::repeat_byte(0x1f),
            underwrite_id: H256::repeat_byte(0x77),
            status: UnderwriteStatus::Underwritten,
            swap_underwritten_event: Some(SwapUnderwrittenEvent {
                underwriter: Address::repeat_byte(0x01),
                expiry: U256::from(1_700_000_000_u64),
                target_vault: Address::repeat_byte(0xbb),
                to_asset: Address::repeat_byte(0xee),
                units: U256::exp10(20),
                to_account: Address::repeat_byte(0xcc),
                out_amount: U256::exp10(18),
                transaction_hash: TxHash::repeat_byte(0xf0),
                block_number: 100,
                block_timestamp: 1_690_000_000,
            }),
            fulfill_underwrite_event: None,
            expire_underwrite_event: None,
        }
    }

    pub(crate) fn fulfill_event_fixture() -> FulfillUnderwriteEvent {
        FulfillUnderwriteEvent {
            transaction_hash: TxHash::repeat_byte(0xf1),
            block_number: 120,
            block_timestamp: 1_690_000_600,
        }
    }

    pub(crate) fn expire_event_fixture() -> ExpireUnderwriteEvent {
        ExpireUnderwriteEvent {
            expirer: Address::repeat_byte(0x02),
            reward: U256::exp10(15),
            transaction_hash: TxHash::repeat_byte(0xf2),
            block_number: 130,
            block_timestamp: 1_690_001_200,
        }
    }

    #[test]
    fn merge_is_order_independent_for_non_conflicting_events() {
        let underwritten = underwritten_state_fixture();
        let fulfilled = UnderwriteState {
            swap_underwritten_event: None,
            fulfill_underwrite_event: Some(fulfill_event_fixture()),
            ..underwritten_state_fixture()
        };

        let ab = underwritten.merged_with(fulfilled.clone()).unwrap();
        let ba = fulfilled.merged_with(underwritten).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.status, UnderwriteStatus::Fulfilled);
        assert!(ab.swap_underwritten_event.is_some());
    }

    #[test]
    fn merge_rejects_fulfill_and_expire() {
        let fulfilled = UnderwriteState {
            fulfill_underwrite_event: Some(fulfill_event_fixture()),
            ..underwritten_state_fixture()
        };
        let expired = UnderwriteState {
            expire_underwrite_event: Some(expire_event_fixture()),
            ..underwritten_state_fixture()
        };
        assert!(fulfilled.merged_with(expired).is_err());
    }

    #[test]
    fn expire_is_terminal() {
        let state = underwritten_state_fixture()
            .merged_with(UnderwriteState {
                swap_underwritten_event: None,
                expire_underwrite_event: Some(expire_event_fixture()),
                ..underwritten_state_fixture()
            })
            .unwrap();
        assert_eq!(state.status, UnderwriteStatus::Expired);
        assert!(state.is_terminal());
        // The completed key is suffixed by the underwrite transaction.
        assert_eq!(
            state.completed_key_tx_hash(),
            Some(TxHash::repeat_byte(0xf0))
        );
    }
}
