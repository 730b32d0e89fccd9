//! Typed persistent state over a key-value store, doubling as the
//! inter-worker message bus.
//!
//! Keys are colon-joined lowercase strings; values are JSON with big
//! integers serialized as decimal strings. Every mutating write additionally
//! publishes a key event carrying the written key and the action taken.

use {
    crate::domain::{
        eth::{Address, ChainId, H256, TxHash},
        swap::{SwapDescription, SwapState},
        underwrite::{ConflictingEventsError, UnderwriteState},
    },
    serde::{Deserialize, Serialize},
    std::sync::Arc,
};

pub mod backend;
pub mod redis;

pub use backend::{Backend, BackendError, MemoryBackend, Subscription};

pub const ON_SEND_ASSET_CHANNEL: &str = "underwriter:onSendAsset";
pub const ON_SWAP_UNDERWRITTEN_CHANNEL: &str = "underwriter:onSwapUnderwritten";
pub const ON_SWAP_UNDERWRITE_COMPLETE_CHANNEL: &str = "underwriter:onSwapUnderwriteComplete";
pub const KEY_CHANNEL: &str = "underwriter:key";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("failed to (de)serialize a store value: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    InvariantViolation(#[from] ConflictingEventsError),
    #[error("terminal underwrite {0:#x} has no transaction hash to key the completed entry by")]
    MissingTransactionHash(H256),
}

/// The action reported on the key event channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyAction {
    pub key: String,
    pub action: KeyActionKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyActionKind {
    Set,
    Del,
}

#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    // Key builders. All lowercase; `{:x}` renders hashes and addresses as
    // bare lowercase hex, prefixed here explicitly.

    fn swap_key(from_chain_id: &ChainId, from_vault: Address, swap_id: H256) -> String {
        format!("swap:{from_chain_id}:0x{from_vault:x}:0x{swap_id:x}")
    }

    fn active_underwrite_key(
        to_chain_id: &ChainId,
        to_interface: Address,
        underwrite_id: H256,
    ) -> String {
        format!("activeUnderwrite:{to_chain_id}:0x{to_interface:x}:0x{underwrite_id:x}")
    }

    fn completed_underwrite_key(
        to_chain_id: &ChainId,
        to_interface: Address,
        underwrite_id: H256,
        tx_hash: TxHash,
    ) -> String {
        format!(
            "completedUnderwrite:{to_chain_id}:0x{to_interface:x}:0x{underwrite_id:x}:0x{tx_hash:x}"
        )
    }

    fn expected_underwrite_to_swap_key(
        to_chain_id: &ChainId,
        to_interface: Address,
        underwrite_id: H256,
    ) -> String {
        format!("expectedUnderwriteToSwap:{to_chain_id}:0x{to_interface:x}:0x{underwrite_id:x}")
    }

    fn completed_underwrite_to_swap_key(
        to_chain_id: &ChainId,
        to_interface: Address,
        underwrite_id: H256,
        tx_hash: TxHash,
    ) -> String {
        format!(
            "completedUnderwriteToSwap:{to_chain_id}:0x{to_interface:x}:0x{underwrite_id:x}:0x{tx_hash:x}"
        )
    }

    async fn read<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.backend.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.backend
            .set(key, serde_json::to_string(value)?)
            .await?;
        self.post_key_event(key, KeyActionKind::Set).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.backend.del(key).await?;
        self.post_key_event(key, KeyActionKind::Del).await;
        Ok(())
    }

    async fn post_key_event(&self, key: &str, action: KeyActionKind) {
        let event = KeyAction {
            key: key.to_string(),
            action,
        };
        let Ok(payload) = serde_json::to_string(&event) else {
            return;
        };
        if let Err(err) = self.backend.publish(KEY_CHANNEL, payload).await {
            tracing::warn!(?err, key, "failed to publish key event");
        }
    }

    // Swap states.

    pub async fn get_swap_state(
        &self,
        from_chain_id: &ChainId,
        from_vault: Address,
        swap_id: H256,
    ) -> Result<Option<SwapState>, StoreError> {
        self.read(&Self::swap_key(from_chain_id, from_vault, swap_id))
            .await
    }

    /// Persists a swap state, merging with any existing entry. If the write
    /// carries AMB send-asset details, the swap description is published on
    /// the send-asset channel.
    pub async fn save_swap_state(&self, state: SwapState) -> Result<SwapState, StoreError> {
        let key = Self::swap_key(&state.from_chain_id, state.from_vault, state.swap_id);
        // Announce on the send-asset channel only when this write itself
        // carries the AMB details; enrichment writes merging into an
        // announced swap must not re-trigger the pipeline.
        let announce = state.amb_message_send_asset_details.is_some();
        let merged = match self.read::<SwapState>(&key).await? {
            Some(existing) => existing.merged_with(state),
            None => {
                let mut state = state;
                state.recompute_status();
                state
            }
        };
        self.write(&key, &merged).await?;

        if announce {
            self.post_message(ON_SEND_ASSET_CHANNEL, &merged.description())
                .await?;
        }
        Ok(merged)
    }

    // Underwrite states.

    pub async fn get_active_underwrite_state(
        &self,
        to_chain_id: &ChainId,
        to_interface: Address,
        underwrite_id: H256,
    ) -> Result<Option<UnderwriteState>, StoreError> {
        self.read(&Self::active_underwrite_key(
            to_chain_id,
            to_interface,
            underwrite_id,
        ))
        .await
    }

    pub async fn get_completed_underwrite_state(
        &self,
        to_chain_id: &ChainId,
        to_interface: Address,
        underwrite_id: H256,
        tx_hash: TxHash,
    ) -> Result<Option<UnderwriteState>, StoreError> {
        self.read(&Self::completed_underwrite_key(
            to_chain_id,
            to_interface,
            underwrite_id,
            tx_hash,
        ))
        .await
    }

    /// Persists an underwrite observation, merging with any active entry.
    ///
    /// On a terminal transition the active key is deleted, the completed key
    /// (suffixed by the underwrite transaction hash) is written, the
    /// expected-underwrite index entry is mirrored to its completed form,
    /// and the completion is published. A new swap-underwritten event is
    /// always announced on its channel.
    pub async fn save_active_underwrite_state(
        &self,
        state: UnderwriteState,
    ) -> Result<UnderwriteState, StoreError> {
        let active_key =
            Self::active_underwrite_key(&state.to_chain_id, state.to_interface, state.underwrite_id);
        let existing = self.read::<UnderwriteState>(&active_key).await?;

        let introduces_underwritten = state.swap_underwritten_event.is_some()
            && existing
                .as_ref()
                .map_or(true, |e| e.swap_underwritten_event.is_none());

        let merged = match existing {
            Some(existing) => existing.merged_with(state)?,
            None => {
                let mut state = state;
                state.recompute_status();
                state
            }
        };

        if merged.is_terminal() {
            let tx_hash = merged
                .completed_key_tx_hash()
                .ok_or(StoreError::MissingTransactionHash(merged.underwrite_id))?;
            let completed_key = Self::completed_underwrite_key(
                &merged.to_chain_id,
                merged.to_interface,
                merged.underwrite_id,
                tx_hash,
            );
            self.write(&completed_key, &merged).await?;
            self.delete(&active_key).await?;
            self.migrate_expected_underwrite_index(&merged, tx_hash)
                .await?;
            self.post_message(ON_SWAP_UNDERWRITE_COMPLETE_CHANNEL, &merged)
                .await?;
        } else {
            self.write(&active_key, &merged).await?;
        }

        if introduces_underwritten {
            self.post_message(ON_SWAP_UNDERWRITTEN_CHANNEL, &merged)
                .await?;
        }
        Ok(merged)
    }

    async fn migrate_expected_underwrite_index(
        &self,
        state: &UnderwriteState,
        tx_hash: TxHash,
    ) -> Result<(), StoreError> {
        let expected_key = Self::expected_underwrite_to_swap_key(
            &state.to_chain_id,
            state.to_interface,
            state.underwrite_id,
        );
        let Some(description) = self.read::<SwapDescription>(&expected_key).await? else {
            return Ok(());
        };
        self.save_swap_description_by_completed_underwrite(
            &state.to_chain_id,
            state.to_interface,
            state.underwrite_id,
            tx_hash,
            &description,
        )
        .await?;
        self.delete(&expected_key).await
    }

    // The expected-underwrite → swap forward index. Written by discovery so
    // the expirer can recover the originating swap from an underwrite id.

    pub async fn get_swap_description_by_expected_underwrite(
        &self,
        to_chain_id: &ChainId,
        to_interface: Address,
        underwrite_id: H256,
    ) -> Result<Option<SwapDescription>, StoreError> {
        self.read(&Self::expected_underwrite_to_swap_key(
            to_chain_id,
            to_interface,
            underwrite_id,
        ))
        .await
    }

    pub async fn save_swap_description_by_expected_underwrite(
        &self,
        to_chain_id: &ChainId,
        to_interface: Address,
        underwrite_id: H256,
        description: &SwapDescription,
    ) -> Result<(), StoreError> {
        self.write(
            &Self::expected_underwrite_to_swap_key(to_chain_id, to_interface, underwrite_id),
            description,
        )
        .await
    }

    pub async fn save_swap_description_by_completed_underwrite(
        &self,
        to_chain_id: &ChainId,
        to_interface: Address,
        underwrite_id: H256,
        tx_hash: TxHash,
        description: &SwapDescription,
    ) -> Result<(), StoreError> {
        self.write(
            &Self::completed_underwrite_to_swap_key(to_chain_id, to_interface, underwrite_id, tx_hash),
            description,
        )
        .await
    }

    pub async fn get_swap_description_by_completed_underwrite(
        &self,
        to_chain_id: &ChainId,
        to_interface: Address,
        underwrite_id: H256,
        tx_hash: TxHash,
    ) -> Result<Option<SwapDescription>, StoreError> {
        self.read(&Self::completed_underwrite_to_swap_key(
            to_chain_id,
            to_interface,
            underwrite_id,
            tx_hash,
        ))
        .await
    }

    // Pub/sub.

    pub async fn on(&self, channel: &str) -> Result<Subscription, StoreError> {
        Ok(self.backend.subscribe(channel).await?)
    }

    pub async fn post_message<T: Serialize>(
        &self,
        channel: &str,
        payload: &T,
    ) -> Result<(), StoreError> {
        self.backend
            .publish(channel, serde_json::to_string(payload)?)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::domain::{
            swap::tests::swap_state_fixture,
            underwrite::{
                tests::{expire_event_fixture, fulfill_event_fixture, underwritten_state_fixture},
                UnderwriteStatus,
            },
        },
    };

    fn store() -> Store {
        Store::new(MemoryBackend::new())
    }

    #[tokio::test]
    async fn saves_and_merges_swap_states() {
        let store = store();
        let state = swap_state_fixture();
        store.save_swap_state(state.clone()).await.unwrap();

        let enriched = SwapState {
            to_asset: Some(Address::repeat_byte(0xee)),
            ..state.clone()
        };
        store.save_swap_state(enriched).await.unwrap();

        let read = store
            .get_swap_state(&state.from_chain_id, state.from_vault, state.swap_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.to_asset, Some(Address::repeat_byte(0xee)));
    }

    #[tokio::test]
    async fn swap_write_with_amb_details_publishes_send_asset() {
        use crate::domain::swap::AmbMessageSendAssetDetails;

        let store = store();
        let mut subscription = store.on(ON_SEND_ASSET_CHANNEL).await.unwrap();

        let state = SwapState {
            amb_message_send_asset_details: Some(AmbMessageSendAssetDetails {
                amb: "wormhole".to_string(),
                message_identifier: H256::repeat_byte(0x42),
                from_incentives_address: Address::repeat_byte(0x02),
                to_incentives_address: None,
                to_application: Address::repeat_byte(0x1f),
                max_gas_delivery: 300_000,
                deadline: None,
                block_number: 17_000_000,
                block_hash: H256::repeat_byte(0x10),
                transaction_hash: H256::repeat_byte(0x20),
                transaction_block_number: None,
                observed_at: 1_690_000_000,
            }),
            ..swap_state_fixture()
        };
        store.save_swap_state(state.clone()).await.unwrap();

        let payload = subscription.recv().await.unwrap();
        let description: SwapDescription = serde_json::from_str(&payload).unwrap();
        assert_eq!(description, state.description());
    }

    #[tokio::test]
    async fn underwrite_merge_is_order_independent() {
        let underwritten = underwritten_state_fixture();
        let fulfilled = UnderwriteState {
            swap_underwritten_event: None,
            fulfill_underwrite_event: Some(fulfill_event_fixture()),
            ..underwritten_state_fixture()
        };

        for pair in [
            [underwritten.clone(), fulfilled.clone()],
            [fulfilled.clone(), underwritten.clone()],
        ] {
            let store = store();
            for state in pair {
                store.save_active_underwrite_state(state).await.unwrap();
            }
            let tx_hash = underwritten.completed_key_tx_hash().unwrap();
            let completed = store
                .get_completed_underwrite_state(
                    &underwritten.to_chain_id,
                    underwritten.to_interface,
                    underwritten.underwrite_id,
                    tx_hash,
                )
                .await
                .unwrap()
                .unwrap();
            assert_eq!(completed.status, UnderwriteStatus::Fulfilled);
            assert!(completed.swap_underwritten_event.is_some());
        }
    }

    #[tokio::test]
    async fn terminal_transition_migrates_keys() {
        let store = store();
        let underwritten = underwritten_state_fixture();
        let description = swap_state_fixture().description();
        store
            .save_swap_description_by_expected_underwrite(
                &underwritten.to_chain_id,
                underwritten.to_interface,
                underwritten.underwrite_id,
                &description,
            )
            .await
            .unwrap();

        store
            .save_active_underwrite_state(underwritten.clone())
            .await
            .unwrap();
        store
            .save_active_underwrite_state(UnderwriteState {
                swap_underwritten_event: None,
                expire_underwrite_event: Some(expire_event_fixture()),
                ..underwritten_state_fixture()
            })
            .await
            .unwrap();

        // The active key and the expected index are gone.
        assert_eq!(
            store
                .get_active_underwrite_state(
                    &underwritten.to_chain_id,
                    underwritten.to_interface,
                    underwritten.underwrite_id,
                )
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            store
                .get_swap_description_by_expected_underwrite(
                    &underwritten.to_chain_id,
                    underwritten.to_interface,
                    underwritten.underwrite_id,
                )
                .await
                .unwrap(),
            None
        );

        // The completed key and the completed index are present.
        let tx_hash = underwritten.completed_key_tx_hash().unwrap();
        let completed = store
            .get_completed_underwrite_state(
                &underwritten.to_chain_id,
                underwritten.to_interface,
                underwritten.underwrite_id,
                tx_hash,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(completed.status, UnderwriteStatus::Expired);
        assert_eq!(
            store
                .get_swap_description_by_completed_underwrite(
                    &underwritten.to_chain_id,
                    underwritten.to_interface,
                    underwritten.underwrite_id,
                    tx_hash,
                )
                .await
                .unwrap(),
            Some(description)
        );
    }

    #[tokio::test]
    async fn conflicting_terminal_events_error_and_leave_store_unchanged() {
        let store = store();
        let fulfilled = UnderwriteState {
            fulfill_underwrite_event: Some(fulfill_event_fixture()),
            ..underwritten_state_fixture()
        };
        let both = UnderwriteState {
            expire_underwrite_event: Some(expire_event_fixture()),
            ..fulfilled
        };

        let result = store
            .save_active_underwrite_state(underwritten_state_fixture())
            .await;
        assert!(result.is_ok());
        let result = store.save_active_underwrite_state(both).await;
        assert!(matches!(result, Err(StoreError::InvariantViolation(_))));

        // The active entry still holds the pre-conflict state.
        let active = store
            .get_active_underwrite_state(
                &underwritten_state_fixture().to_chain_id,
                underwritten_state_fixture().to_interface,
                underwritten_state_fixture().underwrite_id,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.status, UnderwriteStatus::Underwritten);
    }

    #[tokio::test]
    async fn every_write_publishes_a_key_event() {
        let store = store();
        let mut subscription = store.on(KEY_CHANNEL).await.unwrap();
        store
            .save_swap_state(swap_state_fixture())
            .await
            .unwrap();

        let event: KeyAction =
            serde_json::from_str(&subscription.recv().await.unwrap()).unwrap();
        assert!(event.key.starts_with("swap:11155111:0x"));
        assert_eq!(event.action, KeyActionKind::Set);
    }
}
