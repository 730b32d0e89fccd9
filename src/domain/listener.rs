//! The per-chain event listener: scans the destination interfaces for
//! underwrite events, ingests the relayer's AMB feed for swaps arriving on
//! this chain, and commits swap states once the monitor has observed the
//! block the AMB was captured at.

use {
    crate::{
        domain::{
            eth::{Address, H256},
            payload::{
                self, catalyst, incentives, AssetSwapPayload, CatalystPayload, IncentivesMessage,
                PayloadError,
            },
            swap::{AmbMessageSendAssetDetails, SwapState, SwapStatus},
            underwrite::{
                ExpireUnderwriteEvent, FulfillUnderwriteEvent, SwapUnderwrittenEvent,
                UnderwriteState, UnderwriteStatus,
            },
        },
        infra::{
            blockchain::{contracts, BlockInfo, Rpc},
            config::ChainConfig,
            metrics::Metrics,
            monitor::Monitor,
            relayer::{AmbMessage, RelayerClient},
            store::{Store, StoreError},
        },
    },
    chrono::Utc,
    itertools::Itertools,
    moka::future::Cache,
    std::{collections::VecDeque, sync::Arc},
    tokio::sync::Mutex,
    web3::types::Log,
};

/// Why an AMB message was not turned into a swap state.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AmbRejection {
    #[error("payload does not parse: {0}")]
    Parse(#[from] PayloadError),
    #[error("message does not travel source to destination")]
    WrongDirection,
    #[error("source application 0x{0:x} is not a configured endpoint")]
    UnknownSourceInterface(Address),
    #[error("source escrow 0x{got:x} does not match the endpoint's 0x{expected:x}")]
    EscrowMismatch { expected: Address, got: Address },
    #[error("payload is not an asset swap")]
    NotAnAssetSwap,
    #[error("a payload address is not an EVM address")]
    NotAnEvmAddress,
    #[error("encoded block number {encoded} does not match the observed block {observed}")]
    BlockNumberMismatch { encoded: u32, observed: u32 },
}

pub struct Listener {
    chain: Arc<ChainConfig>,
    rpc: Rpc,
    store: Store,
    relayer: RelayerClient,
    monitor: Monitor,
    metrics: Arc<Metrics>,
    block_timestamps: Cache<u64, u64>,
    pending_swaps: Mutex<VecDeque<SwapState>>,
}

impl Listener {
    pub fn new(
        chain: Arc<ChainConfig>,
        rpc: Rpc,
        store: Store,
        relayer: RelayerClient,
        monitor: Monitor,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            chain,
            rpc,
            store,
            relayer,
            monitor,
            metrics,
            block_timestamps: Cache::new(512),
            pending_swaps: Mutex::new(VecDeque::new()),
        }
    }

    /// Runs until the worker exits. The three loops share nothing but the
    /// pending-swap queue and the store.
    pub async fn run(self) {
        let this = &self;
        tokio::join!(
            this.scan_interface_events(),
            this.ingest_amb_feed(),
            this.drain_pending_swaps(),
        );
    }

    // (a) Interface event scan.

    async fn scan_interface_events(&self) {
        let interfaces: Vec<_> = self
            .chain
            .endpoints
            .iter()
            .map(|endpoint| endpoint.interface_address)
            .collect();
        let topics = vec![
            contracts::swap_underwritten_topic(),
            contracts::fulfill_underwrite_topic(),
            contracts::expire_underwrite_topic(),
        ];

        let head = self.monitor.current().number;
        let mut from_block = match self.chain.starting_block {
            Some(block) if block >= 0 => block as u64,
            Some(offset) => head.saturating_sub(offset.unsigned_abs()),
            None => head,
        };

        loop {
            let to_block = self.monitor.current().number;
            if to_block < from_block {
                tokio::time::sleep(self.chain.processing_interval).await;
                continue;
            }
            let to_block = match self.chain.max_blocks {
                Some(max_blocks) => to_block.min(from_block.saturating_add(max_blocks)),
                None => to_block,
            };

            let logs = loop {
                match self
                    .rpc
                    .logs(interfaces.clone(), topics.clone(), from_block, to_block)
                    .await
                {
                    Ok(logs) => break logs,
                    Err(err) => {
                        tracing::warn!(
                            chain = %self.chain.chain_id,
                            from_block,
                            to_block,
                            ?err,
                            "log query failed; retrying"
                        );
                        tokio::time::sleep(self.chain.retry_interval).await;
                    }
                }
            };

            let ordered = logs.into_iter().sorted_by_key(|log| {
                (
                    log.block_number.map(|number| number.as_u64()),
                    log.log_index,
                )
            });
            for log in ordered {
                if let Err(err) = self.handle_interface_log(&log).await {
                    match err {
                        StoreError::InvariantViolation(violation) => {
                            tracing::error!(
                                chain = %self.chain.chain_id,
                                %violation,
                                "conflicting terminal underwrite events; event dropped"
                            );
                        }
                        err => {
                            tracing::warn!(
                                chain = %self.chain.chain_id,
                                ?err,
                                "failed to persist an underwrite event"
                            );
                        }
                    }
                }
            }

            from_block = to_block + 1;
            tokio::time::sleep(self.chain.processing_interval).await;
        }
    }

    async fn handle_interface_log(&self, log: &Log) -> Result<(), StoreError> {
        let Some(topic) = log.topics.first().copied() else {
            return Ok(());
        };
        let block_number = log
            .block_number
            .map(|number| number.as_u64())
            .unwrap_or_default();
        let block_timestamp = self.block_timestamp(block_number).await;
        let transaction_hash = log.transaction_hash.unwrap_or_default();
        let to_interface = log.address;

        let state = if topic == contracts::swap_underwritten_topic() {
            let event = match contracts::decode_swap_underwritten(log) {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(?err, "dropping undecodable SwapUnderwritten log");
                    return Ok(());
                }
            };
            UnderwriteState {
                to_chain_id: self.chain.chain_id.clone(),
                to_interface,
                underwrite_id: event.identifier,
                status: UnderwriteStatus::Underwritten,
                swap_underwritten_event: Some(SwapUnderwrittenEvent {
                    underwriter: event.underwriter,
                    expiry: event.expiry,
                    target_vault: event.target_vault,
                    to_asset: event.to_asset,
                    units: event.units,
                    to_account: event.to_account,
                    out_amount: event.out_amount,
                    transaction_hash,
                    block_number,
                    block_timestamp,
                }),
                fulfill_underwrite_event: None,
                expire_underwrite_event: None,
            }
        } else if topic == contracts::fulfill_underwrite_topic() {
            let event = match contracts::decode_fulfill_underwrite(log) {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(?err, "dropping undecodable FulfillUnderwrite log");
                    return Ok(());
                }
            };
            UnderwriteState {
                to_chain_id: self.chain.chain_id.clone(),
                to_interface,
                underwrite_id: event.identifier,
                status: UnderwriteStatus::Fulfilled,
                swap_underwritten_event: None,
                fulfill_underwrite_event: Some(FulfillUnderwriteEvent {
                    transaction_hash,
                    block_number,
                    block_timestamp,
                }),
                expire_underwrite_event: None,
            }
        } else if topic == contracts::expire_underwrite_topic() {
            let event = match contracts::decode_expire_underwrite(log) {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(?err, "dropping undecodable ExpireUnderwrite log");
                    return Ok(());
                }
            };
            UnderwriteState {
                to_chain_id: self.chain.chain_id.clone(),
                to_interface,
                underwrite_id: event.identifier,
                status: UnderwriteStatus::Expired,
                swap_underwritten_event: None,
                fulfill_underwrite_event: None,
                expire_underwrite_event: Some(ExpireUnderwriteEvent {
                    expirer: event.expirer,
                    reward: event.reward,
                    transaction_hash,
                    block_number,
                    block_timestamp,
                }),
            }
        } else {
            return Ok(());
        };

        self.store.save_active_underwrite_state(state).await?;
        Ok(())
    }

    async fn block_timestamp(&self, block_number: u64) -> u64 {
        if let Some(timestamp) = self.block_timestamps.get(&block_number).await {
            return timestamp;
        }
        loop {
            match self.rpc.block_by_number(block_number).await {
                Ok(Some(block)) => {
                    self.block_timestamps
                        .insert(block_number, block.timestamp)
                        .await;
                    return block.timestamp;
                }
                Ok(None) => {
                    tracing::warn!(block_number, "block not found while resolving a timestamp");
                }
                Err(err) => {
                    tracing::warn!(block_number, ?err, "block query failed; retrying");
                }
            }
            tokio::time::sleep(self.chain.retry_interval).await;
        }
    }

    // (b) AMB subscription.

    async fn ingest_amb_feed(&self) {
        let mut feed = self.relayer.subscribe_amb_messages(self.chain.retry_interval);
        while let Some(amb) = feed.recv().await {
            // The feed is global; this worker only handles swaps arriving
            // on its chain.
            if amb.to_chain_id != self.chain.chain_id {
                continue;
            }
            let now = Utc::now().timestamp().max(0) as u64;
            match assemble_swap_state(&self.chain, &amb, now) {
                Ok(state) => {
                    self.pending_swaps.lock().await.push_back(state);
                }
                Err(rejection @ AmbRejection::Parse(_)) => {
                    tracing::warn!(
                        chain = %self.chain.chain_id,
                        message_identifier = ?amb.message_identifier,
                        %rejection,
                        "skipping AMB message"
                    );
                }
                Err(rejection) => {
                    tracing::info!(
                        chain = %self.chain.chain_id,
                        message_identifier = ?amb.message_identifier,
                        %rejection,
                        "skipping AMB message"
                    );
                }
            }
        }
    }

    // AMB-to-monitor synchronization.

    async fn drain_pending_swaps(&self) {
        loop {
            tokio::time::sleep(self.chain.processing_interval).await;
            let observed = self.monitor.current();

            let drainable = {
                let mut pending = self.pending_swaps.lock().await;
                let (ready, later): (VecDeque<_>, VecDeque<_>) =
                    pending.drain(..).partition(|state: &SwapState| {
                        state
                            .amb_message_send_asset_details
                            .as_ref()
                            .map_or(true, |details| details.block_number <= observed.number)
                    });
                *pending = later;
                ready
            };

            for state in drainable {
                let Some(details) = state.amb_message_send_asset_details.as_ref() else {
                    continue;
                };
                let block_hash = self.observed_block_hash(details.block_number, observed).await;
                if !commit_decision(details.block_hash, block_hash) {
                    tracing::info!(
                        chain = %self.chain.chain_id,
                        swap_id = ?state.swap_id,
                        block_number = details.block_number,
                        "dropping swap: source block hash changed (probable reorg)"
                    );
                    continue;
                }
                match self.store.save_swap_state(state).await {
                    Ok(saved) => {
                        self.metrics
                            .swaps_observed
                            .with_label_values(&[self.chain.chain_id.as_str()])
                            .inc();
                        tracing::info!(
                            chain = %self.chain.chain_id,
                            swap_id = ?saved.swap_id,
                            to_chain = %saved.to_chain_id,
                            "swap committed"
                        );
                    }
                    Err(err) => {
                        tracing::warn!(
                            chain = %self.chain.chain_id,
                            ?err,
                            "failed to persist a swap state"
                        );
                    }
                }
            }
        }
    }

    /// The chain's current hash for a block height, from the monitor
    /// snapshot when it is the head, otherwise queried (and retried
    /// forever).
    async fn observed_block_hash(&self, block_number: u64, observed: BlockInfo) -> H256 {
        if observed.number == block_number {
            return observed.hash;
        }
        loop {
            match self.rpc.block_by_number(block_number).await {
                Ok(Some(block)) => return block.hash,
                Ok(None) => {
                    tracing::warn!(block_number, "block not found while rechecking its hash");
                }
                Err(err) => {
                    tracing::warn!(block_number, ?err, "block query failed; retrying");
                }
            }
            tokio::time::sleep(self.chain.retry_interval).await;
        }
    }
}

/// Whether a pending swap may be committed: the hash captured at AMB time
/// must still be the chain's hash for that height.
pub fn commit_decision(captured: H256, observed: H256) -> bool {
    captured == observed
}

/// Validates an AMB message against the chain configuration and assembles
/// the swap state to persist.
pub fn assemble_swap_state(
    chain: &ChainConfig,
    amb: &AmbMessage,
    now: u64,
) -> Result<SwapState, AmbRejection> {
    let envelope = incentives::parse(&amb.incentives_payload)?;
    let IncentivesMessage::SourceToDestination {
        to_application,
        max_gas,
        message,
    } = &envelope.message
    else {
        return Err(AmbRejection::WrongDirection);
    };

    let source_application = envelope
        .source_application
        .to_evm_address()
        .map_err(|_| AmbRejection::NotAnEvmAddress)?;
    let endpoint = chain
        .endpoint_for_interface(source_application)
        .ok_or(AmbRejection::UnknownSourceInterface(source_application))?;
    if endpoint.incentives_address != amb.from_incentives_address {
        return Err(AmbRejection::EscrowMismatch {
            expected: endpoint.incentives_address,
            got: amb.from_incentives_address,
        });
    }

    let CatalystPayload::AssetSwap(payload) = catalyst::parse(message)? else {
        return Err(AmbRejection::NotAnAssetSwap);
    };

    let observed_block = if chain.swap_id_uses_l1_block_number {
        amb.transaction_block_number.unwrap_or(amb.block_number)
    } else {
        amb.block_number
    };
    if payload.block_number != observed_block as u32 {
        return Err(AmbRejection::BlockNumberMismatch {
            encoded: payload.block_number,
            observed: observed_block as u32,
        });
    }

    swap_state_from_payload(amb, &envelope, payload, *to_application, *max_gas, now)
}

fn swap_state_from_payload(
    amb: &AmbMessage,
    envelope: &incentives::IncentivesEnvelope,
    payload: AssetSwapPayload,
    to_application: payload::Bytes65,
    max_gas: u64,
    now: u64,
) -> Result<SwapState, AmbRejection> {
    let from_vault = payload
        .from_vault
        .to_evm_address()
        .map_err(|_| AmbRejection::NotAnEvmAddress)?;
    let to_vault = payload
        .to_vault
        .to_evm_address()
        .map_err(|_| AmbRejection::NotAnEvmAddress)?;
    let from_asset = payload
        .from_asset
        .to_evm_address()
        .map_err(|_| AmbRejection::NotAnEvmAddress)?;
    let to_application = to_application
        .to_evm_address()
        .map_err(|_| AmbRejection::NotAnEvmAddress)?;

    let swap_id = payload::swap_id(
        &payload.to_account,
        payload.units,
        payload.from_amount,
        from_asset,
        payload.block_number,
    );

    Ok(SwapState {
        from_chain_id: amb.from_chain_id.clone(),
        from_vault,
        swap_id,
        status: SwapStatus::Pending,
        to_chain_id: amb.to_chain_id.clone(),
        to_vault,
        to_account: payload.to_account,
        units: payload.units,
        to_asset_index: payload.to_asset_index,
        min_out: payload.min_out,
        from_amount: payload.from_amount,
        from_asset,
        block_number: payload.block_number,
        underwrite_incentive_x16: payload.underwrite_incentive_x16,
        calldata: payload.cdata,
        amb_message_send_asset_details: Some(AmbMessageSendAssetDetails {
            amb: amb.amb.clone(),
            message_identifier: envelope.message_identifier,
            from_incentives_address: amb.from_incentives_address,
            to_incentives_address: None,
            to_application,
            max_gas_delivery: max_gas,
            deadline: amb.deadline,
            block_number: amb.block_number,
            block_hash: amb.block_hash,
            transaction_hash: amb.transaction_hash,
            transaction_block_number: amb.transaction_block_number,
            observed_at: now,
        }),
        to_asset: None,
        expected_underwrite_id: None,
        receive_asset_event: None,
    })
}
