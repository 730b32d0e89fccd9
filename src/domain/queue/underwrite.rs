//! Underwrite submission: builds the `underwriteAndCheckConnection`
//! transaction, submits it through the wallet, and asks the relayer to
//! prioritise the matching AMB message.

use {
    crate::{
        domain::{
            order::{UnderwriteOrder, UnderwriteOrderResult},
            payload::Bytes65,
            queue::OrderHandler,
        },
        infra::{
            blockchain::contracts,
            config::{AmbConfig, ChainConfig},
            metrics::Metrics,
            relayer::{PrioritiseRequest, RelayerClient},
            wallet::{
                SubmitOptions, SubmitOutcome, Transaction, TransactionMetadata, Wallet,
                WalletError, WalletErrorKind,
            },
        },
    },
    std::{collections::HashMap, sync::Arc},
};

#[derive(Debug, thiserror::Error)]
pub enum UnderwriteError {
    #[error("submission failed: {0}")]
    Submission(WalletError),
    #[error("confirmation failed: {0}")]
    Confirmation(WalletError),
}

pub struct UnderwriteHandler {
    chain: Arc<ChainConfig>,
    wallet: Arc<dyn Wallet>,
    relayer: RelayerClient,
    ambs: HashMap<String, AmbConfig>,
    metrics: Arc<Metrics>,
}

impl UnderwriteHandler {
    pub fn new(
        chain: Arc<ChainConfig>,
        wallet: Arc<dyn Wallet>,
        relayer: RelayerClient,
        ambs: HashMap<String, AmbConfig>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            chain,
            wallet,
            relayer,
            ambs,
            metrics,
        }
    }

    async fn prioritise(&self, order: &UnderwriteOrder) {
        let prioritise = self
            .ambs
            .get(&order.amb.amb)
            .map_or(false, |amb| amb.relay_prioritisation);
        if !prioritise {
            return;
        }
        let request = PrioritiseRequest {
            message_identifier: order.amb.message_identifier,
            amb: order.amb.amb.clone(),
            source_chain_id: order.swap.from_chain_id.clone(),
            destination_chain_id: order.swap.to_chain_id.clone(),
        };
        if let Err(err) = self.relayer.prioritise_amb_message(&request).await {
            tracing::warn!(
                message_identifier = ?order.amb.message_identifier,
                ?err,
                "failed to prioritise the AMB message"
            );
        }
    }
}

#[async_trait::async_trait]
impl OrderHandler for UnderwriteHandler {
    type Error = UnderwriteError;
    type Order = UnderwriteOrder;
    type Result = UnderwriteOrderResult;

    /// Submissions leave in order, one at a time; the wallet assigns
    /// ascending nonces.
    const MAX_CONCURRENT_ORDERS: usize = 1;

    async fn handle_order(
        &self,
        order: &UnderwriteOrder,
        _retry_count: u32,
    ) -> Result<Option<UnderwriteOrderResult>, UnderwriteError> {
        let swap = &order.swap;
        let calldata = contracts::underwrite_and_check_connection_call(
            order.source_identifier,
            &Bytes65::from_evm_address(swap.from_vault),
            swap.to_vault,
            order.to_asset,
            swap.units,
            swap.min_out,
            &swap.to_account,
            swap.underwrite_incentive_x16,
            &swap.calldata,
        );

        let outcome = self
            .wallet
            .submit(
                Transaction {
                    to: order.interface_address,
                    data: calldata,
                    gas_limit: Some(order.gas_limit),
                },
                TransactionMetadata {
                    chain_id: self.chain.chain_id.clone(),
                    label: format!("underwrite 0x{:x}", order.expected_underwrite_id),
                },
                SubmitOptions {
                    deadline: Some(order.submission_deadline),
                    retry_on_nonce_confirmation_error: true,
                },
            )
            .await;

        let (error, kind) = match outcome {
            SubmitOutcome::Confirmed { tx_hash, receipt } => {
                self.metrics
                    .underwrites_confirmed
                    .with_label_values(&[self.chain.chain_id.as_str()])
                    .inc();
                tracing::info!(
                    chain = %self.chain.chain_id,
                    swap_id = ?swap.swap_id,
                    underwrite_id = ?order.expected_underwrite_id,
                    ?tx_hash,
                    "underwrite confirmed"
                );
                self.prioritise(order).await;
                return Ok(Some(UnderwriteOrderResult { tx_hash, receipt }));
            }
            SubmitOutcome::SubmissionError(err) => {
                let kind = err.kind;
                (UnderwriteError::Submission(err), kind)
            }
            SubmitOutcome::ConfirmationError(err) => {
                let kind = err.kind;
                (UnderwriteError::Confirmation(err), kind)
            }
        };

        if kind == WalletErrorKind::CallException {
            // Resubmitting an underwrite the chain already rejected (for
            // example one somebody else won) cannot succeed.
            tracing::info!(
                chain = %self.chain.chain_id,
                swap_id = ?swap.swap_id,
                %error,
                "dropping underwrite rejected by the chain"
            );
            self.metrics
                .orders_dropped
                .with_label_values(&[self.chain.chain_id.as_str(), "underwrite"])
                .inc();
            return Ok(None);
        }
        Err(error)
    }

    async fn on_order_failure(
        &self,
        order: &UnderwriteOrder,
        retry_count: u32,
        error: &UnderwriteError,
    ) -> bool {
        tracing::warn!(
            swap_id = ?order.swap.swap_id,
            retry_count,
            ?error,
            "underwrite submission failed"
        );
        // The wallet already applied its own retry policy; bubble the order
        // back to the worker so the reservations are released.
        false
    }
}
