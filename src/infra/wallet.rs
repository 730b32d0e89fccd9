//! The wallet contract: serialized transaction submission with absolute
//! deadlines.
//!
//! The pipeline only depends on the [`Wallet`] trait; tests mock it. The
//! production [`NodeWallet`] funnels submissions through a single service
//! task (transactions leave in submission order, by ascending nonce, which
//! the node assigns), sends them with `eth_sendTransaction`, and polls for
//! the receipt until the deadline.

use {
    crate::{
        domain::eth::{Address, ChainId, TxHash, U256},
        infra::blockchain::Rpc,
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    std::time::Duration,
    tokio::sync::{mpsc, oneshot},
    web3::types::{Bytes, TransactionReceipt, TransactionRequest, U64},
};

/// A transaction to submit.
#[derive(Clone, Debug)]
pub struct Transaction {
    pub to: Address,
    pub data: Vec<u8>,
    pub gas_limit: Option<U256>,
}

/// Free-form identification of a submission, for logs.
#[derive(Clone, Debug)]
pub struct TransactionMetadata {
    pub chain_id: ChainId,
    pub label: String,
}

#[derive(Clone, Copy, Debug)]
pub struct SubmitOptions {
    /// Absolute deadline; expiry reports a confirmation error.
    pub deadline: Option<DateTime<Utc>>,
    /// Whether a nonce-related confirmation error should be resubmitted once
    /// before giving up.
    pub retry_on_nonce_confirmation_error: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            deadline: None,
            retry_on_nonce_confirmation_error: true,
        }
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind:?} error: {message}")]
pub struct WalletError {
    pub kind: WalletErrorKind,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalletErrorKind {
    /// The node rejected the call outright; resubmitting the same
    /// transaction cannot succeed.
    CallException,
    /// Nonce accounting went stale.
    NonceConfirmation,
    /// The deadline passed without a receipt.
    Timeout,
    /// Transport or node failure.
    Rpc,
}

/// What a submission eventually resolved to.
#[derive(Clone, Debug)]
pub enum SubmitOutcome {
    Confirmed {
        tx_hash: TxHash,
        receipt: TransactionReceipt,
    },
    SubmissionError(WalletError),
    ConfirmationError(WalletError),
}

#[async_trait]
pub trait Wallet: Send + Sync {
    async fn submit(
        &self,
        transaction: Transaction,
        metadata: TransactionMetadata,
        options: SubmitOptions,
    ) -> SubmitOutcome;
}

struct Submission {
    transaction: Transaction,
    metadata: TransactionMetadata,
    options: SubmitOptions,
    respond: oneshot::Sender<SubmitOutcome>,
}

/// The message port to the wallet service task.
#[derive(Clone)]
pub struct NodeWallet {
    port: mpsc::Sender<Submission>,
}

impl NodeWallet {
    pub fn spawn(rpc: Rpc, account: Address, receipt_poll_interval: Duration) -> Self {
        let (port, mut rx) = mpsc::channel::<Submission>(64);
        tokio::spawn(async move {
            let service = Service {
                rpc,
                account,
                receipt_poll_interval,
            };
            while let Some(submission) = rx.recv().await {
                let outcome = service.process(&submission).await;
                let _ = submission.respond.send(outcome);
            }
        });
        Self { port }
    }
}

#[async_trait]
impl Wallet for NodeWallet {
    async fn submit(
        &self,
        transaction: Transaction,
        metadata: TransactionMetadata,
        options: SubmitOptions,
    ) -> SubmitOutcome {
        let (respond, response) = oneshot::channel();
        let submission = Submission {
            transaction,
            metadata,
            options,
            respond,
        };
        if self.port.send(submission).await.is_err() {
            return SubmitOutcome::SubmissionError(WalletError {
                kind: WalletErrorKind::Rpc,
                message: "wallet service is gone".to_string(),
            });
        }
        match response.await {
            Ok(outcome) => outcome,
            Err(_) => SubmitOutcome::SubmissionError(WalletError {
                kind: WalletErrorKind::Rpc,
                message: "wallet service dropped the submission".to_string(),
            }),
        }
    }
}

struct Service {
    rpc: Rpc,
    account: Address,
    receipt_poll_interval: Duration,
}

impl Service {
    async fn process(&self, submission: &Submission) -> SubmitOutcome {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = self.submit_once(submission).await;
            let retry = matches!(
                &outcome,
                SubmitOutcome::ConfirmationError(err)
                    if err.kind == WalletErrorKind::NonceConfirmation
            ) && submission.options.retry_on_nonce_confirmation_error
                && attempts == 1;
            if !retry {
                return outcome;
            }
            tracing::info!(
                label = submission.metadata.label,
                chain = %submission.metadata.chain_id,
                "resubmitting after a nonce confirmation error"
            );
        }
    }

    async fn submit_once(&self, submission: &Submission) -> SubmitOutcome {
        let request = TransactionRequest {
            from: self.account,
            to: Some(submission.transaction.to),
            gas: submission.transaction.gas_limit,
            data: Some(Bytes(submission.transaction.data.clone())),
            ..Default::default()
        };
        let tx_hash = match self.rpc.web3().eth().send_transaction(request).await {
            Ok(tx_hash) => tx_hash,
            Err(err) => {
                return SubmitOutcome::SubmissionError(classify(err));
            }
        };
        tracing::debug!(
            label = submission.metadata.label,
            chain = %submission.metadata.chain_id,
            ?tx_hash,
            "transaction submitted"
        );

        loop {
            if let Some(deadline) = submission.options.deadline {
                if Utc::now() >= deadline {
                    return SubmitOutcome::ConfirmationError(WalletError {
                        kind: WalletErrorKind::Timeout,
                        message: format!("no receipt for 0x{tx_hash:x} before the deadline"),
                    });
                }
            }
            match self.rpc.web3().eth().transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if receipt.status == Some(U64::zero()) {
                        return SubmitOutcome::ConfirmationError(WalletError {
                            kind: WalletErrorKind::CallException,
                            message: format!("transaction 0x{tx_hash:x} reverted"),
                        });
                    }
                    return SubmitOutcome::Confirmed { tx_hash, receipt };
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(?err, "failed to poll for a transaction receipt");
                }
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}

/// Maps node errors onto the wallet error kinds the pipeline dispatches on.
fn classify(err: web3::Error) -> WalletError {
    let message = err.to_string();
    let lowercase = message.to_lowercase();
    let kind = if lowercase.contains("revert") || lowercase.contains("execution reverted") {
        WalletErrorKind::CallException
    } else if lowercase.contains("nonce") {
        WalletErrorKind::NonceConfirmation
    } else {
        WalletErrorKind::Rpc
    };
    WalletError { kind, message }
}
