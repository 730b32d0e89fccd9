//! The per-chain block monitor: a polling task publishing the observed chain
//! head as an atomic snapshot.

use {
    crate::infra::blockchain::{BlockInfo, Rpc},
    std::time::Duration,
    tokio::sync::watch,
};

/// A read handle on the monitor's latest head snapshot.
#[derive(Clone, Debug)]
pub struct Monitor {
    rx: watch::Receiver<BlockInfo>,
}

impl Monitor {
    /// Starts the polling task. Does not return until the first head has
    /// been observed; startup blocks on chain availability.
    pub async fn spawn(rpc: Rpc, poll_interval: Duration, retry_interval: Duration) -> Self {
        let first = query_head(&rpc, retry_interval).await;
        let (tx, rx) = watch::channel(first);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                let head = query_head(&rpc, retry_interval).await;
                if tx.send(head).is_err() {
                    break;
                }
            }
        });

        Self { rx }
    }

    pub fn current(&self) -> BlockInfo {
        *self.rx.borrow()
    }

    #[cfg(test)]
    pub fn fixed(block: BlockInfo) -> Self {
        let (tx, rx) = watch::channel(block);
        // Keep the channel open for the monitor's lifetime.
        std::mem::forget(tx);
        Self { rx }
    }
}

async fn query_head(rpc: &Rpc, retry_interval: Duration) -> BlockInfo {
    loop {
        match rpc.latest_block().await {
            Ok(Some(head)) => return head,
            Ok(None) => {
                tracing::warn!("chain returned no latest block; retrying");
            }
            Err(err) => {
                tracing::warn!(?err, "failed to query the chain head; retrying");
            }
        }
        tokio::time::sleep(retry_interval).await;
    }
}
