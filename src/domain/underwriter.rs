//! The per-chain underwriter worker: wires the pipeline stages together,
//! admits swaps under the capacity bound, and settles the bookkeeping for
//! finished orders.

use {
    crate::{
        domain::{
            order::{DiscoverOrder, UnderwriteOrder},
            queue::{
                discover::DiscoverHandler, eval::EvalHandler, underwrite::UnderwriteHandler,
                ProcessingQueue,
            },
            swap::SwapDescription,
            tokens::TokenHandler,
        },
        infra::{
            blockchain::Rpc,
            config::{AmbConfig, ChainConfig, WalletConfig},
            metrics::Metrics,
            relayer::RelayerClient,
            store::{Store, Subscription, ON_SEND_ASSET_CHANNEL},
            wallet::Wallet,
        },
    },
    std::{collections::HashMap, collections::VecDeque, sync::Arc},
    tokio::{sync::watch, sync::Mutex, time::Instant},
};

struct NewOrder {
    description: SwapDescription,
    process_at: Instant,
}

pub struct UnderwriterWorker {
    chain: Arc<ChainConfig>,
    store: Store,
    tokens: Arc<Mutex<TokenHandler>>,
    discover: ProcessingQueue<DiscoverHandler>,
    eval: ProcessingQueue<EvalHandler>,
    underwrite: ProcessingQueue<UnderwriteHandler>,
    new_orders: VecDeque<NewOrder>,
    metrics: Arc<Metrics>,
}

impl UnderwriterWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<ChainConfig>,
        store: Store,
        rpc: Rpc,
        wallet: Arc<dyn Wallet>,
        wallet_config: &WalletConfig,
        relayer: RelayerClient,
        ambs: HashMap<String, AmbConfig>,
        enabled: watch::Receiver<bool>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let tokens = Arc::new(Mutex::new(TokenHandler::new(
            Arc::clone(&chain),
            wallet_config.account,
            Arc::clone(&wallet),
            rpc.clone(),
            Arc::clone(&metrics),
        )));
        let discover = ProcessingQueue::new(
            DiscoverHandler::new(Arc::clone(&chain), rpc.clone(), store.clone()),
            chain.retry_interval,
            chain.max_tries,
        );
        let eval = ProcessingQueue::new(
            EvalHandler::new(
                Arc::clone(&chain),
                rpc,
                wallet_config.account,
                Arc::clone(&tokens),
                enabled,
                Arc::clone(&metrics),
            ),
            chain.retry_interval,
            chain.max_tries,
        );
        let underwrite = ProcessingQueue::new(
            UnderwriteHandler::new(
                Arc::clone(&chain),
                wallet,
                relayer,
                ambs,
                Arc::clone(&metrics),
            ),
            chain.retry_interval,
            chain.max_tries,
        );
        Self {
            chain,
            store,
            tokens,
            discover,
            eval,
            underwrite,
            new_orders: VecDeque::new(),
            metrics,
        }
    }

    /// Runs until the worker exits.
    pub async fn run(mut self) {
        let mut ingress = self.subscribe_send_asset().await;
        let mut interval = tokio::time::interval(self.chain.processing_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = ingress.recv() => match received {
                    Some(payload) => self.enqueue_swap(&payload),
                    None => {
                        tracing::warn!(
                            chain = %self.chain.chain_id,
                            "send-asset subscription ended; resubscribing"
                        );
                        tokio::time::sleep(self.chain.retry_interval).await;
                        ingress = self.subscribe_send_asset().await;
                    }
                },
                _ = interval.tick() => self.tick().await,
            }
        }
    }

    async fn subscribe_send_asset(&self) -> Subscription {
        loop {
            match self.store.on(ON_SEND_ASSET_CHANNEL).await {
                Ok(subscription) => return subscription,
                Err(err) => {
                    tracing::warn!(
                        chain = %self.chain.chain_id,
                        ?err,
                        "failed to subscribe to the send-asset channel; retrying"
                    );
                    tokio::time::sleep(self.chain.retry_interval).await;
                }
            }
        }
    }

    /// Ingress: every announced swap destined for this chain becomes a new
    /// order, processed after the configured underwrite delay.
    fn enqueue_swap(&mut self, payload: &str) {
        let description: SwapDescription = match serde_json::from_str(payload) {
            Ok(description) => description,
            Err(err) => {
                tracing::warn!(?err, "dropping unparseable send-asset message");
                return;
            }
        };
        if description.to_chain_id != self.chain.chain_id {
            return;
        }
        self.new_orders.push_back(NewOrder {
            description,
            process_at: Instant::now() + self.chain.underwrite_delay,
        });
    }

    /// One pipeline round: admit under the capacity bound, discover,
    /// evaluate, cover allowances, submit, settle.
    async fn tick(&mut self) {
        self.admit().await;

        self.discover.process_orders().await;
        let discovered = self.discover.get_finished_orders();
        self.eval
            .add_orders(discovered.completed.into_iter().map(|(_, order)| order))
            .await;

        self.eval.process_orders().await;
        let evaluated = self.eval.get_finished_orders();
        let accepted: Vec<UnderwriteOrder> = evaluated
            .completed
            .into_iter()
            .map(|(_, order)| order)
            .collect();

        if !accepted.is_empty() {
            // This blocks the loop until the issued approvals resolve: no
            // underwrite for a token leaves before its allowance batch.
            let registered = self
                .tokens
                .lock()
                .await
                .process_new_allowances(&accepted)
                .await;
            match registered {
                Ok(()) => self.underwrite.add_orders(accepted).await,
                Err(err) => {
                    tracing::error!(
                        chain = %self.chain.chain_id,
                        ?err,
                        "failed to register allowances; dropping the batch"
                    );
                    let mut tokens = self.tokens.lock().await;
                    for order in &accepted {
                        tokens.register_balance_refund(order.to_asset, order.to_asset_allowance);
                    }
                }
            }
        }

        self.underwrite.process_orders().await;
        let finished = self.underwrite.get_finished_orders();
        self.handle_confirmed(finished.completed.iter().map(|(order, _)| order))
            .await;
        self.handle_rejected(finished.rejected.iter().chain(finished.failed.iter()))
            .await;
    }

    /// Admission from the delayed new-order queue, bounded by the remaining
    /// capacity across the evaluation and underwrite stages.
    async fn admit(&mut self) {
        let in_flight = self.eval.size() + self.underwrite.size();
        let mut capacity = self
            .chain
            .max_pending_transactions
            .saturating_sub(in_flight);
        let now = Instant::now();

        let mut admitted = Vec::new();
        while capacity > 0 {
            let due = self
                .new_orders
                .front()
                .map_or(false, |order| order.process_at <= now);
            if !due {
                break;
            }
            let order = self.new_orders.pop_front().expect("front is due");
            if let Some(discover_order) = self.load_order(&order.description).await {
                admitted.push(discover_order);
                capacity -= 1;
            }
        }
        if admitted.is_empty() {
            return;
        }
        self.metrics
            .orders_admitted
            .with_label_values(&[self.chain.chain_id.as_str()])
            .inc_by(admitted.len() as u64);
        self.discover.add_orders(admitted).await;
    }

    async fn load_order(&self, description: &SwapDescription) -> Option<DiscoverOrder> {
        let swap = match self
            .store
            .get_swap_state(
                &description.from_chain_id,
                description.from_vault,
                description.swap_id,
            )
            .await
        {
            Ok(Some(swap)) => swap,
            Ok(None) => {
                tracing::warn!(
                    chain = %self.chain.chain_id,
                    swap_id = ?description.swap_id,
                    "announced swap is missing from the store"
                );
                return None;
            }
            Err(err) => {
                tracing::warn!(
                    chain = %self.chain.chain_id,
                    swap_id = ?description.swap_id,
                    ?err,
                    "failed to load an announced swap"
                );
                return None;
            }
        };
        let Some(amb) = swap.amb_message_send_asset_details.clone() else {
            tracing::warn!(
                chain = %self.chain.chain_id,
                swap_id = ?description.swap_id,
                "announced swap carries no AMB details"
            );
            return None;
        };
        Some(DiscoverOrder { swap, amb })
    }

    async fn handle_confirmed<'a>(&self, orders: impl Iterator<Item = &'a UnderwriteOrder>) {
        let mut tokens = self.tokens.lock().await;
        for order in orders {
            tokens.register_allowance_use(
                order.interface_address,
                order.to_asset,
                order.to_asset_allowance,
            );
        }
    }

    async fn handle_rejected<'a>(&self, orders: impl Iterator<Item = &'a UnderwriteOrder>) {
        let mut tokens = self.tokens.lock().await;
        for order in orders {
            tokens.register_required_allowance_decrease(
                order.interface_address,
                order.to_asset,
                order.to_asset_allowance,
            );
            tokens.register_balance_refund(order.to_asset, order.to_asset_allowance);
        }
    }
}
