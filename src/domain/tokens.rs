//! Token allowance and wallet balance bookkeeping.
//!
//! Per destination interface the handler tracks the allowance the pipeline
//! requires (the sum of in-flight reservations) against the allowance
//! granted on chain, and issues approval transactions to keep
//! `set >= required`. Per token it tracks the spendable wallet balance,
//! conservatively: the balance as of the last query minus everything
//! reserved since.

use {
    crate::{
        domain::{
            eth::{Address, ChainId, U256},
            order::UnderwriteOrder,
        },
        infra::{
            blockchain::{contracts, Rpc},
            config::ChainConfig,
            metrics::Metrics,
            wallet::{SubmitOptions, SubmitOutcome, Transaction, TransactionMetadata, Wallet},
        },
    },
    futures::future::join_all,
    std::{collections::HashMap, sync::Arc},
};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("allowance query failed: {0}")]
    Rpc(#[from] web3::Error),
    #[error(transparent)]
    Abi(#[from] contracts::AbiError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct AllowanceEntry {
    /// Sum of the reservations of all in-flight orders for this
    /// interface/token.
    required: U256,
    /// Last known (or in-flight) on-chain allowance.
    set: U256,
}

#[derive(Clone, Copy, Debug, Default)]
struct BalanceTracker {
    wallet_balance: U256,
    transactions_since_last_update: u64,
    is_low: bool,
    initialized: bool,
}

pub struct TokenHandler {
    chain: Arc<ChainConfig>,
    account: Address,
    wallet: Arc<dyn Wallet>,
    rpc: Rpc,
    metrics: Arc<Metrics>,
    allowances: HashMap<(Address, Address), AllowanceEntry>,
    balances: HashMap<Address, BalanceTracker>,
}

impl TokenHandler {
    pub fn new(
        chain: Arc<ChainConfig>,
        account: Address,
        wallet: Arc<dyn Wallet>,
        rpc: Rpc,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            chain,
            account,
            wallet,
            rpc,
            metrics,
            allowances: HashMap::new(),
            balances: HashMap::new(),
        }
    }

    fn chain_id(&self) -> &ChainId {
        &self.chain.chain_id
    }

    // Allowances.

    /// Registers the reservations of a batch of accepted orders and brings
    /// the on-chain allowances up to cover them. Resolves once every issued
    /// approval has either confirmed or failed.
    pub async fn process_new_allowances(
        &mut self,
        orders: &[UnderwriteOrder],
    ) -> Result<(), TokenError> {
        for order in orders {
            self.ensure_allowance_entry(order.interface_address, order.to_asset)
                .await?;
            let entry = self
                .allowances
                .get_mut(&(order.interface_address, order.to_asset))
                .expect("entry ensured above");
            entry.required = entry.required.saturating_add(order.to_asset_allowance);
        }
        self.set_required_allowances().await;
        Ok(())
    }

    /// A successful underwrite consumed part of the granted allowance;
    /// both figures shrink. Because reservations overestimate, a small
    /// hanging allowance may remain until the next approval pass clears it.
    pub fn register_allowance_use(&mut self, interface: Address, token: Address, amount: U256) {
        if let Some(entry) = self.allowances.get_mut(&(interface, token)) {
            entry.required = entry.required.saturating_sub(amount);
            entry.set = entry.set.saturating_sub(amount);
        }
    }

    /// A rejected or failed order releases its reservation so the required
    /// figure does not inflate.
    pub fn register_required_allowance_decrease(
        &mut self,
        interface: Address,
        token: Address,
        amount: U256,
    ) {
        if let Some(entry) = self.allowances.get_mut(&(interface, token)) {
            entry.required = entry.required.saturating_sub(amount);
        }
    }

    async fn ensure_allowance_entry(
        &mut self,
        interface: Address,
        token: Address,
    ) -> Result<(), TokenError> {
        if self.allowances.contains_key(&(interface, token)) {
            return Ok(());
        }
        let output = self
            .rpc
            .call(token, contracts::allowance_call(self.account, interface))
            .await?;
        let set = contracts::decode_uint_return(&output)?;
        self.allowances
            .insert((interface, token), AllowanceEntry { required: U256::zero(), set });
        Ok(())
    }

    /// Brings every tracked allowance in line with the policy:
    ///
    /// - Without an approval buffer: grant the maximum value whenever the
    ///   remaining allowance dips below half of it.
    /// - With buffer `B`: approve to `required + B` when short, and also
    ///   when the grant exceeds `required + 2B` (the factor two keeps the
    ///   threshold from churning).
    ///
    /// The tracked grant is updated optimistically before submission; a
    /// failed approval gets its delta subtracted back and the next pass
    /// re-evaluates.
    async fn set_required_allowances(&mut self) {
        let mut approvals = Vec::new();
        for ((interface, token), entry) in &mut self.allowances {
            let target = match self.chain.approval_buffer_for(*token) {
                None => (entry.set < U256::MAX / 2).then_some(U256::MAX),
                Some(buffer) => {
                    let refill = entry.required.saturating_add(buffer);
                    if entry.set < entry.required {
                        Some(refill)
                    } else if entry.set > entry.required.saturating_add(buffer * 2) {
                        Some(refill)
                    } else {
                        None
                    }
                }
            };
            let Some(target) = target else {
                continue;
            };
            if target == entry.set {
                continue;
            }
            approvals.push((*interface, *token, entry.set, target));
            entry.set = target;
        }

        let outcomes = join_all(approvals.into_iter().map(|(interface, token, previous, target)| {
            let wallet = Arc::clone(&self.wallet);
            let chain_id = self.chain_id().clone();
            async move {
                let outcome = wallet
                    .submit(
                        Transaction {
                            to: token,
                            data: contracts::approve_call(interface, target),
                            gas_limit: None,
                        },
                        TransactionMetadata {
                            chain_id,
                            label: format!("approve 0x{token:x} -> 0x{interface:x}"),
                        },
                        SubmitOptions {
                            deadline: None,
                            retry_on_nonce_confirmation_error: false,
                        },
                    )
                    .await;
                (interface, token, previous, target, outcome)
            }
        }))
        .await;

        for (interface, token, previous, target, outcome) in outcomes {
            match outcome {
                SubmitOutcome::Confirmed { tx_hash, .. } => {
                    self.metrics
                        .approvals_submitted
                        .with_label_values(&[self.chain_id().as_str()])
                        .inc();
                    tracing::info!(
                        chain = %self.chain_id(),
                        token = ?token,
                        interface = ?interface,
                        allowance = %target,
                        ?tx_hash,
                        "allowance updated"
                    );
                }
                SubmitOutcome::SubmissionError(err) | SubmitOutcome::ConfirmationError(err) => {
                    tracing::warn!(
                        chain = %self.chain_id(),
                        token = ?token,
                        interface = ?interface,
                        ?err,
                        "approval failed; reverting the tracked allowance"
                    );
                    if let Some(entry) = self.allowances.get_mut(&(interface, token)) {
                        // Subtract the optimistic delta back, in either
                        // direction.
                        if target >= previous {
                            entry.set = entry.set.saturating_sub(target - previous);
                        } else {
                            entry.set = entry.set.saturating_add(previous - target);
                        }
                    }
                }
            }
        }
    }

    // Balances.

    /// Whether the wallet can cover `amount` of `token`, refreshing the
    /// balance from the chain when stale.
    pub async fn has_enough_balance(
        &mut self,
        token: Address,
        amount: U256,
    ) -> Result<bool, TokenError> {
        let needs_update = match self.balances.get(&token) {
            None => true,
            Some(tracker) => {
                !tracker.initialized
                    || tracker.transactions_since_last_update
                        > self.chain.token_balance_update_interval
                    || tracker.is_low
            }
        };
        if needs_update {
            self.refresh_balance(token).await?;
        }
        Ok(self.balances[&token].wallet_balance >= amount)
    }

    pub fn register_balance_use(&mut self, token: Address, amount: U256) {
        let warning = self.chain.low_balance_warning_for(token);
        let chain_id = self.chain.chain_id.clone();
        let tracker = self.balances.entry(token).or_default();
        tracker.wallet_balance = tracker.wallet_balance.saturating_sub(amount);
        tracker.transactions_since_last_update += 1;
        Self::update_low_flag(tracker, token, warning, &chain_id);
    }

    pub fn register_balance_refund(&mut self, token: Address, amount: U256) {
        let warning = self.chain.low_balance_warning_for(token);
        let chain_id = self.chain.chain_id.clone();
        let tracker = self.balances.entry(token).or_default();
        tracker.wallet_balance = tracker.wallet_balance.saturating_add(amount);
        Self::update_low_flag(tracker, token, warning, &chain_id);
    }

    async fn refresh_balance(&mut self, token: Address) -> Result<(), TokenError> {
        // Pending tag, so our own unmined spends already count.
        let output = self
            .rpc
            .call_pending(self.account, token, contracts::balance_of_call(self.account))
            .await?;
        let balance = contracts::decode_uint_return(&output)?;
        let warning = self.chain.low_balance_warning_for(token);
        let chain_id = self.chain.chain_id.clone();
        let tracker = self.balances.entry(token).or_default();
        tracker.wallet_balance = balance;
        tracker.transactions_since_last_update = 0;
        tracker.initialized = true;
        Self::update_low_flag(tracker, token, warning, &chain_id);
        Ok(())
    }

    fn update_low_flag(
        tracker: &mut BalanceTracker,
        token: Address,
        warning: Option<U256>,
        chain_id: &ChainId,
    ) {
        let Some(threshold) = warning else {
            return;
        };
        let is_low = tracker.wallet_balance < threshold;
        if is_low && !tracker.is_low {
            tracing::warn!(
                chain = %chain_id,
                token = ?token,
                balance = %tracker.wallet_balance,
                %threshold,
                "wallet balance is low"
            );
        } else if !is_low && tracker.is_low {
            tracing::info!(
                chain = %chain_id,
                token = ?token,
                balance = %tracker.wallet_balance,
                "wallet balance recovered"
            );
        }
        tracker.is_low = is_low;
    }

    #[cfg(test)]
    pub(crate) fn seed_allowance(&mut self, interface: Address, token: Address, set: U256) {
        self.allowances
            .insert((interface, token), AllowanceEntry { required: U256::zero(), set });
    }

    #[cfg(test)]
    pub(crate) fn allowance(&self, interface: Address, token: Address) -> (U256, U256) {
        let entry = self.allowances[&(interface, token)];
        (entry.required, entry.set)
    }

    #[cfg(test)]
    pub(crate) fn seed_balance(&mut self, token: Address, balance: U256) {
        self.balances.insert(
            token,
            BalanceTracker {
                wallet_balance: balance,
                transactions_since_last_update: 0,
                is_low: false,
                initialized: true,
            },
        );
    }
}
