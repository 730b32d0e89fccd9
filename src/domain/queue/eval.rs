//! Order evaluation: quotes the expected output against live conditions and
//! applies the profitability rule.

use {
    crate::{
        domain::{
            eth::{Address, U256},
            order::{EvalOrder, UnderwriteOrder},
            queue::OrderHandler,
            tokens::{TokenError, TokenHandler},
        },
        infra::{
            blockchain::{contracts, Rpc},
            config::ChainConfig,
            metrics::Metrics,
        },
        util::conv,
    },
    bigdecimal::BigDecimal,
    chrono::{Duration as ChronoDuration, Utc},
    std::sync::Arc,
    tokio::sync::{watch, Mutex},
};

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Rpc(#[from] web3::Error),
    #[error(transparent)]
    Abi(#[from] contracts::AbiError),
    #[error(transparent)]
    Token(#[from] TokenError),
    /// Gas estimation rejected the call. The allowance backing it may not
    /// have settled on chain yet, so this is worth retrying.
    #[error("gas estimation failed: {0}")]
    GasEstimate(web3::Error),
}

pub struct EvalHandler {
    chain: Arc<ChainConfig>,
    rpc: Rpc,
    account: Address,
    tokens: Arc<Mutex<TokenHandler>>,
    enabled: watch::Receiver<bool>,
    metrics: Arc<Metrics>,
}

impl EvalHandler {
    pub fn new(
        chain: Arc<ChainConfig>,
        rpc: Rpc,
        account: Address,
        tokens: Arc<Mutex<TokenHandler>>,
        enabled: watch::Receiver<bool>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            chain,
            rpc,
            account,
            tokens,
            enabled,
            metrics,
        }
    }

    fn drop_order(&self, order: &EvalOrder, reason: &str) {
        tracing::info!(
            chain = %self.chain.chain_id,
            swap_id = ?order.swap.swap_id,
            reason,
            "rejecting underwrite candidate"
        );
        self.metrics
            .orders_dropped
            .with_label_values(&[self.chain.chain_id.as_str(), "eval"])
            .inc();
    }
}

#[async_trait::async_trait]
impl OrderHandler for EvalHandler {
    type Error = EvalError;
    type Order = EvalOrder;
    type Result = UnderwriteOrder;

    const MAX_CONCURRENT_ORDERS: usize = 5;

    async fn handle_order(
        &self,
        order: &EvalOrder,
        _retry_count: u32,
    ) -> Result<Option<UnderwriteOrder>, EvalError> {
        let swap = &order.swap;
        let now = Utc::now();

        if !*self.enabled.borrow() {
            self.drop_order(order, "underwriting is disabled");
            return Ok(None);
        }
        let age = now.timestamp().saturating_sub(order.amb.observed_at as i64);
        if age > self.chain.max_underwrite_delay.as_secs() as i64 {
            self.drop_order(order, "swap is too old to underwrite");
            return Ok(None);
        }
        if swap.underwrite_incentive_x16 == 0 {
            self.drop_order(order, "swap carries no underwrite incentive");
            return Ok(None);
        }
        if order.amb.max_gas_delivery < self.chain.min_max_gas_delivery {
            self.drop_order(order, "AMB delivery gas is below the configured minimum");
            return Ok(None);
        }
        match order.amb.deadline {
            Some(deadline)
                if deadline.saturating_sub(now.timestamp().max(0) as u64)
                    < self.chain.min_relay_deadline_duration.as_secs() =>
            {
                self.drop_order(order, "AMB relay deadline is too close");
                return Ok(None);
            }
            _ => {}
        }

        // Quote the expected output.
        let output = self
            .rpc
            .call(
                swap.to_vault,
                contracts::calc_receive_asset_call(order.to_asset, swap.units),
            )
            .await?;
        let expected_return = contracts::decode_uint_return(&output)?;

        let buffer = self.chain.allowance_buffer_for(order.to_asset);
        let Some(to_asset_allowance) =
            conv::scale_amount(&expected_return, &(BigDecimal::from(1) + buffer))
        else {
            self.drop_order(order, "allowance overestimate overflows");
            return Ok(None);
        };

        if self.chain.token(order.to_asset).is_none() {
            self.drop_order(order, "output asset is not a supported token");
            return Ok(None);
        }
        if let Some(max) = self.chain.max_underwrite_allowed_for(order.to_asset) {
            if expected_return > max {
                self.drop_order(order, "expected output exceeds the underwrite cap");
                return Ok(None);
            }
        }
        if !self
            .tokens
            .lock()
            .await
            .has_enough_balance(order.to_asset, to_asset_allowance)
            .await?
        {
            self.drop_order(order, "wallet balance cannot cover the reservation");
            return Ok(None);
        }

        let gas_price = self.rpc.gas_price().await?;
        let costs = &order.relay_delivery_costs;
        let relay_cost = costs
            .gas_observed
            .saturating_mul(gas_price)
            .saturating_add(costs.fee)
            .saturating_add(costs.value);

        let calldata = contracts::underwrite_and_check_connection_call(
            order.source_identifier,
            &crate::domain::payload::Bytes65::from_evm_address(swap.from_vault),
            swap.to_vault,
            order.to_asset,
            swap.units,
            swap.min_out,
            &swap.to_account,
            swap.underwrite_incentive_x16,
            &swap.calldata,
        );
        let gas_limit = self
            .rpc
            .estimate_gas_pending(self.account, order.interface_address, calldata)
            .await
            .map_err(EvalError::GasEstimate)?;
        if let Some(max) = self.chain.max_gas_limit {
            if gas_limit > max {
                self.drop_order(order, "estimated gas exceeds the limit");
                return Ok(None);
            }
        }

        // The profitability rule.
        let underwrite_reward =
            expected_return.saturating_mul(swap.underwrite_incentive_x16.into()) >> 16;
        let total_cost = gas_limit.saturating_mul(gas_price).saturating_add(relay_cost);

        let min_reward = self.chain.min_underwrite_reward_for(order.to_asset);
        let relative_min = conv::scale_amount(
            &expected_return,
            &self.chain.relative_min_underwrite_reward,
        )
        .unwrap_or(U256::MAX);
        if underwrite_reward < min_reward.max(relative_min) {
            self.drop_order(order, "reward is below the configured minimum");
            return Ok(None);
        }
        let scaled_reward =
            conv::scale_amount(&underwrite_reward, &self.chain.profitability_factor)
                .unwrap_or(U256::MAX);
        if scaled_reward < total_cost {
            self.drop_order(order, "reward does not cover the costs");
            return Ok(None);
        }

        // Commit: reserve the balance and stamp the submission deadline.
        self.tokens
            .lock()
            .await
            .register_balance_use(order.to_asset, to_asset_allowance);
        let submission_deadline = now
            + ChronoDuration::from_std(self.chain.max_submission_delay)
                .unwrap_or_else(|_| ChronoDuration::seconds(300));

        tracing::info!(
            chain = %self.chain.chain_id,
            swap_id = ?swap.swap_id,
            %expected_return,
            %underwrite_reward,
            %total_cost,
            "underwrite candidate accepted"
        );

        Ok(Some(UnderwriteOrder {
            swap: swap.clone(),
            amb: order.amb.clone(),
            interface_address: order.interface_address,
            to_asset: order.to_asset,
            expected_underwrite_id: order.expected_underwrite_id,
            source_identifier: order.source_identifier,
            expected_return,
            to_asset_allowance,
            gas_limit,
            relay_cost,
            underwrite_reward,
            submission_deadline,
        }))
    }

    async fn on_order_failure(
        &self,
        order: &EvalOrder,
        retry_count: u32,
        error: &EvalError,
    ) -> bool {
        tracing::warn!(
            swap_id = ?order.swap.swap_id,
            retry_count,
            ?error,
            "evaluation attempt failed"
        );
        true
    }
}
