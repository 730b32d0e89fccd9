//! Destination-side discovery: validates the destination vault, resolves the
//! output asset, and indexes the expected underwrite.

use {
    crate::{
        domain::{
            eth::Address,
            order::{DiscoverOrder, EvalOrder},
            payload,
            queue::OrderHandler,
            swap::SwapState,
        },
        infra::{
            blockchain::{contracts, Rpc},
            config::ChainConfig,
            store::{Store, StoreError},
        },
    },
    moka::future::Cache,
    std::sync::Arc,
};

#[derive(Debug, thiserror::Error)]
pub enum DiscoverError {
    #[error(transparent)]
    Rpc(#[from] web3::Error),
    #[error(transparent)]
    Abi(#[from] contracts::AbiError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct DiscoverHandler {
    chain: Arc<ChainConfig>,
    rpc: Rpc,
    store: Store,
    /// Definitive validation verdicts per vault. Negative verdicts are
    /// cached permanently; transient query failures are not cached at all.
    validated_vaults: Cache<Address, bool>,
    vault_assets: Cache<(Address, u8), Address>,
}

impl DiscoverHandler {
    pub fn new(chain: Arc<ChainConfig>, rpc: Rpc, store: Store) -> Self {
        Self {
            chain,
            rpc,
            store,
            validated_vaults: Cache::new(10_000),
            vault_assets: Cache::new(10_000),
        }
    }

    /// The two-step vault check: created by the configured factory, and
    /// running the approved minimal-proxy pattern over a whitelisted
    /// template.
    async fn validate_vault(
        &self,
        factory: Address,
        interface: Address,
        vault: Address,
        templates: &[Address],
    ) -> Result<bool, DiscoverError> {
        if let Some(valid) = self.validated_vaults.get(&vault).await {
            return Ok(valid);
        }

        let output = self
            .rpc
            .call(factory, contracts::is_created_by_factory_call(interface, vault))
            .await?;
        if !contracts::decode_bool_return(&output)? {
            self.validated_vaults.insert(vault, false).await;
            return Ok(false);
        }

        let code = self.rpc.code(vault).await?;
        let valid = contracts::minimal_proxy_target(&code)
            .map_or(false, |target| templates.contains(&target));
        self.validated_vaults.insert(vault, valid).await;
        Ok(valid)
    }

    async fn resolve_to_asset(
        &self,
        vault: Address,
        asset_index: u8,
    ) -> Result<Address, DiscoverError> {
        if let Some(asset) = self.vault_assets.get(&(vault, asset_index)).await {
            return Ok(asset);
        }
        let output = self
            .rpc
            .call(vault, contracts::token_indexing_call(asset_index))
            .await?;
        let asset = contracts::decode_address_return(&output)?;
        self.vault_assets.insert((vault, asset_index), asset).await;
        Ok(asset)
    }
}

#[async_trait::async_trait]
impl OrderHandler for DiscoverHandler {
    type Error = DiscoverError;
    type Order = DiscoverOrder;
    type Result = EvalOrder;

    const MAX_CONCURRENT_ORDERS: usize = 5;

    async fn handle_order(
        &self,
        order: &DiscoverOrder,
        _retry_count: u32,
    ) -> Result<Option<EvalOrder>, DiscoverError> {
        let swap = &order.swap;
        let interface = order.interface_address();

        let Some(endpoint) = self.chain.endpoint_for_interface(interface) else {
            tracing::info!(
                swap_id = ?swap.swap_id,
                ?interface,
                "skipping swap: no endpoint for the addressed interface"
            );
            return Ok(None);
        };

        if !self
            .validate_vault(
                endpoint.factory_address,
                interface,
                swap.to_vault,
                &endpoint.vault_templates,
            )
            .await?
        {
            tracing::info!(
                swap_id = ?swap.swap_id,
                vault = ?swap.to_vault,
                "skipping swap: destination vault failed validation"
            );
            return Ok(None);
        }

        let Some(source_identifier) = endpoint
            .channels_on_destination
            .get(&swap.from_chain_id)
            .copied()
        else {
            tracing::info!(
                swap_id = ?swap.swap_id,
                from_chain = %swap.from_chain_id,
                "skipping swap: no channel to the source chain"
            );
            return Ok(None);
        };

        let Ok(to_account) = swap.to_account.to_evm_address() else {
            tracing::warn!(
                swap_id = ?swap.swap_id,
                "skipping swap: recipient is not an EVM address"
            );
            return Ok(None);
        };

        let to_asset = self.resolve_to_asset(swap.to_vault, swap.to_asset_index).await?;

        let expected_underwrite_id = payload::underwrite_id(
            swap.to_vault,
            to_asset,
            swap.units,
            swap.min_out,
            to_account,
            swap.underwrite_incentive_x16,
            &swap.calldata,
        );

        // The expirer cannot re-derive the swap from an underwrite id, so
        // the forward index is written even when underwriting is disabled.
        self.store
            .save_swap_description_by_expected_underwrite(
                &swap.to_chain_id,
                interface,
                expected_underwrite_id,
                &swap.description(),
            )
            .await?;
        self.store
            .save_swap_state(SwapState {
                to_asset: Some(to_asset),
                expected_underwrite_id: Some(expected_underwrite_id),
                amb_message_send_asset_details: None,
                ..swap.clone()
            })
            .await?;

        Ok(Some(EvalOrder {
            swap: swap.clone(),
            amb: order.amb.clone(),
            interface_address: interface,
            to_asset,
            expected_underwrite_id,
            source_identifier,
            relay_delivery_costs: endpoint
                .relay_delivery_costs
                .clone()
                .unwrap_or_else(|| self.chain.relay_delivery_costs.clone()),
        }))
    }

    async fn on_order_failure(
        &self,
        order: &DiscoverOrder,
        retry_count: u32,
        error: &DiscoverError,
    ) -> bool {
        tracing::warn!(
            swap_id = ?order.swap.swap_id,
            retry_count,
            ?error,
            "discovery attempt failed"
        );
        true
    }
}
