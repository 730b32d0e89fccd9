//! Destination-chain JSON-RPC access.

use {
    crate::domain::eth::{Address, H256, U256},
    web3::{
        transports::Http,
        types::{BlockId, BlockNumber, Bytes, CallRequest, Filter, FilterBuilder, Log, U64},
        Web3,
    },
};

pub mod contracts;

/// A thin wrapper over a `web3` HTTP transport scoped to one chain.
#[derive(Clone, Debug)]
pub struct Rpc {
    web3: Web3<Http>,
}

/// The observed head (or any queried block) of the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub number: u64,
    pub hash: H256,
    pub timestamp: u64,
}

impl Rpc {
    pub fn new(url: &str) -> Result<Self, web3::Error> {
        Ok(Self {
            web3: Web3::new(Http::new(url)?),
        })
    }

    pub fn web3(&self) -> &Web3<Http> {
        &self.web3
    }

    pub async fn logs(
        &self,
        addresses: Vec<Address>,
        topics: Vec<H256>,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, web3::Error> {
        let filter: Filter = FilterBuilder::default()
            .address(addresses)
            .topics(Some(topics), None, None, None)
            .from_block(BlockNumber::Number(U64::from(from_block)))
            .to_block(BlockNumber::Number(U64::from(to_block)))
            .build();
        self.web3.eth().logs(filter).await
    }

    pub async fn block(&self, id: BlockId) -> Result<Option<BlockInfo>, web3::Error> {
        let block = self.web3.eth().block(id).await?;
        Ok(block.and_then(|block| {
            Some(BlockInfo {
                number: block.number?.as_u64(),
                hash: block.hash?,
                timestamp: block.timestamp.as_u64(),
            })
        }))
    }

    pub async fn latest_block(&self) -> Result<Option<BlockInfo>, web3::Error> {
        self.block(BlockId::Number(BlockNumber::Latest)).await
    }

    pub async fn block_by_number(&self, number: u64) -> Result<Option<BlockInfo>, web3::Error> {
        self.block(BlockId::Number(BlockNumber::Number(U64::from(number))))
            .await
    }

    /// `eth_call` against the latest state.
    pub async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, web3::Error> {
        let request = CallRequest {
            to: Some(to),
            data: Some(Bytes(data)),
            ..Default::default()
        };
        Ok(self.web3.eth().call(request, None).await?.0)
    }

    /// `eth_call` against the pending state, as seen from `from`.
    pub async fn call_pending(
        &self,
        from: Address,
        to: Address,
        data: Vec<u8>,
    ) -> Result<Vec<u8>, web3::Error> {
        let request = CallRequest {
            from: Some(from),
            to: Some(to),
            data: Some(Bytes(data)),
            ..Default::default()
        };
        Ok(self
            .web3
            .eth()
            .call(request, Some(BlockId::Number(BlockNumber::Pending)))
            .await?
            .0)
    }

    /// `eth_estimateGas` against the pending tag, so a not-yet-mined
    /// approval still counts.
    pub async fn estimate_gas_pending(
        &self,
        from: Address,
        to: Address,
        data: Vec<u8>,
    ) -> Result<U256, web3::Error> {
        let request = CallRequest {
            from: Some(from),
            to: Some(to),
            data: Some(Bytes(data)),
            ..Default::default()
        };
        self.web3
            .eth()
            .estimate_gas(request, Some(BlockNumber::Pending))
            .await
    }

    pub async fn gas_price(&self) -> Result<U256, web3::Error> {
        self.web3.eth().gas_price().await
    }

    pub async fn code(&self, address: Address) -> Result<Vec<u8>, web3::Error> {
        Ok(self.web3.eth().code(address, None).await?.0)
    }
}
