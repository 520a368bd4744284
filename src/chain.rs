//! Chain reader/writer capability
//!
//! The pipeline consumes chain access as an opaque capability: read state,
//! replay calls, estimate gas, broadcast signed transactions. [`RpcChain`] is
//! the production implementation over an alloy HTTP provider; tests substitute
//! in-module mocks.
//!
//! Providers are built per call from the configured URL. Failures from any of
//! these operations are reported per-operation and never assumed transient.

use crate::model::{DryRunResult, ExecutionReceipt, FeeData, PreparedTransaction};
use crate::{Error, Result};
use alloy::hex;
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder};
use async_trait::async_trait;

/// Read-only state queries.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Replays the call against current state (`eth_call`) without committing.
    async fn call(&self, tx: &PreparedTransaction, from: Address) -> Result<Bytes>;
    async fn estimate_gas(&self, tx: &PreparedTransaction, from: Address) -> Result<u64>;
    async fn get_balance(&self, address: Address) -> Result<U256>;
    async fn fee_data(&self) -> Result<FeeData>;
}

/// Transaction broadcast with an always-on receipt wait. No fire-and-forget
/// sends exist on this interface.
#[async_trait]
pub trait ChainWriter: Send + Sync {
    async fn send_transaction(
        &self,
        tx: &PreparedTransaction,
        wallet: &EthereumWallet,
    ) -> Result<ExecutionReceipt>;
}

/// Combined capability the connectors hold.
pub trait ChainAccess: ChainReader + ChainWriter {}
impl<T: ChainReader + ChainWriter> ChainAccess for T {}

/// Alloy-backed chain access for one configured endpoint.
pub struct RpcChain {
    rpc_url: String,
    chain_id: u64,
}

impl RpcChain {
    pub fn new(rpc_url: String, chain_id: u64) -> Self {
        Self { rpc_url, chain_id }
    }

    pub fn from_rpc_config(rpc: &crate::config::RpcConfig, chain_id: u64) -> Result<Self> {
        let url = rpc
            .get(chain_id)
            .ok_or_else(|| Error::Config(format!("no RPC URL configured for chain {}", chain_id)))?;
        Ok(Self::new(url.to_string(), chain_id))
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn url(&self) -> Result<url::Url> {
        self.rpc_url
            .parse()
            .map_err(|e| Error::Config(format!("invalid RPC URL: {}", e)))
    }
}

#[async_trait]
impl ChainReader for RpcChain {
    async fn call(&self, tx: &PreparedTransaction, from: Address) -> Result<Bytes> {
        let provider = ProviderBuilder::new().connect_http(self.url()?);
        provider
            .call(tx.to_request(from))
            .await
            .map_err(|e| Error::ChainRead(e.to_string()))
    }

    async fn estimate_gas(&self, tx: &PreparedTransaction, from: Address) -> Result<u64> {
        let provider = ProviderBuilder::new().connect_http(self.url()?);
        provider
            .estimate_gas(tx.to_request(from))
            .await
            .map_err(|e| Error::ChainRead(e.to_string()))
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        let provider = ProviderBuilder::new().connect_http(self.url()?);
        provider
            .get_balance(address)
            .await
            .map_err(|e| Error::ChainRead(e.to_string()))
    }

    async fn fee_data(&self) -> Result<FeeData> {
        let provider = ProviderBuilder::new().connect_http(self.url()?);
        let gas_price = provider
            .get_gas_price()
            .await
            .map_err(|e| Error::ChainRead(e.to_string()))?;
        Ok(FeeData { gas_price })
    }
}

#[async_trait]
impl ChainWriter for RpcChain {
    async fn send_transaction(
        &self,
        tx: &PreparedTransaction,
        wallet: &EthereumWallet,
    ) -> Result<ExecutionReceipt> {
        let provider = ProviderBuilder::new()
            .wallet(wallet.clone())
            .connect_http(self.url()?);

        let from = alloy::network::NetworkWallet::<alloy::network::Ethereum>::default_signer_address(wallet);
        let pending = provider
            .send_transaction(tx.to_request(from))
            .await
            .map_err(|e| Error::Send(e.to_string()))?;

        let tx_hash = *pending.tx_hash();
        tracing::info!(tx_hash = %tx_hash, "Transaction broadcast, awaiting receipt");

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| Error::Send(format!("receipt wait failed for {}: {}", tx_hash, e)))?;

        Ok(ExecutionReceipt {
            tx_hash: format!("{:#x}", receipt.transaction_hash),
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            success: receipt.status(),
        })
    }
}

/// Replays `tx` against current chain state. A revert comes back as a failed
/// [`DryRunResult`], not an error; the caller decides what to do with it.
pub async fn dry_run(
    chain: &dyn ChainAccess,
    tx: &PreparedTransaction,
    from: Address,
) -> DryRunResult {
    match chain.call(tx, from).await {
        Ok(data) => {
            let return_data = if data.is_empty() {
                None
            } else {
                Some(format!("{}", data))
            };
            DryRunResult::success(None, return_data)
        }
        Err(e) => DryRunResult::failed(parse_revert_reason(&e.to_string())),
    }
}

/// Parse a revert reason out of an RPC error message, decoding ABI-encoded
/// `Error(string)` payloads when present.
pub fn parse_revert_reason(error: &str) -> String {
    if error.contains("execution reverted") {
        if let Some(start) = error.find("revert: ") {
            let reason = &error[start + 8..];
            if let Some(end) = reason.find('"') {
                return reason[..end].to_string();
            }
            return reason.to_string();
        }
        if let Some(start) = error.find("0x") {
            let hex_data = &error[start..];
            let end = hex_data
                .find(|c: char| !c.is_ascii_hexdigit() && c != 'x')
                .unwrap_or(hex_data.len());
            let hex_str = &hex_data[..end];
            // Error(string) selector is 0x08c379a0; the string starts after
            // selector + offset word + length word
            if hex_str.starts_with("0x08c379a0") && hex_str.len() > 138 {
                if let Ok(decoded) = hex::decode(&hex_str[138..]) {
                    let filtered: Vec<u8> = decoded.into_iter().filter(|&b| b != 0).collect();
                    if let Ok(s) = String::from_utf8(filtered) {
                        return s;
                    }
                }
            }
            return format!("Reverted with data: {}", hex_str);
        }
        return "execution reverted".to_string();
    }

    error.to_string()
}
