//! EVM RPC Client
//!
//! [`ChainClient`] is the narrow surface the deployer needs from a chain:
//! read code/storage/balances, simulate and estimate calls, submit a signed
//! transaction and wait for its receipt. [`AlloyChainClient`] implements it on
//! top of an alloy provider; tests use [`crate::testing::MockChainClient`].

use alloy::{
    eips::BlockNumberOrTag,
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes, Log, B256, U256},
    providers::{Provider, ProviderBuilder},
    rpc::types::{Filter, TransactionReceipt, TransactionRequest},
    signers::local::PrivateKeySigner,
    sol_types::SolCall,
    transports::{
        http::{Client, Http},
        TransportError,
    },
};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Receipt fields the deployer cares about
#[derive(Debug, Clone, Default)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub status: bool,
    pub block_number: Option<u64>,
    pub contract_address: Option<Address>,
    pub logs: Vec<Log>,
}

impl From<TransactionReceipt> for TxReceipt {
    fn from(receipt: TransactionReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            status: receipt.status(),
            block_number: receipt.block_number,
            contract_address: receipt.contract_address,
            logs: receipt
                .inner
                .logs()
                .iter()
                .map(|log| log.inner.clone())
                .collect(),
        }
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain ID reported by the RPC at connect time
    fn chain_id(&self) -> u64;

    /// Address transactions are sent from (zero for read-only clients)
    fn sender(&self) -> Address;

    async fn get_code(&self, address: Address) -> Result<Bytes>;

    async fn get_storage_at(&self, address: Address, slot: U256) -> Result<U256>;

    async fn get_balance(&self, address: Address) -> Result<U256>;

    /// `eth_call`; reverts surface as errors whose message carries the reason
    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes>;

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64>;

    async fn gas_price(&self) -> Result<u128>;

    /// Base fee of the latest block
    async fn base_fee(&self) -> Result<u128>;

    /// Sign and submit without waiting; returns the transaction hash
    async fn submit_transaction(&self, tx: TransactionRequest) -> Result<B256>;

    /// Wait for a submitted transaction to be mined
    ///
    /// Fails if it is not included within the client's transaction timeout.
    /// Reverted receipts are returned, not raised.
    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt>;

    /// Submit and wait for inclusion
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxReceipt> {
        let tx_hash = self.submit_transaction(tx).await?;
        self.wait_for_receipt(tx_hash).await
    }

    async fn get_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>>;

    /// Logs emitted by `address` with `event_signature` (and optional first
    /// indexed topic) from `from_block` to latest
    async fn get_logs(
        &self,
        address: Address,
        event_signature: B256,
        topic1: Option<B256>,
        from_block: u64,
    ) -> Result<Vec<Log>>;
}

/// Render an RPC error including revert data, so callers can match on
/// reason strings and custom-error selectors.
pub fn describe_rpc_error(err: &TransportError) -> String {
    match err
        .as_error_resp()
        .and_then(|payload| payload.data.as_ref())
    {
        Some(data) => format!("{err} (data: {})", data.get().trim_matches('"')),
        None => err.to_string(),
    }
}

/// Whether a failed call was rejected by the EVM rather than the transport
///
/// Relies on [`describe_rpc_error`] keeping the node's revert message and
/// revert data in the report.
pub fn is_revert(err: &eyre::Report) -> bool {
    let message = format!("{err:#}").to_lowercase();
    message.contains("revert")
}

/// Alloy-backed chain client
pub struct AlloyChainClient<P> {
    provider: P,
    chain_id: u64,
    sender: Address,
    tx_timeout: Duration,
}

impl<P> AlloyChainClient<P>
where
    P: Provider<Http<Client>>,
{
    pub async fn new(provider: P, sender: Address, tx_timeout: Duration) -> Result<Self> {
        let chain_id = provider
            .get_chain_id()
            .await
            .wrap_err("Failed to query chain id")?;

        Ok(Self {
            provider,
            chain_id,
            sender,
            tx_timeout,
        })
    }
}

/// Create a read-only client
pub async fn connect_readonly(rpc_url: &str) -> Result<Arc<dyn ChainClient>> {
    let provider = ProviderBuilder::new().on_http(
        rpc_url
            .parse()
            .map_err(|e| eyre!("Invalid RPC URL: {}", e))?,
    );
    let client = AlloyChainClient::new(provider, Address::ZERO, Duration::from_secs(60)).await?;

    info!(rpc_url = %rpc_url, chain_id = client.chain_id, "Created read-only EVM client");

    Ok(Arc::new(client))
}

/// Create a client that signs with `private_key`
pub async fn connect_with_signer(
    rpc_url: &str,
    private_key: &str,
    tx_timeout: Duration,
) -> Result<Arc<dyn ChainClient>> {
    let signer: PrivateKeySigner = private_key
        .parse()
        .map_err(|e| eyre!("Invalid private key: {}", e))?;

    let address = signer.address();
    let wallet = EthereumWallet::from(signer);

    let provider = ProviderBuilder::new()
        .with_recommended_fillers()
        .wallet(wallet)
        .on_http(
            rpc_url
                .parse()
                .map_err(|e| eyre!("Invalid RPC URL: {}", e))?,
        );
    let client = AlloyChainClient::new(provider, address, tx_timeout).await?;

    info!(
        rpc_url = %rpc_url,
        chain_id = client.chain_id,
        address = %address,
        "Created EVM client with signer"
    );

    Ok(Arc::new(client))
}

#[async_trait]
impl<P> ChainClient for AlloyChainClient<P>
where
    P: Provider<Http<Client>>,
{
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn sender(&self) -> Address {
        self.sender
    }

    async fn get_code(&self, address: Address) -> Result<Bytes> {
        let code = self.provider.get_code_at(address).await?;
        Ok(code)
    }

    async fn get_storage_at(&self, address: Address, slot: U256) -> Result<U256> {
        let value = self.provider.get_storage_at(address, slot).await?;
        Ok(value)
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        let balance = self.provider.get_balance(address).await?;
        Ok(balance)
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes> {
        self.provider
            .call(tx)
            .await
            .map_err(|e| eyre!("eth_call failed: {}", describe_rpc_error(&e)))
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64> {
        self.provider
            .estimate_gas(tx)
            .await
            .map_err(|e| eyre!("eth_estimateGas failed: {}", describe_rpc_error(&e)))
    }

    async fn gas_price(&self) -> Result<u128> {
        let price = self
            .provider
            .get_gas_price()
            .await
            .wrap_err("Failed to get gas price")?;
        Ok(price)
    }

    async fn base_fee(&self) -> Result<u128> {
        let history = self
            .provider
            .get_fee_history(1, BlockNumberOrTag::Latest, &[])
            .await
            .wrap_err("Failed to get fee history")?;

        history
            .base_fee_per_gas
            .first()
            .copied()
            .ok_or_else(|| eyre!("Latest block has no base fee"))
    }

    async fn submit_transaction(&self, tx: TransactionRequest) -> Result<B256> {
        let tx = if tx.from.is_none() && self.sender != Address::ZERO {
            tx.with_from(self.sender)
        } else {
            tx
        };

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| eyre!("Failed to send transaction: {}", describe_rpc_error(&e)))?;

        let tx_hash = *pending.tx_hash();
        debug!(tx_hash = %tx_hash, "Transaction submitted");
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt> {
        let deadline = Instant::now() + self.tx_timeout;
        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(tx_hash)
                .await
                .wrap_err_with(|| format!("Failed to fetch receipt of {tx_hash}"))?;
            if let Some(receipt) = receipt {
                return Ok(receipt.into());
            }
            if Instant::now() >= deadline {
                return Err(eyre!(
                    "Transaction {} not confirmed after {:?}",
                    tx_hash,
                    self.tx_timeout
                ));
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    async fn get_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>> {
        let receipt = self.provider.get_transaction_receipt(tx_hash).await?;
        Ok(receipt.map(Into::into))
    }

    async fn get_logs(
        &self,
        address: Address,
        event_signature: B256,
        topic1: Option<B256>,
        from_block: u64,
    ) -> Result<Vec<Log>> {
        let mut filter = Filter::new()
            .address(address)
            .event_signature(event_signature)
            .from_block(from_block);
        if let Some(topic) = topic1 {
            filter = filter.topic1(topic);
        }

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .wrap_err("Failed to query logs")?;

        Ok(logs.into_iter().map(|log| log.inner).collect())
    }
}

// ============================================================================
// Typed helpers
// ============================================================================

/// Build a call transaction for an ABI-encoded call
pub fn call_request<C: SolCall>(to: Address, call: &C) -> TransactionRequest {
    TransactionRequest::default()
        .with_to(to)
        .with_input(Bytes::from(call.abi_encode()))
}

/// `eth_call` a typed function and decode its return value
pub async fn call_contract<C>(client: &dyn ChainClient, to: Address, call: &C) -> Result<C::Return>
where
    C: SolCall + Sync,
{
    let output = client.call(&call_request(to, call)).await?;
    C::abi_decode_returns(&output, true)
        .map_err(|e| eyre!("Failed to decode {} return from {}: {}", C::SIGNATURE, to, e))
}

/// Send a typed call and require a successful receipt
pub async fn send_call<C>(
    client: &dyn ChainClient,
    to: Address,
    call: &C,
    value: Option<U256>,
) -> Result<TxReceipt>
where
    C: SolCall + Sync,
{
    let mut tx = call_request(to, call);
    if let Some(v) = value {
        tx = tx.with_value(v);
    }

    let receipt = client.send_transaction(tx).await?;
    if !receipt.status {
        return Err(eyre!(
            "{} to {} reverted (tx {})",
            C::SIGNATURE,
            to,
            receipt.tx_hash
        ));
    }
    Ok(receipt)
}

/// Whether an address holds contract code
pub async fn has_code(client: &dyn ChainClient, address: Address) -> Result<bool> {
    Ok(!client.get_code(address).await?.is_empty())
}
