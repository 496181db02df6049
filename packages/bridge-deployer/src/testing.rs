//! In-memory chain for unit tests
//!
//! [`MockChainClient`] answers reads from scripted tables and emulates just
//! enough execution for the deployer: plain CREATE, the CREATE2 proxy,
//! one-shot initializers and logs attached to calls to a given address.

use alloy::primitives::{Address, Bytes, Log, TxKind, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use eyre::{eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::create2::{create2_address, init_code_hash};
use crate::evm::client::{ChainClient, TxReceipt};
use crate::evm::contracts::{ArbRetryableTx, IBridge, IInbox, ARB_RETRYABLE_TX};
use crate::hash::keccak256_concat;
use crate::retryable::RetryableData;

/// Revert reason OpenZeppelin's `Initializable` uses on a second call
pub const ALREADY_INITIALIZED_REVERT: &str =
    "execution reverted: Initializable: contract is already initialized";

type CallKey = (Address, [u8; 4]);

#[derive(Default)]
struct MockState {
    nonce: u64,
    block: u64,
    code: HashMap<Address, Bytes>,
    storage: HashMap<(Address, U256), U256>,
    balances: HashMap<Address, U256>,
    call_responses: HashMap<CallKey, std::result::Result<Bytes, String>>,
    gas_estimates: HashMap<CallKey, std::result::Result<u64, String>>,
    default_gas: u64,
    gas_price: u128,
    base_fee: u128,
    receipts: HashMap<B256, TxReceipt>,
    logs: Vec<Log>,
    send_logs: HashMap<Address, Vec<Log>>,
    reverting: HashSet<Address>,
    stalled: HashSet<Address>,
    initializer_selectors: HashSet<[u8; 4]>,
    initialized: HashSet<Address>,
    create2_factories: HashSet<Address>,
    sent: Vec<TransactionRequest>,
}

pub struct MockChainClient {
    chain_id: u64,
    sender: Address,
    state: Mutex<MockState>,
}

fn split_call(tx: &TransactionRequest) -> (Option<Address>, Bytes) {
    let to = match tx.to {
        Some(TxKind::Call(addr)) => Some(addr),
        _ => None,
    };
    let input = tx.input.input().cloned().unwrap_or_default();
    (to, input)
}

fn selector_of(input: &[u8]) -> [u8; 4] {
    let mut selector = [0u8; 4];
    let n = input.len().min(4);
    selector[..n].copy_from_slice(&input[..n]);
    selector
}

impl MockChainClient {
    pub fn new(chain_id: u64) -> Self {
        Self::with_sender(chain_id, Address::repeat_byte(0xde))
    }

    pub fn with_sender(chain_id: u64, sender: Address) -> Self {
        let state = MockState {
            default_gas: 100_000,
            gas_price: 100_000_000,
            base_fee: 1_000_000_000,
            ..Default::default()
        };
        Self {
            chain_id,
            sender,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_code(&self, address: Address, code: impl Into<Bytes>) {
        self.state().code.insert(address, code.into());
    }

    pub fn set_storage(&self, address: Address, slot: U256, value: U256) {
        self.state().storage.insert((address, slot), value);
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state().balances.insert(address, balance);
    }

    pub fn set_gas_price(&self, price: u128) {
        self.state().gas_price = price;
    }

    pub fn set_base_fee(&self, fee: u128) {
        self.state().base_fee = fee;
    }

    pub fn set_default_gas(&self, gas: u64) {
        self.state().default_gas = gas;
    }

    /// Answer `eth_call`s of `selector` on `to` with `output`
    pub fn on_call(&self, to: Address, selector: [u8; 4], output: impl Into<Bytes>) {
        self.state()
            .call_responses
            .insert((to, selector), Ok(output.into()));
    }

    /// Make `eth_call`s of `selector` on `to` revert
    pub fn revert_call(&self, to: Address, selector: [u8; 4]) {
        self.state()
            .call_responses
            .insert((to, selector), Err("execution reverted".to_string()));
    }

    /// Make `eth_call`s of `selector` on `to` fail with a non-revert error
    pub fn fail_call(&self, to: Address, selector: [u8; 4], reason: &str) {
        self.state()
            .call_responses
            .insert((to, selector), Err(reason.to_string()));
    }

    pub fn on_estimate(&self, to: Address, selector: [u8; 4], gas: u64) {
        self.state().gas_estimates.insert((to, selector), Ok(gas));
    }

    pub fn fail_estimate(&self, to: Address, selector: [u8; 4], reason: &str) {
        self.state()
            .gas_estimates
            .insert((to, selector), Err(reason.to_string()));
    }

    /// Attach `logs` to every transaction sent to `to`
    pub fn on_send_logs(&self, to: Address, logs: Vec<Log>) {
        self.state().send_logs.insert(to, logs);
    }

    /// Transactions sent to `to` are mined with a failed status
    pub fn revert_sends_to(&self, to: Address) {
        self.state().reverting.insert(to);
    }

    /// Transactions sent to `to` are accepted but never mined
    pub fn stall_sends_to(&self, to: Address) {
        self.state().stalled.insert(to);
    }

    /// Treat `selector` as a one-shot initializer on every contract
    pub fn track_initializer(&self, selector: [u8; 4]) {
        self.state().initializer_selectors.insert(selector);
    }

    pub fn is_initialized(&self, address: Address) -> bool {
        self.state().initialized.contains(&address)
    }

    /// Emulate a CREATE2 deployment proxy at `factory`
    pub fn install_create2_factory(&self, factory: Address) {
        let mut state = self.state();
        state.create2_factories.insert(factory);
        state.code.insert(factory, Bytes::from_static(&[0x60, 0x20]));
    }

    pub fn insert_receipt(
        &self,
        tx_hash: B256,
        status: bool,
        logs: Vec<Log>,
        contract_address: Option<Address>,
    ) {
        let mut state = self.state();
        state.block += 1;
        let block_number = Some(state.block);
        state.receipts.insert(
            tx_hash,
            TxReceipt {
                tx_hash,
                status,
                block_number,
                contract_address,
                logs,
            },
        );
    }

    /// Make a log visible to `get_logs`
    pub fn push_log(&self, log: Log) {
        self.state().logs.push(log);
    }

    /// Every transaction sent so far
    pub fn sent(&self) -> Vec<TransactionRequest> {
        self.state().sent.clone()
    }

    /// Number of transactions sent to `to`
    pub fn sent_to(&self, to: Address) -> usize {
        self.state()
            .sent
            .iter()
            .filter(|tx| tx.to == Some(TxKind::Call(to)))
            .count()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn sender(&self) -> Address {
        self.sender
    }

    async fn get_code(&self, address: Address) -> Result<Bytes> {
        Ok(self.state().code.get(&address).cloned().unwrap_or_default())
    }

    async fn get_storage_at(&self, address: Address, slot: U256) -> Result<U256> {
        Ok(self
            .state()
            .storage
            .get(&(address, slot))
            .copied()
            .unwrap_or_default())
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        Ok(self
            .state()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes> {
        let (to, input) = split_call(tx);
        let to = to.ok_or_else(|| eyre!("eth_call without a target"))?;
        let selector = selector_of(&input);
        let state = self.state();

        if state.initializer_selectors.contains(&selector) {
            return if state.initialized.contains(&to) {
                Err(eyre!("eth_call failed: {}", ALREADY_INITIALIZED_REVERT))
            } else {
                Ok(Bytes::new())
            };
        }

        match state.call_responses.get(&(to, selector)) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(reason)) => Err(eyre!("eth_call failed: {}", reason)),
            None => Ok(Bytes::new()),
        }
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64> {
        let (to, input) = split_call(tx);
        let state = self.state();
        let Some(to) = to else {
            return Ok(state.default_gas);
        };
        match state.gas_estimates.get(&(to, selector_of(&input))) {
            Some(Ok(gas)) => Ok(*gas),
            Some(Err(reason)) => Err(eyre!("eth_estimateGas failed: {}", reason)),
            None => Ok(state.default_gas),
        }
    }

    async fn gas_price(&self) -> Result<u128> {
        Ok(self.state().gas_price)
    }

    async fn base_fee(&self) -> Result<u128> {
        Ok(self.state().base_fee)
    }

    async fn submit_transaction(&self, tx: TransactionRequest) -> Result<B256> {
        let (to, input) = split_call(&tx);
        let mut state = self.state();
        state.sent.push(tx);

        let nonce = state.nonce;
        state.nonce += 1;
        state.block += 1;
        let tx_hash = B256::from(keccak256_concat(&[
            &self.chain_id.to_be_bytes(),
            &nonce.to_be_bytes(),
            self.sender.as_slice(),
        ]));

        let mut receipt = TxReceipt {
            tx_hash,
            status: true,
            block_number: Some(state.block),
            contract_address: None,
            logs: Vec::new(),
        };

        match to {
            None => {
                let created = self.sender.create(nonce);
                state.code.insert(created, input.clone());
                receipt.contract_address = Some(created);
            }
            Some(factory) if state.create2_factories.contains(&factory) => {
                if input.len() < 32 {
                    receipt.status = false;
                } else {
                    let salt = B256::from_slice(&input[..32]);
                    let init_code = &input[32..];
                    let target = create2_address(factory, salt, init_code_hash(init_code));
                    if state.code.contains_key(&target) {
                        receipt.status = false;
                    } else {
                        state
                            .code
                            .insert(target, Bytes::copy_from_slice(init_code));
                    }
                }
            }
            Some(target) => {
                let selector = selector_of(&input);
                if state.reverting.contains(&target) {
                    receipt.status = false;
                } else if state.initializer_selectors.contains(&selector) {
                    receipt.status = state.initialized.insert(target);
                }
                if receipt.status {
                    if let Some(logs) = state.send_logs.get(&target) {
                        receipt.logs = logs.clone();
                    }
                }
            }
        }

        if to.is_some_and(|target| state.stalled.contains(&target)) {
            return Ok(tx_hash);
        }
        state.receipts.insert(tx_hash, receipt);
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt> {
        self.state()
            .receipts
            .get(&tx_hash)
            .cloned()
            .ok_or_else(|| eyre!("Transaction {} not confirmed after 300s", tx_hash))
    }

    async fn get_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>> {
        Ok(self.state().receipts.get(&tx_hash).cloned())
    }

    async fn get_logs(
        &self,
        address: Address,
        event_signature: B256,
        topic1: Option<B256>,
        _from_block: u64,
    ) -> Result<Vec<Log>> {
        Ok(self
            .state()
            .logs
            .iter()
            .filter(|log| log.address == address)
            .filter(|log| log.topics().first() == Some(&event_signature))
            .filter(|log| topic1.is_none() || log.topics().get(1) == topic1.as_ref())
            .cloned()
            .collect())
    }
}

/// The bridge and inbox logs a parent-chain transaction emits for one ticket
pub fn retryable_logs(
    bridge: Address,
    inbox: Address,
    sender: Address,
    base_fee: U256,
    data: &RetryableData,
    message_number: u64,
) -> Vec<Log> {
    let payload = data.encode();
    let delivered = IBridge::MessageDelivered {
        messageIndex: U256::from(message_number),
        beforeInboxAcc: B256::repeat_byte(0xac),
        inbox,
        kind: crate::evm::contracts::L1_MESSAGE_TYPE_SUBMIT_RETRYABLE_TX,
        sender,
        messageDataHash: B256::from(crate::hash::keccak256(&payload)),
        baseFeeL1: base_fee,
        timestamp: 1_700_000_000,
    };
    let inbox_event = IInbox::InboxMessageDelivered {
        messageNum: U256::from(message_number),
        data: Bytes::from(payload),
    };

    vec![
        Log {
            address: bridge,
            data: delivered.encode_log_data(),
        },
        Log {
            address: inbox,
            data: inbox_event.encode_log_data(),
        },
    ]
}

/// `RedeemScheduled` log for a ticket and its retry transaction
pub fn redeem_scheduled_log(ticket_id: B256, retry_tx_hash: B256) -> Log {
    let event = ArbRetryableTx::RedeemScheduled {
        ticketId: ticket_id,
        retryTxHash: retry_tx_hash,
        sequenceNum: 0,
        donatedGas: 100_000,
        gasDonor: Address::repeat_byte(0xdd),
        maxRefund: U256::ZERO,
        submissionFeeRefund: U256::ZERO,
    };
    Log {
        address: ARB_RETRYABLE_TX,
        data: event.encode_log_data(),
    }
}
