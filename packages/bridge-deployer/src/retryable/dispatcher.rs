//! Cross-chain dispatcher
//!
//! Submits a parent-chain transaction that creates retryable tickets, then
//! tracks each ticket on the child chain until it reaches a final state or
//! the overall deadline passes. Tickets are awaited concurrently and reported
//! in dispatch order.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolEvent;
use eyre::{eyre, Result, WrapErr};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::ticket::{messages_from_logs, RetryableMessage};
use super::{MessageOutcome, MessageStatus};
use crate::error::DeployerError;
use crate::evm::client::{call_request, is_revert, ChainClient, TxReceipt};
use crate::evm::contracts::{ArbRetryableTx, ARB_RETRYABLE_TX};

/// Result of submitting a ticket-creating transaction
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub receipt: TxReceipt,
    /// Tickets in the order they were created by the transaction
    pub messages: Vec<RetryableMessage>,
}

impl Dispatch {
    pub fn message_ids(&self) -> Vec<B256> {
        self.messages.iter().map(|m| m.creation_id).collect()
    }
}

/// Point-in-time status of one ticket
#[derive(Debug, Clone)]
pub struct TicketStatus {
    pub status: MessageStatus,
    /// Receipt of the successful redemption, when `status` is `Redeemed`
    pub redeem_receipt: Option<TxReceipt>,
}

/// Final report for one ticket
#[derive(Debug, Clone)]
pub struct MessageResult {
    pub creation_id: B256,
    pub outcome: MessageOutcome,
    /// Last status observed before the outcome was decided
    pub last_status: MessageStatus,
    pub redeem_receipt: Option<TxReceipt>,
}

impl MessageResult {
    /// Address created by the redemption (e.g. the child-chain factory)
    pub fn created_address(&self) -> Option<Address> {
        self.redeem_receipt
            .as_ref()
            .and_then(|r| r.contract_address)
    }
}

pub struct CrossChainDispatcher {
    source: Arc<dyn ChainClient>,
    destination: Arc<dyn ChainClient>,
    poll_interval: Duration,
}

impl CrossChainDispatcher {
    pub fn new(
        source: Arc<dyn ChainClient>,
        destination: Arc<dyn ChainClient>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            destination,
            poll_interval,
        }
    }

    /// Submit `calldata` to `to` on the parent chain and collect the tickets
    /// it created. Fails if the transaction reverts or the number of tickets
    /// differs from `expected`.
    pub async fn dispatch(
        &self,
        to: Address,
        calldata: Bytes,
        value: U256,
        expected: usize,
    ) -> Result<Dispatch> {
        let tx_hash = self.submit(to, calldata, value).await?;
        self.collect(tx_hash, expected).await
    }

    /// Broadcast the ticket-creating transaction without waiting for it
    pub async fn submit(&self, to: Address, calldata: Bytes, value: U256) -> Result<B256> {
        let tx = TransactionRequest::default()
            .with_to(to)
            .with_input(calldata)
            .with_value(value);

        let tx_hash = self
            .source
            .submit_transaction(tx)
            .await
            .wrap_err("Failed to submit ticket-creating transaction")?;
        info!(tx_hash = %tx_hash, to = %to, "Ticket-creating transaction submitted");
        Ok(tx_hash)
    }

    /// Wait for a submitted transaction and decode the tickets it created
    pub async fn collect(&self, tx_hash: B256, expected: usize) -> Result<Dispatch> {
        let receipt = self.source.wait_for_receipt(tx_hash).await?;

        if !receipt.status {
            return Err(eyre!(
                "Ticket-creating transaction {} reverted",
                receipt.tx_hash
            ));
        }

        let messages = messages_from_logs(self.destination.chain_id(), &receipt.logs)?;
        if messages.len() != expected {
            return Err(eyre!(
                "Expected {} retryable ticket(s) in tx {}, found {}",
                expected,
                receipt.tx_hash,
                messages.len()
            ));
        }

        for (index, message) in messages.iter().enumerate() {
            info!(
                index = index,
                ticket_id = %message.creation_id,
                message_number = %message.message_number,
                gas_limit = %message.data.gas_limit,
                "Retryable ticket created"
            );
        }

        Ok(Dispatch { receipt, messages })
    }

    /// Classify a ticket by looking at the child chain once
    pub async fn status(&self, creation_id: B256) -> Result<TicketStatus> {
        let Some(creation) = self.destination.get_receipt(creation_id).await? else {
            return Ok(TicketStatus {
                status: MessageStatus::NotYetCreated,
                redeem_receipt: None,
            });
        };

        if !creation.status {
            return Ok(TicketStatus {
                status: MessageStatus::CreationFailed,
                redeem_receipt: None,
            });
        }

        // Auto-redeem is scheduled in the creation transaction itself
        if let Some(receipt) = self.successful_redeem(&creation.logs).await? {
            return Ok(TicketStatus {
                status: MessageStatus::Redeemed,
                redeem_receipt: Some(receipt),
            });
        }

        let timeout = ArbRetryableTx::getTimeoutCall {
            ticketId: creation_id,
        };
        match self
            .destination
            .call(&call_request(ARB_RETRYABLE_TX, &timeout))
            .await
        {
            Ok(_) => {
                return Ok(TicketStatus {
                    status: MessageStatus::FundsDeposited,
                    redeem_receipt: None,
                })
            }
            // NoTicketWithID: gone from the retryable table
            Err(e) if is_revert(&e) => {}
            Err(e) => return Err(e.wrap_err(format!("getTimeout({creation_id}) failed"))),
        }

        // Either redeemed manually or expired
        let from_block = creation.block_number.unwrap_or_default();
        let manual = self
            .destination
            .get_logs(
                ARB_RETRYABLE_TX,
                ArbRetryableTx::RedeemScheduled::SIGNATURE_HASH,
                Some(creation_id),
                from_block,
            )
            .await?;
        if let Some(receipt) = self.successful_redeem(&manual).await? {
            return Ok(TicketStatus {
                status: MessageStatus::Redeemed,
                redeem_receipt: Some(receipt),
            });
        }

        Ok(TicketStatus {
            status: MessageStatus::Expired,
            redeem_receipt: None,
        })
    }

    /// First successful redemption among `RedeemScheduled` logs
    async fn successful_redeem(
        &self,
        logs: &[alloy::primitives::Log],
    ) -> Result<Option<TxReceipt>> {
        for log in logs {
            if log.address != ARB_RETRYABLE_TX
                || log.topics().first() != Some(&ArbRetryableTx::RedeemScheduled::SIGNATURE_HASH)
            {
                continue;
            }
            let event = ArbRetryableTx::RedeemScheduled::decode_log_data(&log.data, true)
                .map_err(|e| eyre!("Failed to decode RedeemScheduled: {}", e))?;

            match self.destination.get_receipt(event.retryTxHash).await? {
                Some(receipt) if receipt.status => return Ok(Some(receipt)),
                Some(_) => {
                    debug!(retry_tx = %event.retryTxHash, "Redeem attempt reverted");
                }
                None => {
                    debug!(retry_tx = %event.retryTxHash, "Redeem attempt not yet mined");
                }
            }
        }
        Ok(None)
    }

    /// Poll one ticket until it is final or `deadline` passes
    async fn await_one(&self, message: &RetryableMessage, deadline: Instant) -> MessageResult {
        let id = message.creation_id;
        let mut last = MessageStatus::NotYetCreated;

        loop {
            match self.status(id).await {
                Ok(observed) => {
                    if observed.status != last {
                        debug!(ticket_id = %id, status = %observed.status, "Ticket status changed");
                    }
                    last = observed.status;
                    if observed.status.is_final() {
                        let outcome = MessageOutcome::from_status(observed.status);
                        return MessageResult {
                            creation_id: id,
                            outcome,
                            last_status: observed.status,
                            redeem_receipt: observed.redeem_receipt,
                        };
                    }
                }
                Err(e) => {
                    warn!(ticket_id = %id, error = %e, "Ticket status poll failed, retrying");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(ticket_id = %id, status = %last, "Ticket did not settle before deadline");
                return MessageResult {
                    creation_id: id,
                    outcome: MessageOutcome::TimedOut,
                    last_status: last,
                    redeem_receipt: None,
                };
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Await every ticket concurrently under one overall deadline
    ///
    /// Results are returned in the order of `messages`.
    pub async fn await_all(
        &self,
        messages: &[RetryableMessage],
        timeout: Duration,
    ) -> Vec<MessageResult> {
        let deadline = Instant::now() + timeout;
        let results = join_all(messages.iter().map(|m| self.await_one(m, deadline))).await;

        for result in &results {
            info!(
                ticket_id = %result.creation_id,
                outcome = %result.outcome,
                "Ticket settled"
            );
        }
        results
    }
}

/// Fail unless every ticket was redeemed
pub fn ensure_all_redeemed(results: &[MessageResult]) -> Result<()> {
    let failures: Vec<(B256, String)> = results
        .iter()
        .filter(|r| r.outcome != MessageOutcome::Redeemed)
        .map(|r| (r.creation_id, format!("{} / {}", r.outcome, r.last_status)))
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(DeployerError::DispatchFailure { failures }.into())
    }
}
