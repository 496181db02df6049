//! Retryable ticket decoding and creation-id derivation
//!
//! A `createTokenBridge` transaction on the parent chain emits one
//! `MessageDelivered` (bridge) and one `InboxMessageDelivered` (inbox) log per
//! ticket. The pair is joined on the message number; the inbox payload holds
//! the ticket fields and the bridge log holds the aliased sender and the
//! parent base fee. Together they determine the child-chain transaction hash
//! of the ticket creation.

use alloy::primitives::{Address, Bytes, Log, B256, U256};
use alloy::sol_types::SolEvent;
use alloy_rlp::{Encodable, Header};
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};

use crate::evm::contracts::{IBridge, IInbox, L1_MESSAGE_TYPE_SUBMIT_RETRYABLE_TX};
use crate::hash::{bytes32_to_address, keccak256};

/// Typed-transaction prefix of a submit-retryable transaction on the child chain
pub const SUBMIT_RETRYABLE_TX_TYPE: u8 = 0x69;

/// Number of 32-byte words preceding the calldata in the inbox payload
const RETRYABLE_HEADER_WORDS: usize = 9;

/// Ticket parameters as packed in `InboxMessageDelivered.data`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryableData {
    pub to: Address,
    pub l2_call_value: U256,
    pub deposit: U256,
    pub max_submission_fee: U256,
    pub excess_fee_refund_address: Address,
    pub call_value_refund_address: Address,
    pub gas_limit: U256,
    pub max_fee_per_gas: U256,
    pub data: Bytes,
}

impl RetryableData {
    /// Decode the packed inbox payload: nine words followed by raw calldata
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let header_len = RETRYABLE_HEADER_WORDS * 32;
        if payload.len() < header_len {
            return Err(eyre!(
                "Retryable payload too short: {} bytes, need at least {}",
                payload.len(),
                header_len
            ));
        }

        let word = |i: usize| -> [u8; 32] {
            let mut out = [0u8; 32];
            out.copy_from_slice(&payload[i * 32..(i + 1) * 32]);
            out
        };
        let uint = |i: usize| U256::from_be_bytes(word(i));

        let data_len: usize = uint(8)
            .try_into()
            .map_err(|_| eyre!("Retryable calldata length does not fit in usize"))?;
        if payload.len() < header_len + data_len {
            return Err(eyre!(
                "Retryable payload truncated: declared {} calldata bytes, have {}",
                data_len,
                payload.len() - header_len
            ));
        }
        let data = &payload[payload.len() - data_len..];

        Ok(Self {
            to: bytes32_to_address(&word(0)),
            l2_call_value: uint(1),
            deposit: uint(2),
            max_submission_fee: uint(3),
            excess_fee_refund_address: bytes32_to_address(&word(4)),
            call_value_refund_address: bytes32_to_address(&word(5)),
            gas_limit: uint(6),
            max_fee_per_gas: uint(7),
            data: Bytes::copy_from_slice(data),
        })
    }

    /// Encode into the packed inbox payload layout
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RETRYABLE_HEADER_WORDS * 32 + self.data.len());
        let push_address = |out: &mut Vec<u8>, a: &Address| {
            out.extend_from_slice(&[0u8; 12]);
            out.extend_from_slice(a.as_slice());
        };
        push_address(&mut out, &self.to);
        out.extend_from_slice(&self.l2_call_value.to_be_bytes::<32>());
        out.extend_from_slice(&self.deposit.to_be_bytes::<32>());
        out.extend_from_slice(&self.max_submission_fee.to_be_bytes::<32>());
        push_address(&mut out, &self.excess_fee_refund_address);
        push_address(&mut out, &self.call_value_refund_address);
        out.extend_from_slice(&self.gas_limit.to_be_bytes::<32>());
        out.extend_from_slice(&self.max_fee_per_gas.to_be_bytes::<32>());
        out.extend_from_slice(&U256::from(self.data.len()).to_be_bytes::<32>());
        out.extend_from_slice(&self.data);
        out
    }
}

/// A retryable ticket observed in a parent-chain receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryableMessage {
    pub message_number: U256,
    /// Sender as seen by the child chain (aliased when the caller is a contract)
    pub sender: Address,
    pub base_fee: U256,
    pub child_chain_id: u64,
    pub data: RetryableData,
    /// Hash of the ticket creation transaction on the child chain
    pub creation_id: B256,
}

impl RetryableMessage {
    pub fn new(
        child_chain_id: u64,
        message_number: U256,
        sender: Address,
        base_fee: U256,
        data: RetryableData,
    ) -> Self {
        let creation_id =
            calculate_submit_retryable_id(child_chain_id, message_number, sender, base_fee, &data);
        Self {
            message_number,
            sender,
            base_fee,
            child_chain_id,
            data,
            creation_id,
        }
    }
}

/// Child-chain hash of the submit-retryable transaction for a ticket
///
/// `keccak256(0x69 ++ rlp([chainId, msgNum(32 bytes), from, baseFee, deposit,
/// maxFeePerGas, gasLimit, to, callValue, callValueRefund, maxSubmissionFee,
/// excessFeeRefund, data]))`. A zero destination is encoded as an empty string.
pub fn calculate_submit_retryable_id(
    child_chain_id: u64,
    message_number: U256,
    sender: Address,
    base_fee: U256,
    data: &RetryableData,
) -> B256 {
    let to = if data.to == Address::ZERO {
        Vec::new()
    } else {
        data.to.to_vec()
    };

    let fields: Vec<Vec<u8>> = vec![
        minimal_be(U256::from(child_chain_id)),
        message_number.to_be_bytes::<32>().to_vec(),
        sender.to_vec(),
        minimal_be(base_fee),
        minimal_be(data.deposit),
        minimal_be(data.max_fee_per_gas),
        minimal_be(data.gas_limit),
        to,
        minimal_be(data.l2_call_value),
        data.call_value_refund_address.to_vec(),
        minimal_be(data.max_submission_fee),
        data.excess_fee_refund_address.to_vec(),
        data.data.to_vec(),
    ];

    let payload_length = fields.iter().map(|f| f.as_slice().length()).sum();
    let mut encoded = vec![SUBMIT_RETRYABLE_TX_TYPE];
    Header {
        list: true,
        payload_length,
    }
    .encode(&mut encoded);
    for field in &fields {
        field.as_slice().encode(&mut encoded);
    }

    B256::from(keccak256(&encoded))
}

/// Big-endian bytes without leading zeros; RLP-encoding these as a byte
/// string yields the canonical RLP integer encoding
fn minimal_be(value: U256) -> Vec<u8> {
    value.to_be_bytes_trimmed_vec()
}

/// Extract every retryable ticket from a parent-chain receipt's logs
///
/// Bridge logs with a kind other than submit-retryable are ignored. An inbox
/// log without its bridge counterpart is an error.
pub fn messages_from_logs(child_chain_id: u64, logs: &[Log]) -> Result<Vec<RetryableMessage>> {
    let mut delivered = Vec::new();
    let mut payloads = Vec::new();

    for log in logs {
        match log.topics().first() {
            Some(sig) if *sig == IBridge::MessageDelivered::SIGNATURE_HASH => {
                let event = IBridge::MessageDelivered::decode_log_data(&log.data, true)
                    .map_err(|e| eyre!("Failed to decode MessageDelivered: {}", e))?;
                if event.kind == L1_MESSAGE_TYPE_SUBMIT_RETRYABLE_TX {
                    delivered.push(event);
                }
            }
            Some(sig) if *sig == IInbox::InboxMessageDelivered::SIGNATURE_HASH => {
                let event = IInbox::InboxMessageDelivered::decode_log_data(&log.data, true)
                    .map_err(|e| eyre!("Failed to decode InboxMessageDelivered: {}", e))?;
                payloads.push(event);
            }
            _ => {}
        }
    }

    payloads
        .into_iter()
        .map(|inbox| {
            let bridge = delivered
                .iter()
                .find(|b| b.messageIndex == inbox.messageNum)
                .ok_or_else(|| {
                    eyre!(
                        "No MessageDelivered log for inbox message {}",
                        inbox.messageNum
                    )
                })?;
            let data = RetryableData::decode(&inbox.data)?;
            Ok(RetryableMessage::new(
                child_chain_id,
                inbox.messageNum,
                bridge.sender,
                bridge.baseFeeL1,
                data,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::retryable_logs;
    use alloy::primitives::{address, b256};

    fn sample_data() -> RetryableData {
        RetryableData {
            to: address!("1111111111111111111111111111111111111111"),
            l2_call_value: U256::ZERO,
            deposit: U256::from(1_000_000_000_000_000u64),
            max_submission_fee: U256::from(12_345u64),
            excess_fee_refund_address: address!("2222222222222222222222222222222222222222"),
            call_value_refund_address: address!("3333333333333333333333333333333333333333"),
            gas_limit: U256::from(5_000_000u64),
            max_fee_per_gas: U256::from(100_000_000u64),
            data: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]),
        }
    }

    #[test]
    fn test_payload_decode() {
        let data = sample_data();
        let encoded = data.encode();
        assert_eq!(encoded.len(), 9 * 32 + 4);
        // gas limit sits in word 6
        assert_eq!(
            U256::from_be_slice(&encoded[6 * 32..7 * 32]),
            U256::from(5_000_000u64)
        );
        assert_eq!(RetryableData::decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_payload_too_short() {
        let err = RetryableData::decode(&[0u8; 64]).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn test_payload_truncated_calldata() {
        let mut encoded = sample_data().encode();
        encoded.truncate(encoded.len() - 2);
        assert!(RetryableData::decode(&encoded).is_err());
    }

    #[test]
    fn test_id_depends_on_every_field() {
        let base = sample_data();
        let sender = address!("4444444444444444444444444444444444444444");
        let id = calculate_submit_retryable_id(412346, U256::from(7), sender, U256::from(1), &base);

        assert_ne!(
            id,
            calculate_submit_retryable_id(412347, U256::from(7), sender, U256::from(1), &base)
        );
        assert_ne!(
            id,
            calculate_submit_retryable_id(412346, U256::from(8), sender, U256::from(1), &base)
        );

        let mut changed = base.clone();
        changed.gas_limit += U256::from(1);
        assert_ne!(
            id,
            calculate_submit_retryable_id(412346, U256::from(7), sender, U256::from(1), &changed)
        );
    }

    #[test]
    fn test_zero_destination_encodes_as_empty() {
        let mut data = sample_data();
        data.to = Address::ZERO;
        let sender = Address::repeat_byte(0x44);

        let id = calculate_submit_retryable_id(1, U256::ZERO, sender, U256::ZERO, &data);
        let mut other = data.clone();
        other.to = Address::repeat_byte(0x01);
        assert_ne!(
            id,
            calculate_submit_retryable_id(1, U256::ZERO, sender, U256::ZERO, &other)
        );
    }

    #[test]
    fn test_id_is_stable() {
        let data = sample_data();
        let sender = Address::repeat_byte(0x55);
        let a = calculate_submit_retryable_id(42161, U256::from(99), sender, U256::from(3), &data);
        let b = calculate_submit_retryable_id(42161, U256::from(99), sender, U256::from(3), &data);
        assert_eq!(a, b);
        assert_ne!(
            a,
            b256!("0000000000000000000000000000000000000000000000000000000000000000")
        );
    }

    #[test]
    fn test_messages_from_logs_pairs_by_number() {
        let inbox = Address::repeat_byte(0x0a);
        let bridge = Address::repeat_byte(0x0b);
        let sender = Address::repeat_byte(0x0c);

        let first = sample_data();
        let mut second = sample_data();
        second.data = Bytes::from(vec![0x01; 40]);

        let mut logs = retryable_logs(bridge, inbox, sender, U256::from(10), &first, 100);
        logs.extend(retryable_logs(bridge, inbox, sender, U256::from(10), &second, 101));

        let messages = messages_from_logs(412346, &logs).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message_number, U256::from(100));
        assert_eq!(messages[0].data, first);
        assert_eq!(messages[1].data, second);
        assert_eq!(messages[1].sender, sender);
        assert_ne!(messages[0].creation_id, messages[1].creation_id);
    }

    #[test]
    fn test_inbox_log_without_bridge_log_fails() {
        let logs = retryable_logs(
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            Address::repeat_byte(3),
            U256::ZERO,
            &sample_data(),
            5,
        );
        // keep only the inbox log
        let inbox_only: Vec<_> = logs.into_iter().skip(1).collect();
        assert!(messages_from_logs(1, &inbox_only).is_err());
    }
}
