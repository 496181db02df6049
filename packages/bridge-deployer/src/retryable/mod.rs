//! Retryable tickets: parent-to-child messages and their lifecycle
//!
//! - `ticket` - payload decoding and creation-id derivation
//! - `dispatcher` - submit, poll and await tickets

pub mod dispatcher;
pub mod ticket;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use dispatcher::{
    ensure_all_redeemed, CrossChainDispatcher, Dispatch, MessageResult, TicketStatus,
};
pub use ticket::{calculate_submit_retryable_id, messages_from_logs, RetryableData, RetryableMessage};

/// Observed state of a ticket on the child chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    /// Creation transaction not yet visible on the child chain
    NotYetCreated,
    /// Creation transaction reverted
    CreationFailed,
    /// Ticket exists but auto-redeem failed; needs a manual redeem
    FundsDeposited,
    Redeemed,
    Expired,
}

impl MessageStatus {
    /// Whether the status can no longer change without outside action
    pub fn is_final(&self) -> bool {
        !matches!(self, MessageStatus::NotYetCreated)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageStatus::NotYetCreated => "NOT_YET_CREATED",
            MessageStatus::CreationFailed => "CREATION_FAILED",
            MessageStatus::FundsDeposited => "FUNDS_DEPOSITED",
            MessageStatus::Redeemed => "REDEEMED",
            MessageStatus::Expired => "EXPIRED",
        };
        write!(f, "{}", s)
    }
}

/// How a ticket ended from the coordinator's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOutcome {
    Redeemed,
    Failed,
    Expired,
    TimedOut,
}

impl MessageOutcome {
    /// Outcome for a final status
    pub fn from_status(status: MessageStatus) -> Self {
        match status {
            MessageStatus::Redeemed => MessageOutcome::Redeemed,
            MessageStatus::Expired => MessageOutcome::Expired,
            MessageStatus::CreationFailed | MessageStatus::FundsDeposited => MessageOutcome::Failed,
            MessageStatus::NotYetCreated => MessageOutcome::TimedOut,
        }
    }
}

impl fmt::Display for MessageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageOutcome::Redeemed => "redeemed",
            MessageOutcome::Failed => "failed",
            MessageOutcome::Expired => "expired",
            MessageOutcome::TimedOut => "timed out",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_uncreated_is_pending() {
        assert!(!MessageStatus::NotYetCreated.is_final());
        assert!(MessageStatus::FundsDeposited.is_final());
        assert!(MessageStatus::Expired.is_final());
    }

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(
            MessageOutcome::from_status(MessageStatus::Redeemed),
            MessageOutcome::Redeemed
        );
        assert_eq!(
            MessageOutcome::from_status(MessageStatus::FundsDeposited),
            MessageOutcome::Failed
        );
        assert_eq!(
            MessageOutcome::from_status(MessageStatus::Expired),
            MessageOutcome::Expired
        );
    }

    #[test]
    fn test_status_serializes_like_display() {
        let json = serde_json::to_string(&MessageStatus::FundsDeposited).unwrap();
        assert_eq!(json, "\"FUNDS_DEPOSITED\"");
        assert_eq!(MessageStatus::FundsDeposited.to_string(), "FUNDS_DEPOSITED");
    }
}
