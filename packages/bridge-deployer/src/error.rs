//! Error taxonomy for a deployment run
//!
//! Library functions return `eyre::Result` and raise these typed variants so
//! callers (and tests) can `downcast_ref::<DeployerError>()` to tell a bad
//! salt from a reverted deployment or a failed retryable.

use alloy::primitives::{Address, B256};
use std::fmt;
use thiserror::Error;

use crate::record::DeploymentRecord;

#[derive(Error, Debug)]
pub enum DeployerError {
    /// Missing configuration, unreachable chain or unfunded deployer
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("deployment of {contract} failed: {reason}")]
    Deploy { contract: String, reason: String },

    #[error("invalid CREATE2 salt: expected 32 bytes, got {len}")]
    InvalidSalt { len: usize },

    #[error("deterministic deployment factory not found at {factory}")]
    FactoryNotFound { factory: Address },

    #[error("initialization of {contract} at {address} failed: {reason}")]
    Initialization {
        contract: String,
        address: Address,
        reason: String,
    },

    #[error("gas estimation failed: {reason} (payload 0x{payload})")]
    Estimation { reason: String, payload: String },

    #[error("{} retryable ticket(s) not redeemed: {}", .failures.len(), format_failures(.failures))]
    DispatchFailure { failures: Vec<(B256, String)> },

    #[error("inbox {inbox} already has a dispatched deployment (tx {tx_hash}); remove {marker} to re-run")]
    AlreadyDispatched {
        inbox: Address,
        tx_hash: String,
        marker: String,
    },

    #[error("verification of {contract} failed: {reason}")]
    Verification { contract: String, reason: String },
}

fn format_failures(failures: &[(B256, String)]) -> String {
    failures
        .iter()
        .map(|(id, status)| format!("{id} ({status})"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl DeployerError {
    /// Ticket ids carried by a dispatch failure, if any
    pub fn message_ids(&self) -> Vec<B256> {
        match self {
            DeployerError::DispatchFailure { failures } => {
                failures.iter().map(|(id, _)| *id).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Coordinator step, used to report where a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Preconditions,
    Templates,
    FeeToken,
    Estimate,
    Funding,
    Dispatch,
    Reconcile,
    Persist,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Preconditions => "preconditions",
            Step::Templates => "templates",
            Step::FeeToken => "fee-token",
            Step::Estimate => "estimate",
            Step::Funding => "funding",
            Step::Dispatch => "dispatch",
            Step::Reconcile => "reconcile",
            Step::Persist => "persist",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failed coordinator run
///
/// Carries whatever the coordinator had assembled before the failure so an
/// operator can inspect already-deployed addresses and retry tickets by hand.
#[derive(Error, Debug)]
#[error("step `{step}` failed: {error:#}")]
pub struct RunFailure {
    pub step: Step,
    pub error: eyre::Report,
    pub partial: DeploymentRecord,
    pub message_ids: Vec<B256>,
    pub tx_hash: Option<B256>,
}

impl RunFailure {
    pub fn new(step: Step, error: eyre::Report, partial: DeploymentRecord) -> Self {
        let message_ids = error
            .downcast_ref::<DeployerError>()
            .map(DeployerError::message_ids)
            .unwrap_or_default();
        Self {
            step,
            error,
            partial,
            message_ids,
            tx_hash: None,
        }
    }

    pub fn with_tx_hash(mut self, tx_hash: Option<B256>) -> Self {
        self.tx_hash = tx_hash;
        self
    }

    pub fn with_message_ids(mut self, ids: Vec<B256>) -> Self {
        if !ids.is_empty() {
            self.message_ids = ids;
        }
        self
    }

    /// The typed error behind this failure, if it was raised as one
    pub fn kind(&self) -> Option<&DeployerError> {
        self.error.downcast_ref::<DeployerError>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_failure_lists_ids() {
        let id = B256::repeat_byte(0x42);
        let err = DeployerError::DispatchFailure {
            failures: vec![(id, "expired".to_string())],
        };
        let msg = err.to_string();
        assert!(msg.contains("1 retryable ticket(s) not redeemed"));
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("expired"));
        assert_eq!(err.message_ids(), vec![id]);
    }

    #[test]
    fn test_run_failure_extracts_message_ids() {
        let id = B256::repeat_byte(0x07);
        let report = eyre::Report::new(DeployerError::DispatchFailure {
            failures: vec![(id, "failed".to_string())],
        });
        let failure = RunFailure::new(Step::Dispatch, report, DeploymentRecord::default());

        assert_eq!(failure.message_ids, vec![id]);
        assert!(matches!(
            failure.kind(),
            Some(DeployerError::DispatchFailure { .. })
        ));
        assert!(failure.to_string().starts_with("step `dispatch` failed"));
    }

    #[test]
    fn test_step_display() {
        assert_eq!(Step::Templates.to_string(), "templates");
        assert_eq!(Step::FeeToken.to_string(), "fee-token");
    }
}
