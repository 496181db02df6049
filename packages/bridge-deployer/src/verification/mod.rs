//! Deferred source verification
//!
//! Deployments append a [`VerificationRequest`] to a shared FIFO queue while
//! the run proceeds; the queue is drained once at the end. Verification never
//! fails a run: backend errors are logged and the next request is tried.

pub mod etherscan;

use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use eyre::Result;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

pub use etherscan::{EtherscanConfig, EtherscanVerifier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationRequest {
    pub chain_id: u64,
    pub contract_name: String,
    /// `path/To/File.sol:Name`, when known from the artifact
    pub source_identifier: Option<String>,
    pub address: Address,
    pub constructor_args: Bytes,
}

/// An explorer that accepts source submissions
#[async_trait]
pub trait VerificationBackend: Send + Sync {
    /// False when credentials are missing; requests are then dropped
    fn is_configured(&self) -> bool;

    /// Submit one request, returning the explorer's acknowledgement
    async fn submit(&self, request: &VerificationRequest) -> Result<String>;
}

/// Counts from one drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub submitted: usize,
    pub failed: usize,
    pub dropped: usize,
}

/// Thread-safe FIFO of pending verifications
#[derive(Clone)]
pub struct VerificationQueue {
    pending: Arc<Mutex<VecDeque<VerificationRequest>>>,
    delay: Duration,
    grace: Duration,
}

impl Default for VerificationQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(30))
    }
}

impl VerificationQueue {
    /// `delay` is waited before each submission, `grace` once after the last
    pub fn new(delay: Duration, grace: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(VecDeque::new())),
            delay,
            grace,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<VerificationRequest>> {
        // a poisoned queue still holds valid requests
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enqueue(&self, request: VerificationRequest) {
        info!(
            contract = %request.contract_name,
            address = %request.address,
            "Queued for verification"
        );
        self.lock().push_back(request);
    }

    /// Snapshot of pending requests in submission order
    pub fn pending(&self) -> Vec<VerificationRequest> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Discard everything pending
    pub fn reset(&self) {
        self.lock().clear();
    }

    fn pop(&self) -> Option<VerificationRequest> {
        self.lock().pop_front()
    }

    /// Submit every pending request in order, then empty the queue
    pub async fn drain(&self, backend: &dyn VerificationBackend) -> DrainSummary {
        let mut summary = DrainSummary::default();

        if !backend.is_configured() {
            summary.dropped = self.len();
            self.reset();
            if summary.dropped > 0 {
                warn!(
                    dropped = summary.dropped,
                    "No explorer API key configured, skipping verification"
                );
            }
            return summary;
        }

        while let Some(request) = self.pop() {
            tokio::time::sleep(self.delay).await;
            match backend.submit(&request).await {
                Ok(ack) => {
                    summary.submitted += 1;
                    info!(
                        contract = %request.contract_name,
                        address = %request.address,
                        ack = %ack,
                        "Verification submitted"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        contract = %request.contract_name,
                        address = %request.address,
                        error = %e,
                        "Verification failed"
                    );
                }
            }
        }

        if summary.submitted + summary.failed > 0 {
            tokio::time::sleep(self.grace).await;
        }
        summary
    }
}
