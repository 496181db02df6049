//! Token bridge deployer
//!
//! Provisions a rollup's token bridge: the creator contract and its templates
//! on the parent chain, then the child chain contracts through two retryable
//! tickets sent by `createTokenBridge`.
//!
//! - **Address derivation** - CREATE2 addresses ahead of deployment
//! - **Artifacts** - compiler output loading, idempotent deploy and initialize
//! - **Fees** - retryable gas, submission cost and fee-token scaling
//! - **Retryables** - ticket ids, dispatch and redemption tracking
//! - **Verification** - deferred explorer submissions
//! - **Coordinator** - the end-to-end run and its deployment record
//!
//! ## Feature Flags
//!
//! - `testing` - Expose the in-memory chain used by unit tests

pub mod artifact;
pub mod config;
pub mod coordinator;
pub mod create2;
pub mod error;
pub mod evm;
pub mod fees;
pub mod hash;
pub mod record;
pub mod redact;
pub mod retryable;
pub mod run_state;
pub mod verification;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use artifact::{Artifact, ArtifactDeployer, ArtifactStore, ContractArtifact, DeployOptions};
pub use coordinator::{CoordinatorSettings, DeploymentCoordinator};
pub use create2::{create2_address, init_code_hash};
pub use error::{DeployerError, RunFailure, Step};
pub use record::DeploymentRecord;
pub use retryable::{CrossChainDispatcher, MessageOutcome, MessageStatus};
