//! Per-inbox run marker
//!
//! Ticket creation is not idempotent: a second `createTokenBridge` for the
//! same inbox would pay for and create a second pair of tickets. The marker
//! file `<dir>/<inbox>.json` records how far a run got so a re-run stops
//! before dispatching again.

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::DeployerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    /// Dispatch is about to be sent
    Started,
    /// Dispatch was broadcast; it may still be pending
    Submitted,
    /// Tickets exist on the parent chain
    Dispatched,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub inbox: Address,
    pub stage: RunStage,
    pub tx_hash: Option<B256>,
    #[serde(default)]
    pub message_ids: Vec<B256>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RunStateStore {
    dir: PathBuf,
}

impl RunStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, inbox: Address) -> PathBuf {
        self.dir.join(format!("{}.json", inbox.to_checksum(None)))
    }

    pub fn load(&self, inbox: Address) -> Result<Option<RunState>> {
        let path = self.path_for(inbox);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .wrap_err_with(|| format!("Failed to read run marker {}", path.display()))?;
        let state = serde_json::from_str(&content)
            .wrap_err_with(|| format!("Invalid run marker {}", path.display()))?;
        Ok(Some(state))
    }

    fn save(&self, state: &RunState) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .wrap_err_with(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.path_for(state.inbox);
        std::fs::write(&path, serde_json::to_string_pretty(state)?)
            .wrap_err_with(|| format!("Failed to write run marker {}", path.display()))?;
        debug!(path = %path.display(), stage = ?state.stage, "Run marker updated");
        Ok(())
    }

    /// Refuse to proceed if a dispatch was already broadcast for `inbox`
    ///
    /// A marker left at `Started` means the previous run stopped before
    /// broadcasting; it is reported but does not block. From `Submitted` on,
    /// the operator has to check the recorded transaction and remove the
    /// marker by hand.
    pub fn guard(&self, inbox: Address) -> Result<()> {
        match self.load(inbox)? {
            Some(state) if state.stage != RunStage::Started => {
                Err(DeployerError::AlreadyDispatched {
                    inbox,
                    tx_hash: state
                        .tx_hash
                        .map(|h| h.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                    marker: self.path_for(inbox).display().to_string(),
                }
                .into())
            }
            Some(_) => {
                info!(inbox = %inbox, "Previous run stopped before dispatch, continuing");
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn mark_started(&self, inbox: Address) -> Result<()> {
        self.save(&RunState {
            inbox,
            stage: RunStage::Started,
            tx_hash: None,
            message_ids: Vec::new(),
            updated_at: Utc::now(),
        })
    }

    pub fn mark_submitted(&self, inbox: Address, tx_hash: B256) -> Result<()> {
        self.save(&RunState {
            inbox,
            stage: RunStage::Submitted,
            tx_hash: Some(tx_hash),
            message_ids: Vec::new(),
            updated_at: Utc::now(),
        })
    }

    pub fn mark_dispatched(
        &self,
        inbox: Address,
        tx_hash: B256,
        message_ids: Vec<B256>,
    ) -> Result<()> {
        self.save(&RunState {
            inbox,
            stage: RunStage::Dispatched,
            tx_hash: Some(tx_hash),
            message_ids,
            updated_at: Utc::now(),
        })
    }

    pub fn mark_completed(&self, inbox: Address) -> Result<()> {
        let mut state = self.load(inbox)?.unwrap_or(RunState {
            inbox,
            stage: RunStage::Completed,
            tx_hash: None,
            message_ids: Vec::new(),
            updated_at: Utc::now(),
        });
        state.stage = RunStage::Completed;
        state.updated_at = Utc::now();
        self.save(&state)
    }
}
