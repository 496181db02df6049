//! Deployment record: a flat, sorted key → address document
//!
//! Keys are dotted paths (`l1.router`, `l2.standardGateway`,
//! `l1.templates.router`). The map is a `BTreeMap` so the serialized JSON has
//! a stable key order and diffs cleanly between runs.

use alloy::primitives::Address;
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    #[serde(flatten)]
    entries: BTreeMap<String, String>,
}

impl DeploymentRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an address under `key`
    pub fn set_address(&mut self, key: impl Into<String>, address: Address) {
        self.entries.insert(key.into(), address.to_checksum(None));
    }

    /// Record a non-address value (chain ids, tx hashes)
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.entries.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Look up an address entry
    pub fn address(&self, key: &str) -> Option<Address> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy every entry of `other` into this record
    pub fn merge(&mut self, other: &DeploymentRecord) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    /// Where a failed run leaves what it deployed, next to the record at `path`
    ///
    /// `network.json` becomes `network.partial.json`.
    pub fn partial_path(path: &Path) -> PathBuf {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "network".to_string());
        path.with_file_name(format!("{stem}.partial.json"))
    }

    /// The record at `path` (empty if absent), with the partial record of a
    /// failed run laid over it when `resume` is set
    pub fn open(path: &Path, resume: bool) -> Result<Self> {
        let mut record = if path.exists() {
            Self::load(path)?
        } else {
            Self::new()
        };

        let partial_path = Self::partial_path(path);
        if partial_path.exists() {
            if resume {
                let partial = Self::load(&partial_path)?;
                info!(path = %partial_path.display(), entries = partial.len(), "Resuming from partial record");
                record.merge(&partial);
            } else {
                warn!(
                    path = %partial_path.display(),
                    "A previous run left a partial record; pass --resume to reuse it"
                );
            }
        }
        Ok(record)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read deployment record {}", path.display()))?;
        let record = serde_json::from_str(&content)
            .wrap_err_with(|| format!("Invalid deployment record {}", path.display()))?;
        Ok(record)
    }

    /// Write the record as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json + "\n")
            .wrap_err_with(|| format!("Failed to write deployment record {}", path.display()))?;
        info!(path = %path.display(), entries = self.len(), "Deployment record written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_serialize_sorted() {
        let mut record = DeploymentRecord::new();
        record.set_address("l2.router", Address::repeat_byte(2));
        record.set_address("l1.router", Address::repeat_byte(1));
        record.set("l1.chainId", 1);

        let json = serde_json::to_string(&record).unwrap();
        let l1_chain = json.find("l1.chainId").unwrap();
        let l1_router = json.find("l1.router").unwrap();
        let l2_router = json.find("l2.router").unwrap();
        assert!(l1_chain < l1_router && l1_router < l2_router);
    }

    #[test]
    fn test_address_lookup() {
        let mut record = DeploymentRecord::new();
        let addr = Address::repeat_byte(0xaa);
        record.set_address("l1.proxyAdmin", addr);

        assert_eq!(record.address("l1.proxyAdmin"), Some(addr));
        assert_eq!(record.address("missing"), None);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("network.json");

        let mut record = DeploymentRecord::new();
        record.set_address("l1.multicall", Address::repeat_byte(0x0c));
        record.save(&path).unwrap();

        let loaded = DeploymentRecord::load(&path).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_partial_path_sits_next_to_record() {
        assert_eq!(
            DeploymentRecord::partial_path(Path::new("deploy/network.json")),
            PathBuf::from("deploy/network.partial.json")
        );
        assert_eq!(
            DeploymentRecord::partial_path(Path::new("record")),
            PathBuf::from("record.partial.json")
        );
    }

    #[test]
    fn test_open_reuses_partial_only_on_resume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.json");
        assert!(DeploymentRecord::open(&path, true).unwrap().is_empty());

        let mut complete = DeploymentRecord::new();
        complete.set_address("l1.router", Address::repeat_byte(1));
        complete.save(&path).unwrap();

        let mut partial = DeploymentRecord::new();
        partial.set_address("l1.proxyAdmin", Address::repeat_byte(2));
        partial.save(&DeploymentRecord::partial_path(&path)).unwrap();

        let fresh = DeploymentRecord::open(&path, false).unwrap();
        assert_eq!(fresh, complete);

        let resumed = DeploymentRecord::open(&path, true).unwrap();
        assert_eq!(resumed.address("l1.router"), Some(Address::repeat_byte(1)));
        assert_eq!(resumed.address("l1.proxyAdmin"), Some(Address::repeat_byte(2)));
        // the complete record on disk is unchanged
        assert_eq!(DeploymentRecord::load(&path).unwrap(), complete);
    }

    #[test]
    fn test_merge_overwrites() {
        let mut a = DeploymentRecord::new();
        a.set("k", "old");
        let mut b = DeploymentRecord::new();
        b.set("k", "new");
        b.set("other", "x");

        a.merge(&b);
        assert_eq!(a.get("k"), Some("new"));
        assert_eq!(a.len(), 2);
    }
}
