//! Deployer configuration
//!
//! Read from `.env` (if present) and the process environment. Required values
//! are checked here, before any RPC is contacted.

use alloy::primitives::{Address, Bytes};
use eyre::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::coordinator::CoordinatorSettings;
use crate::create2::{parse_salt, DEFAULT_CREATE2_FACTORY};
use crate::error::DeployerError;
use crate::fees::FeeConfig;
use crate::redact::Redacted;
use crate::verification::EtherscanConfig;

const DEFAULT_EXPLORER_API_URL: &str = "https://api.etherscan.io/v2/api";
const DEFAULT_COMPILER_VERSION: &str = "v0.8.16+commit.07a7930e";

#[derive(Debug, Clone)]
pub struct Config {
    pub parent_rpc_url: String,
    pub child_rpc_url: String,
    pub deployer_key: Redacted<String>,

    /// Rollup inbox; required by `create-bridge` and `full`
    pub inbox: Option<Address>,
    /// Defaults to the deployer address
    pub rollup_owner: Option<Address>,
    /// Existing creator; required by `create-bridge`
    pub token_bridge_creator: Option<Address>,
    pub l1_weth: Address,
    /// Skips fee-token detection through the inbox when set
    pub fee_token: Option<Address>,

    pub artifacts_dir: PathBuf,
    pub record_path: PathBuf,
    pub run_state_dir: PathBuf,

    pub create2_salt: Option<Bytes>,
    pub create2_factory: Address,

    pub gas_limit_safety_factor: u64,
    pub submission_fee_percent_increase: u64,
    pub gas_price_percent_increase: u64,

    pub message_timeout: Duration,
    pub message_poll_interval: Duration,
    pub tx_timeout: Duration,

    pub explorer_api_url: String,
    pub explorer_api_key: Option<Redacted<String>>,
    pub verify_source_path: Option<PathBuf>,
    pub verify_compiler_version: String,
    pub verify_optimizer_runs: u32,
    pub verify_delay: Duration,
    pub verify_grace: Duration,
}

fn precondition(message: String) -> eyre::Report {
    eyre::Report::new(DeployerError::Precondition(message))
}

fn missing(name: &str) -> eyre::Report {
    precondition(format!("{name} required"))
}

fn required(name: &str) -> Result<String> {
    optional(name).ok_or_else(|| missing(name))
}

/// Unset and empty are treated alike
fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T: FromStr>(name: &str, default: T) -> Result<T> {
    match optional(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| precondition(format!("Invalid {name}: {raw}"))),
        None => Ok(default),
    }
}

fn address(name: &str) -> Result<Option<Address>> {
    optional(name)
        .map(|raw| {
            raw.parse::<Address>()
                .map_err(|_| precondition(format!("Invalid {name}: {raw} is not an address")))
        })
        .transpose()
}

impl Config {
    /// Load `.env`, then read the environment
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded .env from {:?}", path);
        }
        Self::from_env()
    }

    pub fn from_env() -> Result<Self> {
        let create2_salt = match optional("CREATE2_SALT") {
            Some(raw) => {
                let salt = parse_salt(&raw).ok_or_else(|| {
                    DeployerError::Precondition(format!(
                        "Invalid CREATE2_SALT: expected 0x followed by 64 hex characters, got {raw}"
                    ))
                })?;
                Some(Bytes::copy_from_slice(salt.as_slice()))
            }
            None => None,
        };

        Ok(Self {
            parent_rpc_url: required("PARENT_RPC_URL")?,
            child_rpc_url: required("CHILD_RPC_URL")?,
            deployer_key: Redacted(required("DEPLOYER_KEY")?),

            inbox: address("INBOX_ADDRESS")?,
            rollup_owner: address("ROLLUP_OWNER")?,
            token_bridge_creator: address("TOKEN_BRIDGE_CREATOR")?,
            l1_weth: address("L1_WETH")?.unwrap_or(Address::ZERO),
            fee_token: address("FEE_TOKEN")?,

            artifacts_dir: parsed("ARTIFACTS_DIR", PathBuf::from("out"))?,
            record_path: parsed("DEPLOYMENT_RECORD_PATH", PathBuf::from("network.json"))?,
            run_state_dir: parsed("RUN_STATE_DIR", PathBuf::from(".deployer-state"))?,

            create2_salt,
            create2_factory: address("CREATE2_FACTORY")?.unwrap_or(DEFAULT_CREATE2_FACTORY),

            gas_limit_safety_factor: parsed("GAS_LIMIT_SAFETY_FACTOR", 2)?,
            submission_fee_percent_increase: parsed("SUBMISSION_FEE_PERCENT_INCREASE", 300)?,
            gas_price_percent_increase: parsed("GAS_PRICE_PERCENT_INCREASE", 0)?,

            message_timeout: Duration::from_secs(parsed("MESSAGE_TIMEOUT_SECS", 1800)?),
            message_poll_interval: Duration::from_millis(parsed("MESSAGE_POLL_INTERVAL_MS", 5000)?),
            tx_timeout: Duration::from_secs(parsed("TX_TIMEOUT_SECS", 300)?),

            explorer_api_url: optional("EXPLORER_API_URL")
                .unwrap_or_else(|| DEFAULT_EXPLORER_API_URL.to_string()),
            explorer_api_key: optional("EXPLORER_API_KEY").map(Redacted),
            verify_source_path: optional("VERIFY_SOURCE_PATH").map(PathBuf::from),
            verify_compiler_version: optional("VERIFY_COMPILER_VERSION")
                .unwrap_or_else(|| DEFAULT_COMPILER_VERSION.to_string()),
            verify_optimizer_runs: parsed("VERIFY_OPTIMIZER_RUNS", 100)?,
            verify_delay: Duration::from_millis(parsed("VERIFY_DELAY_MS", 5000)?),
            verify_grace: Duration::from_millis(parsed("VERIFY_GRACE_MS", 30000)?),
        })
    }

    pub fn require_inbox(&self) -> Result<Address> {
        self.inbox.ok_or_else(|| missing("INBOX_ADDRESS"))
    }

    pub fn require_creator(&self) -> Result<Address> {
        self.token_bridge_creator
            .ok_or_else(|| missing("TOKEN_BRIDGE_CREATOR"))
    }

    /// Whether deployments should be queued for verification
    pub fn verification_enabled(&self) -> bool {
        self.explorer_api_key.is_some()
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            fees: FeeConfig {
                gas_limit_safety_factor: self.gas_limit_safety_factor,
                submission_fee_percent_increase: self.submission_fee_percent_increase,
                gas_price_percent_increase: self.gas_price_percent_increase,
            },
            create2_salt: self.create2_salt.clone(),
            create2_factory: self.create2_factory,
            verify: self.verification_enabled(),
            verify_delay: self.verify_delay,
            verify_grace: self.verify_grace,
            message_timeout: self.message_timeout,
            poll_interval: self.message_poll_interval,
            l1_weth: self.l1_weth,
            fee_token_override: self.fee_token,
        }
    }

    pub fn etherscan(&self) -> EtherscanConfig {
        EtherscanConfig {
            api_url: self.explorer_api_url.clone(),
            api_key: self.explorer_api_key.clone(),
            source_path: self.verify_source_path.clone(),
            compiler_version: self.verify_compiler_version.clone(),
            optimizer_runs: self.verify_optimizer_runs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "PARENT_RPC_URL",
        "CHILD_RPC_URL",
        "DEPLOYER_KEY",
        "INBOX_ADDRESS",
        "ROLLUP_OWNER",
        "TOKEN_BRIDGE_CREATOR",
        "L1_WETH",
        "FEE_TOKEN",
        "CREATE2_SALT",
        "GAS_LIMIT_SAFETY_FACTOR",
        "MESSAGE_TIMEOUT_SECS",
        "EXPLORER_API_KEY",
    ];

    fn clear() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    fn set_required() {
        env::set_var("PARENT_RPC_URL", "http://localhost:8545");
        env::set_var("CHILD_RPC_URL", "http://localhost:8547");
        env::set_var(
            "DEPLOYER_KEY",
            "0xb6b15c8cb491557369f3c7d2c287b053eb229daa9c22138887752191c9520659",
        );
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear();
        set_required();

        let config = Config::from_env().unwrap();
        assert_eq!(config.gas_limit_safety_factor, 2);
        assert_eq!(config.submission_fee_percent_increase, 300);
        assert_eq!(config.message_timeout, Duration::from_secs(1800));
        assert_eq!(config.record_path, PathBuf::from("network.json"));
        assert_eq!(config.create2_factory, DEFAULT_CREATE2_FACTORY);
        assert!(config.create2_salt.is_none());
        assert!(!config.verification_enabled());
        clear();
    }

    #[test]
    #[serial]
    fn test_missing_required_is_precondition() {
        clear();
        env::set_var("PARENT_RPC_URL", "http://localhost:8545");

        let err = Config::from_env().unwrap_err();
        match err.downcast_ref::<DeployerError>() {
            Some(DeployerError::Precondition(msg)) => assert!(msg.contains("CHILD_RPC_URL")),
            other => panic!("unexpected error: {other:?}"),
        }
        clear();
    }

    #[test]
    #[serial]
    fn test_key_is_redacted_in_debug() {
        clear();
        set_required();

        let config = Config::from_env().unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("b6b15c8cb491557369f3c7d2c287b053"));
        assert!(debug.contains("<redacted>"));
        clear();
    }

    #[test]
    #[serial]
    fn test_salt_must_be_one_word() {
        clear();
        set_required();
        env::set_var("CREATE2_SALT", "0x1234");
        assert!(Config::from_env().is_err());

        env::set_var("CREATE2_SALT", format!("0x{}", "ab".repeat(32)));
        let config = Config::from_env().unwrap();
        assert_eq!(config.create2_salt.unwrap().len(), 32);
        clear();
    }

    #[test]
    #[serial]
    fn test_command_specific_values() {
        clear();
        set_required();
        let config = Config::from_env().unwrap();
        assert!(config.require_inbox().is_err());
        assert!(config.require_creator().is_err());

        env::set_var("INBOX_ADDRESS", "0x00000000000000000000000000000000000000aa");
        env::set_var("GAS_LIMIT_SAFETY_FACTOR", "3");
        let config = Config::from_env().unwrap();
        assert_eq!(
            config.require_inbox().unwrap(),
            Address::with_last_byte(0xaa)
        );
        assert_eq!(config.coordinator_settings().fees.gas_limit_safety_factor, 3);
        clear();
    }

    #[test]
    #[serial]
    fn test_invalid_address_rejected() {
        clear();
        set_required();
        env::set_var("ROLLUP_OWNER", "not-an-address");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("ROLLUP_OWNER"));
        clear();
    }
}
