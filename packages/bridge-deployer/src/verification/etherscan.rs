//! Etherscan-compatible verification backend
//!
//! Submits `verifysourcecode` requests with a solidity standard-JSON input.
//! The input is read once from a standard-JSON file or a compiler build-info
//! file (whose `input` field holds it).

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::{VerificationBackend, VerificationRequest};
use crate::redact::Redacted;

#[derive(Debug, Clone)]
pub struct EtherscanConfig {
    pub api_url: String,
    pub api_key: Option<Redacted<String>>,
    pub source_path: Option<PathBuf>,
    pub compiler_version: String,
    pub optimizer_runs: u32,
}

/// Explorer API envelope
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    message: String,
    result: serde_json::Value,
}

pub struct EtherscanVerifier {
    config: EtherscanConfig,
    client: Client,
    standard_json: Option<String>,
}

impl EtherscanVerifier {
    pub fn new(config: EtherscanConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let standard_json = match &config.source_path {
            Some(path) => Some(load_standard_json(path)?),
            None => None,
        };

        Ok(Self {
            config,
            client,
            standard_json,
        })
    }

    /// Form fields of a `verifysourcecode` request
    fn form(&self, request: &VerificationRequest, source: &str) -> Vec<(&'static str, String)> {
        let contract_name = request
            .source_identifier
            .clone()
            .unwrap_or_else(|| request.contract_name.clone());

        vec![
            ("module", "contract".to_string()),
            ("action", "verifysourcecode".to_string()),
            ("contractaddress", request.address.to_checksum(None)),
            ("sourceCode", source.to_string()),
            ("codeformat", "solidity-standard-json-input".to_string()),
            ("contractname", contract_name),
            ("compilerversion", self.config.compiler_version.clone()),
            ("optimizationUsed", "1".to_string()),
            ("runs", self.config.optimizer_runs.to_string()),
            // sic: the explorer API spells it this way
            ("constructorArguements", hex::encode(&request.constructor_args)),
        ]
    }
}

/// Read a standard-JSON input, unwrapping a build-info file if given one
pub fn load_standard_json(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read verification source {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .wrap_err_with(|| format!("Invalid JSON in {}", path.display()))?;

    match value.get("input") {
        Some(input) => Ok(input.to_string()),
        None if value.get("sources").is_some() => Ok(content),
        None => Err(eyre!(
            "{} is neither a standard-JSON input nor a build-info file",
            path.display()
        )),
    }
}

#[async_trait]
impl VerificationBackend for EtherscanVerifier {
    fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn submit(&self, request: &VerificationRequest) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| eyre!("No explorer API key"))?;
        let source = self
            .standard_json
            .as_deref()
            .ok_or_else(|| eyre!("No standard-JSON input configured"))?;

        debug!(
            contract = %request.contract_name,
            address = %request.address,
            chain_id = request.chain_id,
            "Submitting verification"
        );

        let response = self
            .client
            .post(&self.config.api_url)
            .query(&[
                ("chainid", request.chain_id.to_string()),
                ("apikey", api_key.expose().clone()),
            ])
            .form(&self.form(request, source))
            .send()
            .await?
            .json::<ApiResponse>()
            .await?;

        interpret_response(response)
    }
}

fn interpret_response(response: ApiResponse) -> Result<String> {
    let result = match &response.result {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    if response.status == "1" {
        return Ok(result);
    }
    if result.to_lowercase().contains("already verified") {
        return Ok(result);
    }
    Err(eyre!("{}: {}", response.message, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Bytes};

    fn config() -> EtherscanConfig {
        EtherscanConfig {
            api_url: "https://api.etherscan.io/v2/api".to_string(),
            api_key: Some(Redacted("key".to_string())),
            source_path: None,
            compiler_version: "v0.8.16+commit.07a7930e".to_string(),
            optimizer_runs: 100,
        }
    }

    #[test]
    fn test_form_fields() {
        let verifier = EtherscanVerifier::new(config()).unwrap();
        let request = VerificationRequest {
            chain_id: 1,
            contract_name: "L1GatewayRouter".to_string(),
            source_identifier: Some(
                "contracts/tokenbridge/ethereum/gateway/L1GatewayRouter.sol:L1GatewayRouter"
                    .to_string(),
            ),
            address: Address::repeat_byte(0xab),
            constructor_args: Bytes::from(vec![0x01, 0x02]),
        };

        let form = verifier.form(&request, "{}");
        let get = |k: &str| form.iter().find(|(key, _)| *key == k).map(|(_, v)| v.clone());

        assert_eq!(get("codeformat").unwrap(), "solidity-standard-json-input");
        assert_eq!(get("constructorArguements").unwrap(), "0102");
        assert!(get("contractname").unwrap().ends_with(".sol:L1GatewayRouter"));
        assert_eq!(get("runs").unwrap(), "100");
    }

    #[test]
    fn test_unconfigured_without_key() {
        let mut cfg = config();
        cfg.api_key = None;
        assert!(!EtherscanVerifier::new(cfg).unwrap().is_configured());
    }

    #[test]
    fn test_load_build_info_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build-info.json");
        std::fs::write(&path, r#"{"id":"x","input":{"language":"Solidity","sources":{}}}"#).unwrap();

        let json = load_standard_json(&path).unwrap();
        assert!(json.contains("\"language\":\"Solidity\""));
    }

    #[test]
    fn test_load_rejects_unrelated_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.json");
        std::fs::write(&path, r#"{"abi":[]}"#).unwrap();
        assert!(load_standard_json(&path).is_err());
    }

    #[test]
    fn test_interpret_response() {
        let ok = ApiResponse {
            status: "1".to_string(),
            message: "OK".to_string(),
            result: serde_json::json!("guid-123"),
        };
        assert_eq!(interpret_response(ok).unwrap(), "guid-123");

        let already = ApiResponse {
            status: "0".to_string(),
            message: "NOTOK".to_string(),
            result: serde_json::json!("Contract source code already verified"),
        };
        assert!(interpret_response(already).is_ok());

        let rejected = ApiResponse {
            status: "0".to_string(),
            message: "NOTOK".to_string(),
            result: serde_json::json!("Invalid API Key"),
        };
        assert!(interpret_response(rejected)
            .unwrap_err()
            .to_string()
            .contains("Invalid API Key"));
    }
}
