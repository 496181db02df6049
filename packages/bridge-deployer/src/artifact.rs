//! Compiled artifacts and their deployment
//!
//! [`ArtifactStore`] reads compiler output (forge `out/<File>.sol/<Name>.json`
//! or hardhat `artifacts/**/<Name>.json`). [`ArtifactDeployer`] places a
//! contract on chain, either with a plain CREATE or deterministically through
//! the CREATE2 proxy, and runs its initializer at most once.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256};
use alloy::rpc::types::TransactionRequest;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::create2::DeterministicPlacement;
use crate::error::DeployerError;
use crate::evm::client::{has_code, ChainClient};
use crate::verification::{VerificationQueue, VerificationRequest};

/// Revert fragments meaning "initializer already ran"
const ALREADY_INITIALIZED_MARKERS: &[&str] = &[
    "initializable: contract is already initialized",
    "already_init",
    // InvalidInitialization()
    "0xf92ee8a9",
];

/// Whether an error message from a simulated initializer call means the
/// contract is already initialized
pub fn is_already_initialized(message: &str) -> bool {
    let lower = message.to_lowercase();
    ALREADY_INITIALIZED_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

// ============================================================================
// Compiler output
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BytecodeField {
    Forge { object: String },
    Hardhat(String),
}

impl BytecodeField {
    fn hex(&self) -> &str {
        match self {
            BytecodeField::Forge { object } => object,
            BytecodeField::Hardhat(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactJson {
    bytecode: BytecodeField,
    deployed_bytecode: Option<BytecodeField>,
    source_name: Option<String>,
    contract_name: Option<String>,
    metadata: Option<serde_json::Value>,
}

/// A compiled contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractArtifact {
    pub name: String,
    /// Creation bytecode
    pub bytecode: Bytes,
    pub deployed_bytecode: Bytes,
    /// `path/To/File.sol:Name`
    pub source_identifier: Option<String>,
}

fn decode_hex_field(field: &str, name: &str) -> Result<Bytes> {
    let stripped = field.trim_start_matches("0x");
    if stripped.contains("__") {
        return Err(eyre!("{} has unlinked library references", name));
    }
    let bytes = hex::decode(stripped).wrap_err_with(|| format!("Invalid bytecode in {}", name))?;
    Ok(Bytes::from(bytes))
}

impl ContractArtifact {
    /// Parse an artifact JSON document
    pub fn from_json(name: &str, content: &str) -> Result<Self> {
        let raw: ArtifactJson = serde_json::from_str(content)
            .wrap_err_with(|| format!("Invalid artifact for {}", name))?;

        let bytecode = decode_hex_field(raw.bytecode.hex(), name)?;
        let deployed_bytecode = match &raw.deployed_bytecode {
            Some(field) => decode_hex_field(field.hex(), name)?,
            None => Bytes::new(),
        };

        let source_identifier = match (&raw.source_name, &raw.contract_name) {
            (Some(source), Some(contract)) => Some(format!("{source}:{contract}")),
            _ => raw
                .metadata
                .as_ref()
                .and_then(|m| m.pointer("/settings/compilationTarget"))
                .and_then(|t| t.as_object())
                .and_then(|t| t.iter().next())
                .and_then(|(path, contract)| {
                    contract.as_str().map(|c| format!("{path}:{c}"))
                }),
        };

        Ok(Self {
            name: name.to_string(),
            bytecode,
            deployed_bytecode,
            source_identifier,
        })
    }

    /// Creation bytecode followed by ABI-encoded constructor arguments
    pub fn init_code(&self, constructor_args: &[u8]) -> Bytes {
        let mut code = self.bytecode.to_vec();
        code.extend_from_slice(constructor_args);
        Bytes::from(code)
    }
}

/// Directory of compiler output
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the artifact for contract `name`
    pub fn load(&self, name: &str) -> Result<ContractArtifact> {
        let path = self.locate(name)?;
        let content = std::fs::read_to_string(&path)
            .wrap_err_with(|| format!("Failed to read artifact {}", path.display()))?;
        debug!(contract = %name, path = %path.display(), "Loaded artifact");
        ContractArtifact::from_json(name, &content)
    }

    fn locate(&self, name: &str) -> Result<PathBuf> {
        let forge = self.root.join(format!("{name}.sol")).join(format!("{name}.json"));
        if forge.is_file() {
            return Ok(forge);
        }
        find_file(&self.root, &format!("{name}.json"))?.ok_or_else(|| {
            eyre!(
                "No artifact for {} under {}",
                name,
                self.root.display()
            )
        })
    }
}

fn find_file(dir: &Path, file_name: &str) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == "build-info") {
                continue;
            }
            if let Some(found) = find_file(&path, file_name)? {
                return Ok(Some(found));
            }
        } else if path.file_name().is_some_and(|n| n == file_name) {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

// ============================================================================
// Deployment
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Deploy through the CREATE2 proxy with this salt (must be 32 bytes)
    pub salt: Option<Bytes>,
    pub verify: bool,
}

impl DeployOptions {
    pub fn with_salt(mut self, salt: Option<Bytes>) -> Self {
        self.salt = salt;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }
}

/// A contract living on chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub address: Address,
    pub constructor_args: Bytes,
    /// Creation transaction, `None` when an existing deployment was reused
    pub deploy_tx: Option<B256>,
}

impl Artifact {
    pub fn reused(&self) -> bool {
        self.deploy_tx.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Initialized(B256),
    AlreadyInitialized,
}

pub struct ArtifactDeployer {
    client: Arc<dyn ChainClient>,
    create2_factory: Address,
    verification: Option<VerificationQueue>,
}

impl ArtifactDeployer {
    pub fn new(client: Arc<dyn ChainClient>, create2_factory: Address) -> Self {
        Self {
            client,
            create2_factory,
            verification: None,
        }
    }

    /// Queue verified deployments on `queue`
    pub fn with_verification(mut self, queue: VerificationQueue) -> Self {
        self.verification = Some(queue);
        self
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    /// Deploy `contract` with ABI-encoded `constructor_args`
    ///
    /// With a salt the address is derived first and an existing deployment
    /// there is reused without sending a transaction.
    pub async fn deploy(
        &self,
        contract: &ContractArtifact,
        constructor_args: Bytes,
        options: &DeployOptions,
    ) -> Result<Artifact> {
        if contract.bytecode.is_empty() {
            return Err(DeployerError::Deploy {
                contract: contract.name.clone(),
                reason: "artifact has no creation bytecode".to_string(),
            }
            .into());
        }
        let init_code = contract.init_code(&constructor_args);

        let (address, deploy_tx) = match &options.salt {
            Some(salt) => self.deploy_deterministic(contract, salt, init_code).await?,
            None => self.deploy_create(contract, init_code).await?,
        };

        let artifact = Artifact {
            name: contract.name.clone(),
            address,
            constructor_args,
            deploy_tx,
        };

        if options.verify {
            if let Some(queue) = &self.verification {
                queue.enqueue(VerificationRequest {
                    chain_id: self.client.chain_id(),
                    contract_name: contract.name.clone(),
                    source_identifier: contract.source_identifier.clone(),
                    address,
                    constructor_args: artifact.constructor_args.clone(),
                });
            }
        }

        Ok(artifact)
    }

    async fn deploy_create(
        &self,
        contract: &ContractArtifact,
        init_code: Bytes,
    ) -> Result<(Address, Option<B256>)> {
        let deploy_err = |reason: String| DeployerError::Deploy {
            contract: contract.name.clone(),
            reason,
        };

        let tx = TransactionRequest::default().with_deploy_code(init_code);
        let receipt = self
            .client
            .send_transaction(tx)
            .await
            .map_err(|e| deploy_err(format!("{e:#}")))?;

        if !receipt.status {
            return Err(deploy_err(format!("creation tx {} reverted", receipt.tx_hash)).into());
        }
        let address = receipt
            .contract_address
            .ok_or_else(|| deploy_err(format!("no contract address in {}", receipt.tx_hash)))?;

        info!(
            contract = %contract.name,
            address = %address,
            tx_hash = %receipt.tx_hash,
            "Contract deployed"
        );
        Ok((address, Some(receipt.tx_hash)))
    }

    async fn deploy_deterministic(
        &self,
        contract: &ContractArtifact,
        salt: &Bytes,
        init_code: Bytes,
    ) -> Result<(Address, Option<B256>)> {
        if salt.len() != 32 {
            return Err(DeployerError::InvalidSalt { len: salt.len() }.into());
        }
        let salt = B256::from_slice(salt);

        if !has_code(self.client.as_ref(), self.create2_factory).await? {
            return Err(DeployerError::FactoryNotFound {
                factory: self.create2_factory,
            }
            .into());
        }

        let placement = DeterministicPlacement::new(self.create2_factory, salt, &init_code);
        let address = placement.address();

        if has_code(self.client.as_ref(), address).await? {
            info!(
                contract = %contract.name,
                address = %address,
                "Already deployed at deterministic address, reusing"
            );
            return Ok((address, None));
        }

        let deploy_err = |reason: String| DeployerError::Deploy {
            contract: contract.name.clone(),
            reason,
        };

        let mut input = salt.to_vec();
        input.extend_from_slice(&init_code);
        let tx = TransactionRequest::default()
            .with_to(self.create2_factory)
            .with_input(Bytes::from(input));

        let receipt = self
            .client
            .send_transaction(tx)
            .await
            .map_err(|e| deploy_err(format!("{e:#}")))?;
        if !receipt.status {
            return Err(deploy_err(format!("CREATE2 tx {} reverted", receipt.tx_hash)).into());
        }
        if !has_code(self.client.as_ref(), address).await? {
            return Err(deploy_err(format!("no code at derived address {}", address)).into());
        }

        info!(
            contract = %contract.name,
            address = %address,
            salt = %salt,
            tx_hash = %receipt.tx_hash,
            "Contract deployed via CREATE2"
        );
        Ok((address, Some(receipt.tx_hash)))
    }

    /// Run `calldata` against a deployed contract's initializer
    ///
    /// The call is simulated first; an "already initialized" revert counts
    /// as success and sends nothing.
    pub async fn initialize(&self, artifact: &Artifact, calldata: Bytes) -> Result<InitOutcome> {
        let init_err = |reason: String| DeployerError::Initialization {
            contract: artifact.name.clone(),
            address: artifact.address,
            reason,
        };

        let tx = TransactionRequest::default()
            .with_to(artifact.address)
            .with_input(calldata);

        if let Err(e) = self.client.call(&tx).await {
            let reason = format!("{e:#}");
            if is_already_initialized(&reason) {
                info!(
                    contract = %artifact.name,
                    address = %artifact.address,
                    "Already initialized"
                );
                return Ok(InitOutcome::AlreadyInitialized);
            }
            return Err(init_err(reason).into());
        }

        let receipt = self
            .client
            .send_transaction(tx)
            .await
            .map_err(|e| init_err(format!("{e:#}")))?;
        if !receipt.status {
            return Err(init_err(format!("tx {} reverted", receipt.tx_hash)).into());
        }

        info!(
            contract = %artifact.name,
            address = %artifact.address,
            tx_hash = %receipt.tx_hash,
            "Initialized"
        );
        Ok(InitOutcome::Initialized(receipt.tx_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create2::DEFAULT_CREATE2_FACTORY;
    use crate::evm::contracts::L1TokenBridgeRetryableSender;
    use crate::testing::MockChainClient;
    use alloy::sol_types::SolCall;
    use std::time::Duration;

    fn contract(name: &str) -> ContractArtifact {
        ContractArtifact {
            name: name.to_string(),
            bytecode: Bytes::from(vec![0x60, 0x80, 0x60, 0x40, 0x52]),
            deployed_bytecode: Bytes::from(vec![0x60, 0x80]),
            source_identifier: Some(format!("src/{name}.sol:{name}")),
        }
    }

    fn salt() -> Option<Bytes> {
        Some(Bytes::from(vec![0u8; 32]))
    }

    #[test]
    fn test_already_initialized_markers() {
        assert!(is_already_initialized(
            "execution reverted: Initializable: contract is already initialized"
        ));
        assert!(is_already_initialized("execution reverted: ALREADY_INIT"));
        assert!(is_already_initialized(
            "server returned an error (data: 0xf92ee8a9)"
        ));
        assert!(!is_already_initialized("execution reverted: NOT_OWNER"));
    }

    #[test]
    fn test_parse_forge_artifact() {
        let json = r#"{
            "abi": [],
            "bytecode": {"object": "0x6080", "linkReferences": {}},
            "deployedBytecode": {"object": "0x60"},
            "metadata": {"settings": {"compilationTarget": {"contracts/Router.sol": "Router"}}}
        }"#;
        let artifact = ContractArtifact::from_json("Router", json).unwrap();
        assert_eq!(artifact.bytecode, Bytes::from(vec![0x60, 0x80]));
        assert_eq!(artifact.deployed_bytecode, Bytes::from(vec![0x60]));
        assert_eq!(
            artifact.source_identifier.as_deref(),
            Some("contracts/Router.sol:Router")
        );
    }

    #[test]
    fn test_parse_hardhat_artifact() {
        let json = r#"{
            "contractName": "Router",
            "sourceName": "contracts/Router.sol",
            "bytecode": "0x6080",
            "deployedBytecode": "0x60"
        }"#;
        let artifact = ContractArtifact::from_json("Router", json).unwrap();
        assert_eq!(artifact.bytecode.len(), 2);
        assert_eq!(
            artifact.source_identifier.as_deref(),
            Some("contracts/Router.sol:Router")
        );
    }

    #[test]
    fn test_unlinked_bytecode_rejected() {
        let json = r#"{"bytecode": "0x6080__$abc$__"}"#;
        let err = ContractArtifact::from_json("Linked", json).unwrap_err();
        assert!(err.to_string().contains("unlinked"));
    }

    #[test]
    fn test_store_finds_forge_and_nested_layouts() {
        let dir = tempfile::tempdir().unwrap();
        let forge_dir = dir.path().join("Router.sol");
        std::fs::create_dir_all(&forge_dir).unwrap();
        std::fs::write(forge_dir.join("Router.json"), r#"{"bytecode":{"object":"0x01"}}"#).unwrap();

        let nested = dir.path().join("contracts").join("Gateway.sol");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("Gateway.json"), r#"{"bytecode":"0x02"}"#).unwrap();

        let store = ArtifactStore::new(dir.path());
        assert_eq!(store.load("Router").unwrap().bytecode, Bytes::from(vec![0x01]));
        assert_eq!(store.load("Gateway").unwrap().bytecode, Bytes::from(vec![0x02]));
        assert!(store.load("Missing").is_err());
    }

    #[tokio::test]
    async fn test_plain_create() {
        let client = Arc::new(MockChainClient::new(1));
        let deployer = ArtifactDeployer::new(client.clone(), DEFAULT_CREATE2_FACTORY);

        let deployed = deployer
            .deploy(&contract("Router"), Bytes::new(), &DeployOptions::default())
            .await
            .unwrap();

        assert_eq!(deployed.address, client.sender().create(0));
        assert!(!deployed.reused());
        assert!(has_code(client.as_ref(), deployed.address).await.unwrap());
    }

    #[tokio::test]
    async fn test_deterministic_redeploy_sends_nothing() {
        let client = Arc::new(MockChainClient::new(1));
        client.install_create2_factory(DEFAULT_CREATE2_FACTORY);
        let deployer = ArtifactDeployer::new(client.clone(), DEFAULT_CREATE2_FACTORY);
        let options = DeployOptions::default().with_salt(salt());

        let first = deployer
            .deploy(&contract("Router"), Bytes::new(), &options)
            .await
            .unwrap();
        let sent_after_first = client.sent().len();
        let second = deployer
            .deploy(&contract("Router"), Bytes::new(), &options)
            .await
            .unwrap();

        assert_eq!(first.address, second.address);
        assert!(second.reused());
        assert_eq!(client.sent().len(), sent_after_first);
    }

    #[tokio::test]
    async fn test_deterministic_address_matches_derivation() {
        let client = Arc::new(MockChainClient::new(1));
        client.install_create2_factory(DEFAULT_CREATE2_FACTORY);
        let deployer = ArtifactDeployer::new(client.clone(), DEFAULT_CREATE2_FACTORY);
        let router = contract("Router");
        let args = Bytes::from(vec![0u8; 32]);

        let deployed = deployer
            .deploy(&router, args.clone(), &DeployOptions::default().with_salt(salt()))
            .await
            .unwrap();

        let expected =
            DeterministicPlacement::new(DEFAULT_CREATE2_FACTORY, B256::ZERO, &router.init_code(&args))
                .address();
        assert_eq!(deployed.address, expected);
    }

    #[tokio::test]
    async fn test_invalid_salt_sends_nothing() {
        let client = Arc::new(MockChainClient::new(1));
        client.install_create2_factory(DEFAULT_CREATE2_FACTORY);
        let deployer = ArtifactDeployer::new(client.clone(), DEFAULT_CREATE2_FACTORY);
        let options = DeployOptions::default().with_salt(Some(Bytes::from(vec![1u8; 20])));

        let err = deployer
            .deploy(&contract("Router"), Bytes::new(), &options)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DeployerError>(),
            Some(DeployerError::InvalidSalt { len: 20 })
        ));
        assert!(client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_factory() {
        let client = Arc::new(MockChainClient::new(1));
        let deployer = ArtifactDeployer::new(client.clone(), DEFAULT_CREATE2_FACTORY);

        let err = deployer
            .deploy(
                &contract("Router"),
                Bytes::new(),
                &DeployOptions::default().with_salt(salt()),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DeployerError>(),
            Some(DeployerError::FactoryNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_existing_code_at_target_is_reused() {
        let client = Arc::new(MockChainClient::new(1));
        client.install_create2_factory(DEFAULT_CREATE2_FACTORY);
        let deployer = ArtifactDeployer::new(client.clone(), DEFAULT_CREATE2_FACTORY);
        let router = contract("Router");
        let target =
            DeterministicPlacement::new(DEFAULT_CREATE2_FACTORY, B256::ZERO, &router.init_code(&[]))
                .address();
        client.set_code(target, vec![0x01]);

        let deployed = deployer
            .deploy(&router, Bytes::new(), &DeployOptions::default().with_salt(salt()))
            .await
            .unwrap();
        assert_eq!(deployed.address, target);
        assert!(deployed.reused());
        assert!(client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let client = Arc::new(MockChainClient::new(1));
        client.track_initializer(L1TokenBridgeRetryableSender::initializeCall::SELECTOR);
        let deployer = ArtifactDeployer::new(client.clone(), DEFAULT_CREATE2_FACTORY);

        let deployed = deployer
            .deploy(&contract("Sender"), Bytes::new(), &DeployOptions::default())
            .await
            .unwrap();
        let calldata = Bytes::from(L1TokenBridgeRetryableSender::initializeCall {}.abi_encode());

        let first = deployer.initialize(&deployed, calldata.clone()).await.unwrap();
        assert!(matches!(first, InitOutcome::Initialized(_)));
        let sent = client.sent().len();

        let second = deployer.initialize(&deployed, calldata).await.unwrap();
        assert_eq!(second, InitOutcome::AlreadyInitialized);
        assert_eq!(client.sent().len(), sent);
    }

    #[tokio::test]
    async fn test_initialize_other_revert_fails() {
        let client = Arc::new(MockChainClient::new(1));
        let deployer = ArtifactDeployer::new(client.clone(), DEFAULT_CREATE2_FACTORY);
        let target = Artifact {
            name: "Router".to_string(),
            address: Address::repeat_byte(0x12),
            constructor_args: Bytes::new(),
            deploy_tx: None,
        };
        client.revert_call(target.address, [0xaa, 0xbb, 0xcc, 0xdd]);

        let err = deployer
            .initialize(&target, Bytes::from(vec![0xaa, 0xbb, 0xcc, 0xdd]))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployerError>(),
            Some(DeployerError::Initialization { .. })
        ));
    }

    #[tokio::test]
    async fn test_verification_enqueued() {
        let client = Arc::new(MockChainClient::new(5));
        let queue = VerificationQueue::new(Duration::ZERO, Duration::ZERO);
        let deployer =
            ArtifactDeployer::new(client.clone(), DEFAULT_CREATE2_FACTORY).with_verification(queue.clone());

        let args = Bytes::from(vec![0x11; 32]);
        deployer
            .deploy(&contract("Router"), args.clone(), &DeployOptions::default().with_verify(true))
            .await
            .unwrap();
        deployer
            .deploy(&contract("Skipped"), Bytes::new(), &DeployOptions::default())
            .await
            .unwrap();

        let pending = queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].chain_id, 5);
        assert_eq!(pending[0].constructor_args, args);
        assert_eq!(
            pending[0].source_identifier.as_deref(),
            Some("src/Router.sol:Router")
        );
    }
}
