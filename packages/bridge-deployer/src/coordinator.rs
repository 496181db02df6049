//! Deployment coordinator
//!
//! Runs the token bridge deployment end to end:
//!
//! 1. templates: every logic contract the creator clones, plus the creator
//!    and its retryable sender behind transparent proxies
//! 2. fee token: ETH-based or ERC20-based rollup
//! 3. estimate: gas and submission cost of both retryable tickets
//! 4. funding: attach ETH or approve the fee token
//! 5. dispatch: `createTokenBridge`, then await both tickets on the child chain
//! 6. reconcile: read the deployed addresses back from the creator
//!
//! Every failure is reported as a [`RunFailure`] carrying the step and the
//! record assembled so far.

use alloy::primitives::{b256, Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::network::TransactionBuilder;
use alloy::sol_types::{SolCall, SolConstructor};
use eyre::{eyre, Result, WrapErr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::artifact::{Artifact, ArtifactDeployer, ArtifactStore, DeployOptions};
use crate::create2::DEFAULT_CREATE2_FACTORY;
use crate::error::{DeployerError, RunFailure, Step};
use crate::evm::client::{call_contract, has_code, send_call, ChainClient};
use crate::evm::contracts::*;
use crate::evm::tokens::{ensure_allowance, fee_token_of_inbox, get_token_balance};
use crate::fees::{
    apply_safety_factor, scale_fee_amount, FeeConfig, FeeEstimator, RetryableRequest,
};
use crate::record::DeploymentRecord;
use crate::retryable::{ensure_all_redeemed, CrossChainDispatcher};
use crate::run_state::RunStateStore;
use crate::verification::VerificationQueue;

/// EIP-1967 admin slot of a transparent proxy
pub const EIP1967_ADMIN_SLOT: B256 =
    b256!("b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");

/// Number of tickets `createTokenBridge` creates (factory, contract suite)
const TOKEN_BRIDGE_TICKETS: usize = 2;

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub fees: FeeConfig,
    /// Deploy templates through the CREATE2 proxy with this salt
    pub create2_salt: Option<Bytes>,
    pub create2_factory: Address,
    pub verify: bool,
    pub verify_delay: Duration,
    pub verify_grace: Duration,
    pub message_timeout: Duration,
    pub poll_interval: Duration,
    pub l1_weth: Address,
    pub fee_token_override: Option<Address>,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            fees: FeeConfig::default(),
            create2_salt: None,
            create2_factory: DEFAULT_CREATE2_FACTORY,
            verify: false,
            verify_delay: Duration::from_secs(5),
            verify_grace: Duration::from_secs(30),
            message_timeout: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(5),
            l1_weth: Address::ZERO,
            fee_token_override: None,
        }
    }
}

/// Creator contracts produced by [`DeploymentCoordinator::deploy_creator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatorDeployment {
    pub creator: Address,
    pub retryable_sender: Address,
    pub proxy_admin: Address,
}

/// Funding figures for one `createTokenBridge` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeCreationPlan {
    pub gas_price_bid: u128,
    pub factory_gas_limit: u64,
    pub factory_submission_cost: U256,
    pub contracts_gas_limit: u64,
    pub contracts_submission_cost: U256,
}

impl BridgeCreationPlan {
    /// Total fee in 18-decimal units
    pub fn total(&self) -> U256 {
        let price = U256::from(self.gas_price_bid);
        self.factory_submission_cost
            + U256::from(self.factory_gas_limit) * price
            + self.contracts_submission_cost
            + U256::from(self.contracts_gas_limit) * price
    }
}

pub struct DeploymentCoordinator {
    source: Arc<dyn ChainClient>,
    destination: Arc<dyn ChainClient>,
    artifacts: ArtifactStore,
    deployer: ArtifactDeployer,
    estimator: FeeEstimator,
    dispatcher: CrossChainDispatcher,
    verification: VerificationQueue,
    run_state: RunStateStore,
    settings: CoordinatorSettings,
    record: DeploymentRecord,
}

impl DeploymentCoordinator {
    pub fn new(
        source: Arc<dyn ChainClient>,
        destination: Arc<dyn ChainClient>,
        artifacts: ArtifactStore,
        run_state: RunStateStore,
        settings: CoordinatorSettings,
    ) -> Self {
        let verification = VerificationQueue::new(settings.verify_delay, settings.verify_grace);
        let deployer = ArtifactDeployer::new(source.clone(), settings.create2_factory)
            .with_verification(verification.clone());
        let estimator = FeeEstimator::new(source.clone(), destination.clone(), settings.fees);
        let dispatcher =
            CrossChainDispatcher::new(source.clone(), destination.clone(), settings.poll_interval);

        Self {
            source,
            destination,
            artifacts,
            deployer,
            estimator,
            dispatcher,
            verification,
            run_state,
            settings,
            record: DeploymentRecord::new(),
        }
    }

    /// Start from a record written by an earlier run
    pub fn with_record(mut self, record: DeploymentRecord) -> Self {
        self.record = record;
        self
    }

    pub fn record(&self) -> &DeploymentRecord {
        &self.record
    }

    /// Handle on the queue deployments are appended to
    pub fn verification_queue(&self) -> &VerificationQueue {
        &self.verification
    }

    fn fail(&self, step: Step, error: eyre::Report) -> RunFailure {
        RunFailure::new(step, error, self.record.clone())
    }

    fn deploy_options(&self) -> DeployOptions {
        DeployOptions::default()
            .with_salt(self.settings.create2_salt.clone())
            .with_verify(self.settings.verify)
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Deploy creator, retryable sender and all templates, then the bridge
    pub async fn run(&mut self, inbox: Address, owner: Address) -> Result<DeploymentRecord, RunFailure> {
        let creator = self.deploy_creator().await?;
        self.create_token_bridge(creator.creator, inbox, owner).await
    }

    /// Deploy and configure the token bridge creator on the parent chain
    pub async fn deploy_creator(&mut self) -> Result<CreatorDeployment, RunFailure> {
        self.check_chains()
            .map_err(|e| self.fail(Step::Preconditions, e))?;
        self.check_funded(U256::from(1u64))
            .await
            .map_err(|e| self.fail(Step::Preconditions, e))?;

        self.deploy_templates()
            .await
            .map_err(|e| self.fail(Step::Templates, e))
    }

    /// Create the token bridge for the rollup behind `inbox`
    pub async fn create_token_bridge(
        &mut self,
        creator: Address,
        inbox: Address,
        owner: Address,
    ) -> Result<DeploymentRecord, RunFailure> {
        self.check_bridge_preconditions(creator, inbox)
            .await
            .map_err(|e| self.fail(Step::Preconditions, e))?;

        let fee_token = self
            .detect_fee_token(inbox)
            .await
            .map_err(|e| self.fail(Step::FeeToken, e))?;

        let plan = self
            .estimate_bridge_creation(creator, inbox, owner, fee_token.is_some())
            .await
            .map_err(|e| self.fail(Step::Estimate, e))?;

        let value = self
            .fund(creator, fee_token, &plan)
            .await
            .map_err(|e| self.fail(Step::Funding, e))?;

        self.dispatch_and_await(creator, inbox, owner, &plan, value)
            .await?;

        self.reconcile(creator, inbox)
            .await
            .map_err(|e| self.fail(Step::Reconcile, e))?;

        Ok(self.record.clone())
    }

    /// Write the record to `path`
    pub fn persist(&self, path: &Path) -> Result<(), RunFailure> {
        self.record
            .save(path)
            .map_err(|e| self.fail(Step::Persist, e))
    }

    // ========================================================================
    // Preconditions
    // ========================================================================

    fn check_chains(&mut self) -> Result<()> {
        let parent = self.source.chain_id();
        let child = self.destination.chain_id();
        if parent == child {
            return Err(DeployerError::Precondition(format!(
                "parent and child RPC both report chain id {parent}"
            ))
            .into());
        }

        for (key, actual) in [("l1.chainId", parent), ("l2.chainId", child)] {
            if let Some(recorded) = self.record.get(key) {
                if recorded != actual.to_string() {
                    return Err(DeployerError::Precondition(format!(
                        "record has {key} = {recorded} but RPC reports {actual}"
                    ))
                    .into());
                }
            }
        }

        self.record.set("l1.chainId", parent);
        self.record.set("l2.chainId", child);
        Ok(())
    }

    async fn check_funded(&self, required: U256) -> Result<()> {
        let sender = self.source.sender();
        let balance = self.source.get_balance(sender).await?;
        if balance < required {
            return Err(DeployerError::Precondition(format!(
                "deployer {sender} has {balance} wei on the parent chain, needs at least {required}"
            ))
            .into());
        }
        Ok(())
    }

    async fn check_bridge_preconditions(&mut self, creator: Address, inbox: Address) -> Result<()> {
        self.run_state.guard(inbox)?;
        self.check_chains()?;

        if !has_code(self.source.as_ref(), creator).await? {
            return Err(DeployerError::Precondition(format!(
                "no token bridge creator code at {creator}"
            ))
            .into());
        }
        if !has_code(self.source.as_ref(), inbox).await? {
            return Err(DeployerError::Precondition(format!("no inbox code at {inbox}")).into());
        }

        self.record.set_address("l1.tokenBridgeCreator", creator);
        self.record.set_address("l1.inbox", inbox);
        Ok(())
    }

    // ========================================================================
    // Templates
    // ========================================================================

    /// Deploy `contract` (no constructor args) and record it under `key`,
    /// then run `init` against it if given
    async fn deploy_template(
        &mut self,
        contract: &str,
        key: &str,
        init: Option<Vec<u8>>,
    ) -> Result<Address> {
        let artifact = self.artifacts.load(contract)?;
        let deployed = self
            .deployer
            .deploy(&artifact, Bytes::new(), &self.deploy_options())
            .await?;
        self.record.set_address(key, deployed.address);

        if let Some(calldata) = init {
            self.deployer
                .initialize(&deployed, Bytes::from(calldata))
                .await?;
        }
        Ok(deployed.address)
    }

    async fn deploy_proxy(&mut self, logic: Address, admin: Address, key: &str) -> Result<Artifact> {
        let artifact = self.artifacts.load("TransparentUpgradeableProxy")?;
        let args = TransparentUpgradeableProxy::constructorCall {
            logic,
            admin,
            data: Bytes::new(),
        }
        .abi_encode();

        let deployed = self
            .deployer
            .deploy(&artifact, Bytes::from(args), &self.deploy_options())
            .await?;
        self.record.set_address(key, deployed.address);
        Ok(deployed)
    }

    /// Reuse the recorded proxy admin if it still exists, else deploy one
    ///
    /// Always a plain CREATE: through the CREATE2 proxy, ownership would go
    /// to the proxy contract.
    async fn ensure_proxy_admin(&mut self) -> Result<Address> {
        if let Some(existing) = self.record.address("l1.proxyAdmin") {
            if has_code(self.source.as_ref(), existing).await? {
                info!(address = %existing, "Reusing recorded proxy admin");
                return Ok(existing);
            }
        }

        let artifact = self.artifacts.load("ProxyAdmin")?;
        let options = DeployOptions::default().with_verify(self.settings.verify);
        let deployed = self.deployer.deploy(&artifact, Bytes::new(), &options).await?;
        self.record.set_address("l1.proxyAdmin", deployed.address);
        Ok(deployed.address)
    }

    async fn deploy_templates(&mut self) -> Result<CreatorDeployment> {
        let dead = ADDRESS_DEAD;
        let proxy_hash = B256::with_last_byte(1);

        let router_init = L1GatewayRouter::initializeCall {
            owner: dead,
            defaultGateway: dead,
            whitelist: dead,
            counterpartGateway: dead,
            inbox: dead,
        }
        .abi_encode();
        let standard_init = L1ERC20Gateway::initializeCall {
            l2Counterpart: dead,
            router: dead,
            inbox: dead,
            cloneableProxyHash: proxy_hash,
            l2BeaconProxyFactory: dead,
        }
        .abi_encode();
        let custom_init = L1CustomGateway::initializeCall {
            l1Counterpart: dead,
            l1Router: dead,
            inbox: dead,
            owner: dead,
        }
        .abi_encode();

        // Parent chain templates; fee-token variants share initializer signatures
        let l1_router = self
            .deploy_template("L1GatewayRouter", "l1.templates.router", Some(router_init.clone()))
            .await?;
        let l1_standard = self
            .deploy_template(
                "L1ERC20Gateway",
                "l1.templates.standardGateway",
                Some(standard_init.clone()),
            )
            .await?;
        let l1_custom = self
            .deploy_template(
                "L1CustomGateway",
                "l1.templates.customGateway",
                Some(custom_init.clone()),
            )
            .await?;
        let l1_weth_gateway = self
            .deploy_template(
                "L1WethGateway",
                "l1.templates.wethGateway",
                Some(
                    L1WethGateway::initializeCall {
                        l2Counterpart: dead,
                        l1Router: dead,
                        inbox: dead,
                        l1Weth: dead,
                        l2Weth: dead,
                    }
                    .abi_encode(),
                ),
            )
            .await?;
        let fee_token_router = self
            .deploy_template(
                "L1OrbitGatewayRouter",
                "l1.templates.feeTokenBasedRouter",
                Some(router_init),
            )
            .await?;
        let fee_token_standard = self
            .deploy_template(
                "L1OrbitERC20Gateway",
                "l1.templates.feeTokenBasedStandardGateway",
                Some(standard_init),
            )
            .await?;
        let fee_token_custom = self
            .deploy_template(
                "L1OrbitCustomGateway",
                "l1.templates.feeTokenBasedCustomGateway",
                Some(custom_init),
            )
            .await?;
        let upgrade_executor = self
            .deploy_template(
                "UpgradeExecutor",
                "l1.templates.upgradeExecutor",
                Some(
                    UpgradeExecutor::initializeCall {
                        admin: dead,
                        executors: vec![dead],
                    }
                    .abi_encode(),
                ),
            )
            .await?;

        // Child chain templates, deployed on the parent chain so the creator
        // can read their runtime code
        let l2_factory = self
            .deploy_template(
                "L2AtomicTokenBridgeFactory",
                "l1.templates.l2TokenBridgeFactory",
                None,
            )
            .await?;
        let l2_router = self
            .deploy_template(
                "L2GatewayRouter",
                "l1.templates.l2Router",
                Some(
                    L2GatewayRouter::initializeCall {
                        counterpartGateway: dead,
                        defaultGateway: dead,
                    }
                    .abi_encode(),
                ),
            )
            .await?;
        let l2_standard = self
            .deploy_template(
                "L2ERC20Gateway",
                "l1.templates.l2StandardGateway",
                Some(
                    L2ERC20Gateway::initializeCall {
                        l1Counterpart: dead,
                        router: dead,
                        beaconProxyFactory: dead,
                    }
                    .abi_encode(),
                ),
            )
            .await?;
        let l2_custom = self
            .deploy_template(
                "L2CustomGateway",
                "l1.templates.l2CustomGateway",
                Some(
                    L2CustomGateway::initializeCall {
                        l1Counterpart: dead,
                        router: dead,
                    }
                    .abi_encode(),
                ),
            )
            .await?;
        let l2_weth_gateway = self
            .deploy_template(
                "L2WethGateway",
                "l1.templates.l2WethGateway",
                Some(
                    L2WethGateway::initializeCall {
                        l1Counterpart: dead,
                        router: dead,
                        l1Weth: dead,
                        l2Weth: dead,
                    }
                    .abi_encode(),
                ),
            )
            .await?;
        let l2_weth = self
            .deploy_template(
                "aeWETH",
                "l1.templates.l2Weth",
                Some(
                    AeWETH::initializeCall {
                        name: String::new(),
                        symbol: String::new(),
                        decimals: 0,
                        l2Gateway: dead,
                        l1Address: dead,
                    }
                    .abi_encode(),
                ),
            )
            .await?;
        let l2_multicall = self
            .deploy_template("ArbMulticall2", "l1.templates.l2Multicall", None)
            .await?;
        let l1_multicall = self
            .deploy_template("Multicall2", "l1.multicall", None)
            .await?;

        // Creator and retryable sender behind transparent proxies
        let proxy_admin = self.ensure_proxy_admin().await?;

        let creator_logic = self
            .deploy_template(
                "L1AtomicTokenBridgeCreator",
                "l1.templates.tokenBridgeCreatorLogic",
                Some(L1AtomicTokenBridgeCreator::initializeCall { retryableSender: dead }.abi_encode()),
            )
            .await?;
        let creator = self
            .deploy_proxy(creator_logic, proxy_admin, "l1.tokenBridgeCreator")
            .await?;

        let sender_logic = self
            .deploy_template(
                "L1TokenBridgeRetryableSender",
                "l1.templates.retryableSenderLogic",
                Some(L1TokenBridgeRetryableSender::initializeCall {}.abi_encode()),
            )
            .await?;
        let retryable_sender = self
            .deploy_proxy(sender_logic, proxy_admin, "l1.retryableSender")
            .await?;

        self.deployer
            .initialize(
                &creator,
                Bytes::from(
                    L1AtomicTokenBridgeCreator::initializeCall {
                        retryableSender: retryable_sender.address,
                    }
                    .abi_encode(),
                ),
            )
            .await?;

        // Gas the factory ticket will carry, fixed in the creator
        let factory_code = self.artifacts.load("L2AtomicTokenBridgeFactory")?.bytecode;
        let factory_gas = self
            .estimator
            .retryable_gas_limit(&RetryableRequest::creation(factory_code))
            .await?;
        let factory_gas = apply_safety_factor(factory_gas, self.estimator.config().gas_limit_safety_factor);

        let set_templates = L1AtomicTokenBridgeCreator::setTemplatesCall {
            l1Templates: L1AtomicTokenBridgeCreator::L1Templates {
                routerTemplate: l1_router,
                standardGatewayTemplate: l1_standard,
                customGatewayTemplate: l1_custom,
                wethGatewayTemplate: l1_weth_gateway,
                feeTokenBasedRouterTemplate: fee_token_router,
                feeTokenBasedStandardGatewayTemplate: fee_token_standard,
                feeTokenBasedCustomGatewayTemplate: fee_token_custom,
                upgradeExecutor: upgrade_executor,
            },
            l2TokenBridgeFactoryTemplate: l2_factory,
            l2RouterTemplate: l2_router,
            l2StandardGatewayTemplate: l2_standard,
            l2CustomGatewayTemplate: l2_custom,
            l2WethGatewayTemplate: l2_weth_gateway,
            l2WethTemplate: l2_weth,
            l2MulticallTemplate: l2_multicall,
            l1Weth: self.settings.l1_weth,
            l1Multicall: l1_multicall,
            gasLimitForL2FactoryDeployment: U256::from(factory_gas),
        };
        let receipt = send_call(self.source.as_ref(), creator.address, &set_templates, None)
            .await
            .wrap_err("setTemplates failed")?;

        info!(
            creator = %creator.address,
            retryable_sender = %retryable_sender.address,
            factory_gas = factory_gas,
            tx_hash = %receipt.tx_hash,
            "Token bridge creator configured"
        );

        Ok(CreatorDeployment {
            creator: creator.address,
            retryable_sender: retryable_sender.address,
            proxy_admin,
        })
    }

    // ========================================================================
    // Fee token, estimation, funding
    // ========================================================================

    async fn detect_fee_token(&mut self, inbox: Address) -> Result<Option<Address>> {
        let fee_token = match self.settings.fee_token_override {
            Some(token) => {
                info!(fee_token = %token, "Using configured fee token");
                Some(token)
            }
            None => fee_token_of_inbox(self.source.as_ref(), inbox).await?,
        };

        match fee_token {
            Some(token) => {
                self.record.set_address("l1.feeToken", token);
                info!(fee_token = %token, "Rollup pays fees in an ERC20 token");
            }
            None => info!("Rollup pays fees in ETH"),
        }
        Ok(fee_token)
    }

    /// Runtime code of a template deployed on the parent chain
    async fn template_code(&self, name: &str, address: Address) -> Result<Bytes> {
        let code = self.source.get_code(address).await?;
        if code.is_empty() {
            return Err(DeployerError::Precondition(format!(
                "{name} template at {address} has no code"
            ))
            .into());
        }
        Ok(code)
    }

    async fn estimate_bridge_creation(
        &self,
        creator: Address,
        inbox: Address,
        owner: Address,
        fee_token: bool,
    ) -> Result<BridgeCreationPlan> {
        let source = self.source.as_ref();
        let gas_price_bid = self.estimator.max_fee_per_gas().await?;
        if gas_price_bid == 0 {
            return Err(DeployerError::Estimation {
                reason: "child chain reported a zero gas price".to_string(),
                payload: String::new(),
            }
            .into());
        }

        // Ticket 1: factory creation, gas limit fixed in the creator
        let factory_gas_limit: u64 = call_contract(
            source,
            creator,
            &L1AtomicTokenBridgeCreator::gasLimitForL2FactoryDeploymentCall {},
        )
        .await?
        ._0
        .try_into()
        .map_err(|_| eyre!("gasLimitForL2FactoryDeployment does not fit in u64"))?;

        let factory_code = self.artifacts.load("L2AtomicTokenBridgeFactory")?.bytecode;
        let factory_estimate = self
            .estimator
            .retryable_gas_limit(&RetryableRequest::creation(factory_code.clone()))
            .await?;
        if factory_estimate > factory_gas_limit {
            warn!(
                stored = factory_gas_limit,
                estimated = factory_estimate,
                "Creator's factory gas limit is below the current estimate"
            );
        }

        // Ticket 2: contract suite, simulated against the factory template
        let factory_template = call_contract(
            source,
            creator,
            &L1AtomicTokenBridgeCreator::l2TokenBridgeFactoryTemplateCall {},
        )
        .await?
        ._0;
        let l1_templates =
            call_contract(source, creator, &L1AtomicTokenBridgeCreator::l1TemplatesCall {}).await?;
        let router = call_contract(source, creator, &L1AtomicTokenBridgeCreator::l2RouterTemplateCall {})
            .await?
            ._0;
        let standard = call_contract(
            source,
            creator,
            &L1AtomicTokenBridgeCreator::l2StandardGatewayTemplateCall {},
        )
        .await?
        ._0;
        let custom = call_contract(
            source,
            creator,
            &L1AtomicTokenBridgeCreator::l2CustomGatewayTemplateCall {},
        )
        .await?
        ._0;
        let weth_gateway = call_contract(
            source,
            creator,
            &L1AtomicTokenBridgeCreator::l2WethGatewayTemplateCall {},
        )
        .await?
        ._0;
        let weth = call_contract(source, creator, &L1AtomicTokenBridgeCreator::l2WethTemplateCall {})
            .await?
            ._0;
        let multicall = call_contract(
            source,
            creator,
            &L1AtomicTokenBridgeCreator::l2MulticallTemplateCall {},
        )
        .await?
        ._0;

        let l2_code = L2AtomicTokenBridgeFactory::L2RuntimeCode {
            router: self.template_code("L2GatewayRouter", router).await?,
            standardGateway: self.template_code("L2ERC20Gateway", standard).await?,
            customGateway: self.template_code("L2CustomGateway", custom).await?,
            wethGateway: self.template_code("L2WethGateway", weth_gateway).await?,
            aeWeth: self.template_code("aeWETH", weth).await?,
            upgradeExecutor: self
                .template_code("UpgradeExecutor", l1_templates.upgradeExecutor)
                .await?,
            multicall: self.template_code("ArbMulticall2", multicall).await?,
        };

        let dummy = ADDRESS_DEAD;
        let deploy_contracts = L2AtomicTokenBridgeFactory::deployL2ContractsCall {
            l2Code: l2_code,
            l1Router: dummy,
            l1StandardGateway: dummy,
            l1CustomGateway: dummy,
            l1WethGateway: dummy,
            l1Weth: dummy,
            l2StandardGatewayCanonicalAddress: dummy,
            rollupOwner: owner,
            aliasedL1UpgradeExecutor: dummy,
        };
        let calldata = Bytes::from(deploy_contracts.abi_encode());
        let simulation = TransactionRequest::default()
            .with_to(factory_template)
            .with_input(calldata.clone());
        let contracts_gas_limit = self
            .estimator
            .estimate_gas_with_safety(source, &simulation)
            .await?;

        // ERC20 inboxes charge no submission fee
        let (factory_submission_cost, contracts_submission_cost) = if fee_token {
            (U256::ZERO, U256::ZERO)
        } else {
            (
                self.estimator
                    .submission_cost(inbox, factory_code.len())
                    .await?,
                self.estimator.submission_cost(inbox, calldata.len()).await?,
            )
        };

        let plan = BridgeCreationPlan {
            gas_price_bid,
            factory_gas_limit,
            factory_submission_cost,
            contracts_gas_limit,
            contracts_submission_cost,
        };
        info!(
            gas_price_bid = %plan.gas_price_bid,
            factory_gas_limit = plan.factory_gas_limit,
            contracts_gas_limit = plan.contracts_gas_limit,
            total = %plan.total(),
            "Estimated token bridge creation"
        );
        Ok(plan)
    }

    /// Make the fee available to the creator; returns the value to attach
    async fn fund(
        &self,
        creator: Address,
        fee_token: Option<Address>,
        plan: &BridgeCreationPlan,
    ) -> Result<U256> {
        let total = plan.total();
        let source = self.source.as_ref();

        match fee_token {
            None => {
                self.check_funded(total).await?;
                Ok(total)
            }
            Some(token) => {
                let amount = scale_fee_amount(source, token, total).await?;
                let balance = get_token_balance(source, token, source.sender()).await?;
                if balance < amount {
                    return Err(DeployerError::Precondition(format!(
                        "deployer holds {balance} of fee token {token}, needs {amount}"
                    ))
                    .into());
                }
                ensure_allowance(source, token, creator, amount).await?;
                Ok(U256::ZERO)
            }
        }
    }

    // ========================================================================
    // Dispatch and reconciliation
    // ========================================================================

    async fn dispatch_and_await(
        &mut self,
        creator: Address,
        inbox: Address,
        owner: Address,
        plan: &BridgeCreationPlan,
        value: U256,
    ) -> Result<(), RunFailure> {
        self.run_state
            .mark_started(inbox)
            .map_err(|e| self.fail(Step::Dispatch, e))?;

        let calldata = L1AtomicTokenBridgeCreator::createTokenBridgeCall {
            inbox,
            rollupOwner: owner,
            maxGasForContracts: U256::from(plan.contracts_gas_limit),
            gasPriceBid: U256::from(plan.gas_price_bid),
        }
        .abi_encode();

        let tx_hash = self
            .dispatcher
            .submit(creator, Bytes::from(calldata), value)
            .await
            .map_err(|e| self.fail(Step::Dispatch, e))?;
        self.record.set("l1.createTokenBridgeTx", tx_hash);

        // From here on a re-run must not send again
        self.run_state
            .mark_submitted(inbox, tx_hash)
            .map_err(|e| self.fail(Step::Dispatch, e).with_tx_hash(Some(tx_hash)))?;

        let dispatch = self
            .dispatcher
            .collect(tx_hash, TOKEN_BRIDGE_TICKETS)
            .await
            .map_err(|e| self.fail(Step::Dispatch, e).with_tx_hash(Some(tx_hash)))?;

        let ids = dispatch.message_ids();
        self.record.set("retryables.factory", ids[0]);
        self.record.set("retryables.contracts", ids[1]);

        self.run_state
            .mark_dispatched(inbox, tx_hash, ids.clone())
            .map_err(|e| {
                self.fail(Step::Dispatch, e)
                    .with_tx_hash(Some(tx_hash))
                    .with_message_ids(ids.clone())
            })?;

        let results = self
            .dispatcher
            .await_all(&dispatch.messages, self.settings.message_timeout)
            .await;

        if let Some(factory) = results.first().and_then(|r| r.created_address()) {
            self.record.set_address("l2.tokenBridgeFactory", factory);
        }

        ensure_all_redeemed(&results)
            .map_err(|e| self.fail(Step::Dispatch, e).with_tx_hash(Some(tx_hash)))
    }

    async fn reconcile(&mut self, creator: Address, inbox: Address) -> Result<()> {
        let source = self.source.as_ref();

        let l1 = call_contract(
            source,
            creator,
            &L1AtomicTokenBridgeCreator::inboxToL1DeploymentCall { inbox },
        )
        .await
        .wrap_err("Failed to read parent chain deployment")?;
        let l2 = call_contract(
            source,
            creator,
            &L1AtomicTokenBridgeCreator::inboxToL2DeploymentCall { inbox },
        )
        .await
        .wrap_err("Failed to read child chain deployment")?;
        let l1_multicall = call_contract(source, creator, &L1AtomicTokenBridgeCreator::l1MulticallCall {})
            .await?
            ._0;
        let canonical_factory = call_contract(
            source,
            creator,
            &L1AtomicTokenBridgeCreator::canonicalL2FactoryAddressCall {},
        )
        .await?
        ._0;

        let l1_entries = [
            ("l1.router", l1.router),
            ("l1.standardGateway", l1.standardGateway),
            ("l1.customGateway", l1.customGateway),
            ("l1.wethGateway", l1.wethGateway),
            ("l1.weth", l1.weth),
            ("l1.multicall", l1_multicall),
        ];
        let l2_entries = [
            ("l2.router", l2.router),
            ("l2.standardGateway", l2.standardGateway),
            ("l2.customGateway", l2.customGateway),
            ("l2.wethGateway", l2.wethGateway),
            ("l2.weth", l2.weth),
            ("l2.proxyAdmin", l2.proxyAdmin),
            ("l2.beaconProxyFactory", l2.beaconProxyFactory),
            ("l2.upgradeExecutor", l2.upgradeExecutor),
            ("l2.multicall", l2.multicall),
        ];

        // ETH-only contracts are zero on fee-token rollups
        for (key, address) in l1_entries {
            if address != Address::ZERO {
                self.record.set_address(key, address);
            }
        }
        for (key, address) in l2_entries {
            if address == Address::ZERO {
                continue;
            }
            if !has_code(self.destination.as_ref(), address).await? {
                warn!(key = key, address = %address, "No code on child chain");
            }
            self.record.set_address(key, address);
        }

        match self.record.address("l2.tokenBridgeFactory") {
            Some(factory) if factory != canonical_factory => warn!(
                redeemed = %factory,
                canonical = %canonical_factory,
                "Factory address differs from the creator's canonical address"
            ),
            Some(_) => {}
            None => self
                .record
                .set_address("l2.tokenBridgeFactory", canonical_factory),
        }

        if self.record.get("l1.proxyAdmin").is_none() {
            let slot = self
                .source
                .get_storage_at(creator, U256::from_be_bytes(EIP1967_ADMIN_SLOT.0))
                .await?;
            let admin = Address::from_word(B256::from(slot.to_be_bytes::<32>()));
            if admin != Address::ZERO {
                self.record.set_address("l1.proxyAdmin", admin);
            }
        }

        self.run_state.mark_completed(inbox)?;
        info!(inbox = %inbox, entries = self.record.len(), "Token bridge deployed");
        Ok(())
    }
}
