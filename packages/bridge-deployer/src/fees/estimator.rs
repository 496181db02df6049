//! Retryable ticket fee estimation
//!
//! A ticket is funded with `maxSubmissionCost + gasLimit * maxFeePerGas`.
//! The submission cost comes from the inbox on the parent chain, the gas
//! limit from the child chain's `NodeInterface`, and the gas price from the
//! child chain RPC. Each figure is padded by a configurable percentage.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use eyre::{Result, WrapErr};
use std::sync::Arc;
use tracing::debug;

use crate::error::DeployerError;
use crate::evm::client::{call_contract, ChainClient};
use crate::evm::contracts::{IInbox, NodeInterface, NODE_INTERFACE};

/// Deposit assumed for the estimation sender, on top of the call value
const ESTIMATION_DEPOSIT: u128 = 1_000_000_000_000_000_000;

/// Placeholder sender and refund address used when estimating a ticket
pub const ESTIMATION_SENDER: Address =
    alloy::primitives::address!("00000000000000000000000000000000000dead1");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeConfig {
    /// Multiplier applied to parent-chain gas estimates of simulated calls
    pub gas_limit_safety_factor: u64,
    pub submission_fee_percent_increase: u64,
    pub gas_price_percent_increase: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            gas_limit_safety_factor: 2,
            submission_fee_percent_increase: 300,
            gas_price_percent_increase: 0,
        }
    }
}

/// Funding parameters for one retryable ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryableGasParams {
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_submission_cost: U256,
}

impl RetryableGasParams {
    /// Cost of executing the ticket on the child chain
    pub fn execution_cost(&self) -> U256 {
        U256::from(self.gas_limit) * U256::from(self.max_fee_per_gas)
    }

    /// Total value the ticket must be funded with
    pub fn deposit(&self) -> U256 {
        self.max_submission_cost + self.execution_cost()
    }
}

/// The child-chain call a ticket will make
#[derive(Debug, Clone)]
pub struct RetryableRequest {
    pub from: Address,
    /// Zero for a contract creation
    pub to: Address,
    pub l2_call_value: U256,
    pub excess_fee_refund_address: Address,
    pub call_value_refund_address: Address,
    pub data: Bytes,
}

impl RetryableRequest {
    /// A ticket that deploys `init_code` on the child chain
    pub fn creation(init_code: Bytes) -> Self {
        Self {
            from: ESTIMATION_SENDER,
            to: Address::ZERO,
            l2_call_value: U256::ZERO,
            excess_fee_refund_address: ESTIMATION_SENDER,
            call_value_refund_address: ESTIMATION_SENDER,
            data: init_code,
        }
    }
}

/// `value * (100 + percent) / 100`
pub fn apply_percent_increase(value: U256, percent: u64) -> U256 {
    value * U256::from(100 + percent) / U256::from(100u64)
}

pub fn apply_safety_factor(gas: u64, factor: u64) -> u64 {
    gas.saturating_mul(factor.max(1))
}

pub struct FeeEstimator {
    source: Arc<dyn ChainClient>,
    destination: Arc<dyn ChainClient>,
    config: FeeConfig,
}

impl FeeEstimator {
    pub fn new(
        source: Arc<dyn ChainClient>,
        destination: Arc<dyn ChainClient>,
        config: FeeConfig,
    ) -> Self {
        Self {
            source,
            destination,
            config,
        }
    }

    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    /// Padded submission cost for `data_len` bytes of ticket calldata
    pub async fn submission_cost(&self, inbox: Address, data_len: usize) -> Result<U256> {
        let base_fee = self.source.base_fee().await?;
        let fee = call_contract(
            self.source.as_ref(),
            inbox,
            &IInbox::calculateRetryableSubmissionFeeCall {
                dataLength: U256::from(data_len),
                baseFee: U256::from(base_fee),
            },
        )
        .await
        .wrap_err("Failed to query retryable submission fee")?
        ._0;

        Ok(apply_percent_increase(
            fee,
            self.config.submission_fee_percent_increase,
        ))
    }

    /// Padded child-chain gas price to bid
    pub async fn max_fee_per_gas(&self) -> Result<u128> {
        let price = self.destination.gas_price().await?;
        let padded =
            apply_percent_increase(U256::from(price), self.config.gas_price_percent_increase);
        Ok(padded.try_into().unwrap_or(u128::MAX))
    }

    /// Child-chain gas limit for a ticket, from `NodeInterface`
    pub async fn retryable_gas_limit(&self, request: &RetryableRequest) -> Result<u64> {
        let call = NodeInterface::estimateRetryableTicketCall {
            sender: request.from,
            deposit: U256::from(ESTIMATION_DEPOSIT) + request.l2_call_value,
            to: request.to,
            l2CallValue: request.l2_call_value,
            excessFeeRefundAddress: request.excess_fee_refund_address,
            callValueRefundAddress: request.call_value_refund_address,
            data: request.data.clone(),
        };
        let tx = TransactionRequest::default()
            .with_to(NODE_INTERFACE)
            .with_input(Bytes::from(call.abi_encode()));

        let gas = self
            .destination
            .estimate_gas(&tx)
            .await
            .map_err(|e| DeployerError::Estimation {
                reason: format!("{e:#}"),
                payload: hex::encode(&request.data),
            })?;

        if gas == 0 {
            return Err(DeployerError::Estimation {
                reason: "child chain estimated zero gas for ticket".to_string(),
                payload: hex::encode(&request.data),
            }
            .into());
        }
        Ok(gas)
    }

    /// Full funding parameters for a ticket submitted through `inbox`
    pub async fn estimate_retryable(
        &self,
        inbox: Address,
        request: &RetryableRequest,
    ) -> Result<RetryableGasParams> {
        let gas_limit = self.retryable_gas_limit(request).await?;
        let max_fee_per_gas = self.max_fee_per_gas().await?;
        let max_submission_cost = self.submission_cost(inbox, request.data.len()).await?;

        let params = RetryableGasParams {
            gas_limit,
            max_fee_per_gas,
            max_submission_cost,
        };
        debug!(
            gas_limit = params.gas_limit,
            max_fee_per_gas = %params.max_fee_per_gas,
            max_submission_cost = %params.max_submission_cost,
            deposit = %params.deposit(),
            "Estimated retryable ticket"
        );
        Ok(params)
    }

    /// Estimate `tx` on `client` and apply the safety factor
    ///
    /// Used for calls simulated on the parent chain whose real execution
    /// happens on the child chain.
    pub async fn estimate_gas_with_safety(
        &self,
        client: &dyn ChainClient,
        tx: &TransactionRequest,
    ) -> Result<u64> {
        let raw = client.estimate_gas(tx).await.map_err(|e| {
            let payload = tx
                .input
                .input()
                .map(hex::encode)
                .unwrap_or_default();
            DeployerError::Estimation {
                reason: format!("{e:#}"),
                payload,
            }
        })?;

        if raw == 0 {
            return Err(DeployerError::Estimation {
                reason: "estimated zero gas".to_string(),
                payload: tx.input.input().map(hex::encode).unwrap_or_default(),
            }
            .into());
        }
        Ok(apply_safety_factor(raw, self.config.gas_limit_safety_factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChainClient;
    use alloy::sol_types::SolValue;

    fn setup(config: FeeConfig) -> (Arc<MockChainClient>, Arc<MockChainClient>, FeeEstimator) {
        let source = Arc::new(MockChainClient::new(1337));
        let destination = Arc::new(MockChainClient::new(412346));
        let estimator = FeeEstimator::new(source.clone(), destination.clone(), config);
        (source, destination, estimator)
    }

    #[test]
    fn test_percent_increase() {
        assert_eq!(apply_percent_increase(U256::from(100u64), 0), U256::from(100u64));
        assert_eq!(apply_percent_increase(U256::from(100u64), 300), U256::from(400u64));
        assert_eq!(apply_percent_increase(U256::from(3u64), 50), U256::from(4u64));
    }

    #[test]
    fn test_deposit_sums_components() {
        let params = RetryableGasParams {
            gas_limit: 1_000,
            max_fee_per_gas: 10,
            max_submission_cost: U256::from(5u64),
        };
        assert_eq!(params.execution_cost(), U256::from(10_000u64));
        assert_eq!(params.deposit(), U256::from(10_005u64));
    }

    #[tokio::test]
    async fn test_estimate_retryable() {
        let (source, destination, estimator) = setup(FeeConfig::default());
        let inbox = Address::repeat_byte(0x1b);

        source.on_call(
            inbox,
            IInbox::calculateRetryableSubmissionFeeCall::SELECTOR,
            U256::from(1_000u64).abi_encode(),
        );
        destination.on_estimate(
            NODE_INTERFACE,
            NodeInterface::estimateRetryableTicketCall::SELECTOR,
            250_000,
        );
        destination.set_gas_price(100_000_000);

        let params = estimator
            .estimate_retryable(inbox, &RetryableRequest::creation(Bytes::from(vec![0x60; 100])))
            .await
            .unwrap();

        assert_eq!(params.gas_limit, 250_000);
        assert_eq!(params.max_fee_per_gas, 100_000_000);
        // +300%
        assert_eq!(params.max_submission_cost, U256::from(4_000u64));
    }

    #[tokio::test]
    async fn test_zero_gas_is_estimation_error() {
        let (_source, destination, estimator) = setup(FeeConfig::default());
        destination.on_estimate(
            NODE_INTERFACE,
            NodeInterface::estimateRetryableTicketCall::SELECTOR,
            0,
        );

        let err = estimator
            .retryable_gas_limit(&RetryableRequest::creation(Bytes::from(vec![0xab, 0xcd])))
            .await
            .unwrap_err();
        match err.downcast_ref::<DeployerError>() {
            Some(DeployerError::Estimation { payload, .. }) => assert_eq!(payload, "abcd"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_simulation_carries_payload() {
        let (source, _destination, estimator) = setup(FeeConfig::default());
        let factory = Address::repeat_byte(0xfa);
        source.fail_estimate(factory, [0xde, 0xad, 0xbe, 0xef], "execution reverted");

        let tx = TransactionRequest::default()
            .with_to(factory)
            .with_input(Bytes::from(vec![0xde, 0xad, 0xbe, 0xef, 0x01]));
        let err = estimator
            .estimate_gas_with_safety(source.as_ref(), &tx)
            .await
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("execution reverted"));
        assert!(msg.contains("deadbeef01"));
    }

    #[tokio::test]
    async fn test_safety_factor_is_monotonic() {
        let mut previous = 0u64;
        for factor in 1..=5 {
            let (source, _destination, estimator) = setup(FeeConfig {
                gas_limit_safety_factor: factor,
                ..FeeConfig::default()
            });
            source.set_default_gas(21_000);
            let tx = TransactionRequest::default()
                .with_to(Address::repeat_byte(1))
                .with_input(Bytes::from(vec![1, 2, 3, 4]));

            let gas = estimator
                .estimate_gas_with_safety(source.as_ref(), &tx)
                .await
                .unwrap();
            assert!(gas >= previous);
            assert!(gas >= 21_000);
            previous = gas;
        }
    }
}
