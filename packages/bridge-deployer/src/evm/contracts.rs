//! Contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe call/event encoders for the
//! rollup inbox, the child-chain precompiles, the token bridge creator and the
//! template contracts it clones.
//!
//! Constructors are declared explicitly so constructor arguments are encoded
//! from a static schema rather than guessed from runtime values.

#![allow(clippy::too_many_arguments)]

use alloy::primitives::{address, Address};
use alloy::sol;

/// `NodeInterface` virtual contract on the child chain (gas estimation only)
pub const NODE_INTERFACE: Address = address!("00000000000000000000000000000000000000c8");

/// `ArbRetryableTx` precompile on the child chain
pub const ARB_RETRYABLE_TX: Address = address!("000000000000000000000000000000000000006e");

/// Placeholder used to initialize template (logic) contracts
pub const ADDRESS_DEAD: Address = address!("000000000000000000000000000000000000dEaD");

/// Bridge message kind for a submitted retryable ticket
pub const L1_MESSAGE_TYPE_SUBMIT_RETRYABLE_TX: u8 = 9;

sol! {
    // ========================================================================
    // Rollup messaging (parent chain)
    // ========================================================================

    /// Rollup inbox (ETH-based and ERC20-based share this surface)
    contract IInbox {
        function bridge() external view returns (address);

        /// Zero on ERC20-based inboxes
        function calculateRetryableSubmissionFee(uint256 dataLength, uint256 baseFee)
            external
            view
            returns (uint256);

        event InboxMessageDelivered(uint256 indexed messageNum, bytes data);
    }

    /// Rollup bridge
    contract IBridge {
        /// Only present on ERC20-based bridges
        function nativeToken() external view returns (address);

        event MessageDelivered(
            uint256 indexed messageIndex,
            bytes32 indexed beforeInboxAcc,
            address inbox,
            uint8 kind,
            address sender,
            bytes32 messageDataHash,
            uint256 baseFeeL1,
            uint64 timestamp
        );
    }

    /// ERC20 token ABI (fee token)
    contract IERC20 {
        function decimals() external view returns (uint8);
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }

    // ========================================================================
    // Child chain precompiles
    // ========================================================================

    contract NodeInterface {
        function estimateRetryableTicket(
            address sender,
            uint256 deposit,
            address to,
            uint256 l2CallValue,
            address excessFeeRefundAddress,
            address callValueRefundAddress,
            bytes calldata data
        ) external;
    }

    contract ArbRetryableTx {
        /// Reverts with `NoTicketWithID` once the ticket is redeemed or expired
        function getTimeout(bytes32 ticketId) external view returns (uint256);

        event RedeemScheduled(
            bytes32 indexed ticketId,
            bytes32 indexed retryTxHash,
            uint64 indexed sequenceNum,
            uint64 donatedGas,
            address gasDonor,
            uint256 maxRefund,
            uint256 submissionFeeRefund
        );

        error NoTicketWithID();
    }

    // ========================================================================
    // Token bridge creator
    // ========================================================================

    contract L1AtomicTokenBridgeCreator {
        struct L1Templates {
            address routerTemplate;
            address standardGatewayTemplate;
            address customGatewayTemplate;
            address wethGatewayTemplate;
            address feeTokenBasedRouterTemplate;
            address feeTokenBasedStandardGatewayTemplate;
            address feeTokenBasedCustomGatewayTemplate;
            address upgradeExecutor;
        }

        function initialize(address retryableSender) external;

        function setTemplates(
            L1Templates calldata l1Templates,
            address l2TokenBridgeFactoryTemplate,
            address l2RouterTemplate,
            address l2StandardGatewayTemplate,
            address l2CustomGatewayTemplate,
            address l2WethGatewayTemplate,
            address l2WethTemplate,
            address l2MulticallTemplate,
            address l1Weth,
            address l1Multicall,
            uint256 gasLimitForL2FactoryDeployment
        ) external;

        function createTokenBridge(
            address inbox,
            address rollupOwner,
            uint256 maxGasForContracts,
            uint256 gasPriceBid
        ) external payable;

        function gasLimitForL2FactoryDeployment() external view returns (uint256);
        function l1Templates() external view returns (
            address routerTemplate,
            address standardGatewayTemplate,
            address customGatewayTemplate,
            address wethGatewayTemplate,
            address feeTokenBasedRouterTemplate,
            address feeTokenBasedStandardGatewayTemplate,
            address feeTokenBasedCustomGatewayTemplate,
            address upgradeExecutor
        );
        function l2TokenBridgeFactoryTemplate() external view returns (address);
        function l2RouterTemplate() external view returns (address);
        function l2StandardGatewayTemplate() external view returns (address);
        function l2CustomGatewayTemplate() external view returns (address);
        function l2WethGatewayTemplate() external view returns (address);
        function l2WethTemplate() external view returns (address);
        function l2MulticallTemplate() external view returns (address);
        function l1Weth() external view returns (address);
        function retryableSender() external view returns (address);
        function l1Multicall() external view returns (address);
        function canonicalL2FactoryAddress() external view returns (address);

        function inboxToL1Deployment(address inbox) external view returns (
            address router,
            address standardGateway,
            address customGateway,
            address wethGateway,
            address weth
        );

        function inboxToL2Deployment(address inbox) external view returns (
            address router,
            address standardGateway,
            address customGateway,
            address wethGateway,
            address weth,
            address proxyAdmin,
            address beaconProxyFactory,
            address upgradeExecutor,
            address multicall
        );
    }

    contract L1TokenBridgeRetryableSender {
        function initialize() external;
    }

    contract L2AtomicTokenBridgeFactory {
        struct L2RuntimeCode {
            bytes router;
            bytes standardGateway;
            bytes customGateway;
            bytes wethGateway;
            bytes aeWeth;
            bytes upgradeExecutor;
            bytes multicall;
        }

        function deployL2Contracts(
            L2RuntimeCode calldata l2Code,
            address l1Router,
            address l1StandardGateway,
            address l1CustomGateway,
            address l1WethGateway,
            address l1Weth,
            address l2StandardGatewayCanonicalAddress,
            address rollupOwner,
            address aliasedL1UpgradeExecutor
        ) external;
    }

    // ========================================================================
    // Proxy infrastructure
    // ========================================================================

    contract TransparentUpgradeableProxy {
        constructor(address logic, address admin, bytes data);
    }

    contract UpgradeExecutor {
        function initialize(address admin, address[] executors) external;
    }

    // ========================================================================
    // Parent chain templates
    // ========================================================================

    contract L1GatewayRouter {
        function initialize(
            address owner,
            address defaultGateway,
            address whitelist,
            address counterpartGateway,
            address inbox
        ) external;
    }

    contract L1ERC20Gateway {
        function initialize(
            address l2Counterpart,
            address router,
            address inbox,
            bytes32 cloneableProxyHash,
            address l2BeaconProxyFactory
        ) external;
    }

    contract L1CustomGateway {
        function initialize(
            address l1Counterpart,
            address l1Router,
            address inbox,
            address owner
        ) external;
    }

    contract L1WethGateway {
        function initialize(
            address l2Counterpart,
            address l1Router,
            address inbox,
            address l1Weth,
            address l2Weth
        ) external;
    }

    // ========================================================================
    // Child chain templates (deployed on the parent chain for simulation)
    // ========================================================================

    contract L2GatewayRouter {
        function initialize(address counterpartGateway, address defaultGateway) external;
    }

    contract L2ERC20Gateway {
        function initialize(address l1Counterpart, address router, address beaconProxyFactory) external;
    }

    contract L2CustomGateway {
        function initialize(address l1Counterpart, address router) external;
    }

    contract L2WethGateway {
        function initialize(address l1Counterpart, address router, address l1Weth, address l2Weth) external;
    }

    contract AeWETH {
        function initialize(
            string name,
            string symbol,
            uint8 decimals,
            address l2Gateway,
            address l1Address
        ) external;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, U256};
    use alloy::sol_types::{SolCall, SolConstructor};

    #[test]
    fn test_known_selectors() {
        assert_eq!(IInbox::bridgeCall::SELECTOR, [0xe7, 0x8c, 0xea, 0x92]);
        assert_eq!(IERC20::decimalsCall::SELECTOR, [0x31, 0x3c, 0xe5, 0x67]);
        assert_eq!(IERC20::approveCall::SELECTOR, [0x09, 0x5e, 0xa7, 0xb3]);
    }

    #[test]
    fn test_proxy_constructor_encoding_is_static() {
        let args = TransparentUpgradeableProxy::constructorCall {
            logic: Address::repeat_byte(1),
            admin: Address::repeat_byte(2),
            data: Bytes::new(),
        }
        .abi_encode();

        // two address words, one offset word, one length word
        assert_eq!(args.len(), 4 * 32);
        assert_eq!(&args[12..32], Address::repeat_byte(1).as_slice());
        assert_eq!(U256::from_be_slice(&args[64..96]), U256::from(96));
    }
}
