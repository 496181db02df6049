//! ERC20 Token Helpers
//!
//! Fee-token lookups for rollups whose native currency is an ERC20 on the
//! parent chain: discovery through the inbox, decimals, allowance and approve.

use alloy::primitives::{Address, U256};
use eyre::{eyre, Result, WrapErr};
use tracing::{debug, info};

use crate::evm::client::{call_contract, send_call, ChainClient};
use crate::evm::contracts::{IBridge, IInbox, IERC20};

/// Fee token of the rollup behind `inbox`, or `None` for an ETH-based rollup
///
/// ETH-based bridges have no `nativeToken()`; a failing or zero answer is
/// read as "no fee token". The bridge lookup itself must succeed.
pub async fn fee_token_of_inbox(client: &dyn ChainClient, inbox: Address) -> Result<Option<Address>> {
    let bridge = call_contract(client, inbox, &IInbox::bridgeCall {})
        .await
        .wrap_err_with(|| format!("Failed to read bridge of inbox {}", inbox))?
        ._0;

    match call_contract(client, bridge, &IBridge::nativeTokenCall {}).await {
        Ok(ret) if ret._0 != Address::ZERO => {
            debug!(bridge = %bridge, fee_token = %ret._0, "Rollup uses a fee token");
            Ok(Some(ret._0))
        }
        Ok(_) => Ok(None),
        Err(e) => {
            debug!(bridge = %bridge, error = %e, "No nativeToken() on bridge, assuming ETH");
            Ok(None)
        }
    }
}

/// Get token decimals
pub async fn get_token_decimals(client: &dyn ChainClient, token: Address) -> Result<u8> {
    let decimals = call_contract(client, token, &IERC20::decimalsCall {})
        .await
        .map_err(|e| eyre!("Failed to get decimals of {}: {}", token, e))?;
    Ok(decimals._0)
}

/// Get the ERC20 token balance of an address
pub async fn get_token_balance(
    client: &dyn ChainClient,
    token: Address,
    account: Address,
) -> Result<U256> {
    let balance = call_contract(client, token, &IERC20::balanceOfCall { account })
        .await
        .map_err(|e| eyre!("Failed to get balance: {}", e))?;
    Ok(balance._0)
}

/// Get the ERC20 token allowance
pub async fn get_token_allowance(
    client: &dyn ChainClient,
    token: Address,
    owner: Address,
    spender: Address,
) -> Result<U256> {
    let allowance = call_contract(client, token, &IERC20::allowanceCall { owner, spender })
        .await
        .map_err(|e| eyre!("Failed to get allowance: {}", e))?;
    Ok(allowance._0)
}

/// Approve `spender` for `amount` unless the current allowance already covers it
///
/// Returns whether an approve transaction was sent.
pub async fn ensure_allowance(
    client: &dyn ChainClient,
    token: Address,
    spender: Address,
    amount: U256,
) -> Result<bool> {
    let current = get_token_allowance(client, token, client.sender(), spender).await?;
    if current >= amount {
        debug!(token = %token, spender = %spender, allowance = %current, "Allowance sufficient");
        return Ok(false);
    }

    let receipt = send_call(
        client,
        token,
        &IERC20::approveCall { spender, amount },
        None,
    )
    .await
    .wrap_err("Fee token approve failed")?;

    info!(
        token = %token,
        spender = %spender,
        amount = %amount,
        tx_hash = %receipt.tx_hash,
        "Fee token approved"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChainClient;
    use alloy::sol_types::{SolCall, SolValue};

    #[tokio::test]
    async fn test_eth_based_inbox_has_no_fee_token() {
        let client = MockChainClient::new(1);
        let inbox = Address::repeat_byte(0x1b);
        let bridge = Address::repeat_byte(0xb1);
        client.on_call(inbox, IInbox::bridgeCall::SELECTOR, bridge.abi_encode());
        client.revert_call(bridge, IBridge::nativeTokenCall::SELECTOR);

        assert_eq!(fee_token_of_inbox(&client, inbox).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_erc20_based_inbox() {
        let client = MockChainClient::new(1);
        let inbox = Address::repeat_byte(0x1b);
        let bridge = Address::repeat_byte(0xb1);
        let token = Address::repeat_byte(0x70);
        client.on_call(inbox, IInbox::bridgeCall::SELECTOR, bridge.abi_encode());
        client.on_call(bridge, IBridge::nativeTokenCall::SELECTOR, token.abi_encode());

        assert_eq!(fee_token_of_inbox(&client, inbox).await.unwrap(), Some(token));
    }

    #[tokio::test]
    async fn test_missing_bridge_is_an_error() {
        let client = MockChainClient::new(1);
        let inbox = Address::repeat_byte(0x1b);
        client.revert_call(inbox, IInbox::bridgeCall::SELECTOR);

        assert!(fee_token_of_inbox(&client, inbox).await.is_err());
    }

    #[tokio::test]
    async fn test_ensure_allowance_skips_when_sufficient() {
        let client = MockChainClient::new(1);
        let token = Address::repeat_byte(0x70);
        let spender = Address::repeat_byte(0x5e);
        client.on_call(
            token,
            IERC20::allowanceCall::SELECTOR,
            U256::from(1_000u64).abi_encode(),
        );

        assert!(!ensure_allowance(&client, token, spender, U256::from(1_000u64))
            .await
            .unwrap());
        assert!(ensure_allowance(&client, token, spender, U256::from(1_001u64))
            .await
            .unwrap());
        assert_eq!(client.sent_to(token), 1);
    }
}
