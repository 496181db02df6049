//! Fee-token amount scaling
//!
//! Fees are estimated in 18-decimal units. A rollup whose native token has a
//! different precision needs the amount converted before it is approved or
//! transferred. Down-scaling rounds up so the fee is never short.

use alloy::primitives::{Address, U256};
use eyre::{eyre, Result, WrapErr};
use tracing::debug;

use crate::evm::client::ChainClient;
use crate::evm::tokens::get_token_decimals;

/// Precision every fee estimate is expressed in
pub const NATIVE_DECIMALS: u8 = 18;

/// Convert an 18-decimal amount to a token with `decimals` decimals
///
/// - `decimals == 18`: unchanged
/// - `decimals < 18`: divide by `10^(18 - decimals)`, rounding up
/// - `decimals > 18`: multiply by `10^(decimals - 18)`
///
/// Fails when the scale factor or the scaled amount does not fit in 256 bits.
pub fn scale_to_native_token_decimals(amount: U256, decimals: u8) -> Result<U256> {
    match decimals.cmp(&NATIVE_DECIMALS) {
        std::cmp::Ordering::Equal => Ok(amount),
        std::cmp::Ordering::Less => {
            let divisor = power_of_ten(NATIVE_DECIMALS - decimals)?;
            let quotient = amount / divisor;
            if amount % divisor == U256::ZERO {
                Ok(quotient)
            } else {
                Ok(quotient + U256::from(1u64))
            }
        }
        std::cmp::Ordering::Greater => {
            let factor = power_of_ten(decimals - NATIVE_DECIMALS)?;
            amount.checked_mul(factor).ok_or_else(|| {
                eyre!("Fee amount {amount} overflows when scaled to {decimals} decimals")
            })
        }
    }
}

fn power_of_ten(exponent: u8) -> Result<U256> {
    U256::from(10u64)
        .checked_pow(U256::from(exponent))
        .ok_or_else(|| eyre!("10^{exponent} does not fit in 256 bits"))
}

/// Convert an 18-decimal fee into units of `token`, reading its decimals once
pub async fn scale_fee_amount(
    client: &dyn ChainClient,
    token: Address,
    amount: U256,
) -> Result<U256> {
    let decimals = get_token_decimals(client, token).await?;
    let scaled = scale_to_native_token_decimals(amount, decimals)
        .wrap_err_with(|| format!("Unsupported decimals {decimals} for fee token {token}"))?;
    debug!(token = %token, decimals = decimals, amount = %amount, scaled = %scaled, "Scaled fee");
    Ok(scaled)
}
