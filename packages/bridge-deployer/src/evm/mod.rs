//! Parent and child chain access
//!
//! - `client` - the [`ChainClient`] seam and its alloy provider implementation
//! - `contracts` - contract bindings using the alloy `sol!` macro
//! - `tokens` - fee token probing and ERC20 balance/allowance helpers

pub mod client;
pub mod contracts;
pub mod tokens;

pub use client::{connect_readonly, connect_with_signer, AlloyChainClient, ChainClient, TxReceipt};
