//! Fee estimation and fee-token scaling

pub mod estimator;
pub mod scaler;

pub use estimator::{
    apply_percent_increase, apply_safety_factor, FeeConfig, FeeEstimator, RetryableGasParams,
    RetryableRequest,
};
pub use scaler::{scale_fee_amount, scale_to_native_token_decimals};
