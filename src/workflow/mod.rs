pub mod district_attempt;
pub mod district_ctx;

pub use district_attempt::{AttemptTerminal, DistrictQueryAttempt, RetryPolicy};
pub use district_ctx::DistrictCtx;
