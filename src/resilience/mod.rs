//! Protection for calls into the database: a circuit breaker around a
//! retry loop around a per-query timeout.

mod circuit_breaker;
mod guard;
mod retry;

pub use circuit_breaker::*;
pub use guard::*;
pub use retry::*;
