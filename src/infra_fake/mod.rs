//! In-memory stores: the `fake` storage backend, and the stores used by the
//! test suites.

mod refresh_token_store_fake;
mod revoked_token_store_fake;
mod user_repo_fake;

pub use refresh_token_store_fake::*;
pub use revoked_token_store_fake::*;
pub use user_repo_fake::*;
