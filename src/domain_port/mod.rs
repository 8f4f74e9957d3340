mod store_error;
pub use store_error::*;

// store

mod refresh_token_store;
mod revoked_token_store;
mod user_repo;

pub use refresh_token_store::*;
pub use revoked_token_store::*;
pub use user_repo::*;

mod repo_tx;

pub use repo_tx::*;
