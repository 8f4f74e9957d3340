mod pool;
mod refresh_token_store_mysql;
mod revoked_token_store_mysql;
mod user_repo_mysql;

pub use pool::*;
pub use refresh_token_store_mysql::MySqlRefreshTokenStore;
pub use revoked_token_store_mysql::*;
pub use user_repo_mysql::*;

mod util;
