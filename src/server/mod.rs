mod admin_key;
mod cleanup;
mod server;

pub use admin_key::*;
pub use cleanup::*;
pub use server::*;
