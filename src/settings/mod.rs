//! Settings are read from a TOML file and `APP_*` environment overrides, then
//! validated before anything else starts.

mod cli;
pub use clap::Parser;
pub use cli::*;

mod settings;
pub use settings::*;
