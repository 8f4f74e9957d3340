pub mod api;
pub mod logger;
pub mod metrics;
pub mod settings;

pub mod server;

pub mod application_impl;
pub mod application_port;
pub mod domain_model;
pub mod domain_port;
pub mod infra_fake;
pub mod infra_mysql;
pub mod rate_limit;
pub mod resilience;
