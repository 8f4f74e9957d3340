use anyhow::{Result, anyhow, bail};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub http: Http,
    pub log: Log,
    pub storage: Storage,
    pub jwt: Jwt,
    pub auth: Auth,
    #[serde(default)]
    pub resilience: Resilience,
    #[serde(default)]
    pub cleanup: Cleanup,
    #[serde(default)]
    pub rate_limit: RateLimit,
}

#[derive(Debug, Deserialize)]
pub struct Http {
    pub address: String,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    #[serde(default)]
    pub trust_forwarded_for: bool,
    #[serde(default = "default_drain_secs")]
    pub drain_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fake,
    Mysql,
}

#[derive(Deserialize)]
pub struct Storage {
    pub backend: StorageBackend,
    #[serde(default)]
    pub dsn: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,
}

#[derive(Deserialize)]
pub struct Jwt {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    #[serde(default = "default_access_ttl_secs")]
    pub access_ttl_secs: i64,
}

#[derive(Deserialize)]
pub struct Auth {
    #[serde(default = "default_refresh_ttl_secs")]
    pub refresh_ttl_secs: i64,
    #[serde(default = "default_max_refresh_tokens_per_user")]
    pub max_refresh_tokens_per_user: u64,
    #[serde(default = "default_username_min")]
    pub username_min: usize,
    #[serde(default = "default_username_max")]
    pub username_max: usize,
    #[serde(default = "default_password_min")]
    pub password_min: usize,
    #[serde(default = "default_password_max")]
    pub password_max: usize,
    #[serde(default)]
    pub enforce_revocation_cutoff: bool,
    pub admin_key: String,
    pub refresh_pepper: String,
    #[serde(default = "default_argon2_memory_kib")]
    pub argon2_memory_kib: u32,
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Resilience {
    pub breaker_threshold: u32,
    pub breaker_timeout_ms: u64,
    pub breaker_reset_after_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_multiplier: f64,
}

impl Default for Resilience {
    fn default() -> Self {
        Resilience {
            breaker_threshold: 5,
            breaker_timeout_ms: 10_000,
            breaker_reset_after_ms: 30_000,
            retry_max_attempts: 3,
            retry_initial_delay_ms: 100,
            retry_max_delay_ms: 2_000,
            retry_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Cleanup {
    pub interval_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for Cleanup {
    fn default() -> Self {
        Cleanup {
            interval_secs: 3_600,
            shutdown_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct Limit {
    pub per_second: u32,
    pub burst: u32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    pub login: Limit,
    pub register: Limit,
    pub refresh: Limit,
    pub logout: Limit,
    pub revoke: Limit,
    pub default: Limit,
}

impl Default for RateLimit {
    fn default() -> Self {
        let l = |per_second, burst| Limit { per_second, burst };
        RateLimit {
            login: l(3, 3),
            register: l(2, 1),
            refresh: l(1, 3),
            logout: l(1, 2),
            revoke: l(1, 2),
            default: l(10, 20),
        }
    }
}

// Secrets stay out of `{:?}` output; the settings are logged at startup.
macro_rules! redacted_debug {
    ($ty:ident { $($field:ident),* } redact { $($secret:ident),* }) => {
        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($ty))
                    $(.field(stringify!($field), &self.$field))*
                    $(.field(stringify!($secret), &"<redacted>"))*
                    .finish()
            }
        }
    };
}

redacted_debug!(Storage {
    backend, max_connections, min_connections, acquire_timeout_secs, idle_timeout_secs,
    max_lifetime_secs, connect_attempts, connect_retry_delay_ms, query_timeout_ms,
    close_timeout_secs
} redact { dsn });

redacted_debug!(Jwt { issuer, audience, access_ttl_secs } redact { secret });

redacted_debug!(Auth {
    refresh_ttl_secs, max_refresh_tokens_per_user, username_min, username_max,
    password_min, password_max, enforce_revocation_cutoff, argon2_memory_kib,
    argon2_iterations, argon2_parallelism
} redact { admin_key, refresh_pepper });

fn default_drain_secs() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    2
}
fn default_acquire_timeout_secs() -> u64 {
    5
}
fn default_idle_timeout_secs() -> u64 {
    600
}
fn default_max_lifetime_secs() -> u64 {
    1_800
}
fn default_connect_attempts() -> u32 {
    10
}
fn default_connect_retry_delay_ms() -> u64 {
    2_000
}
fn default_query_timeout_ms() -> u64 {
    3_000
}
fn default_close_timeout_secs() -> u64 {
    10
}
fn default_access_ttl_secs() -> i64 {
    15 * 60
}
fn default_refresh_ttl_secs() -> i64 {
    7 * 24 * 60 * 60
}
fn default_max_refresh_tokens_per_user() -> u64 {
    5
}
fn default_username_min() -> usize {
    3
}
fn default_username_max() -> usize {
    32
}
fn default_password_min() -> usize {
    8
}
fn default_password_max() -> usize {
    128
}
fn default_argon2_memory_kib() -> u32 {
    19 * 1024
}
fn default_argon2_iterations() -> u32 {
    2
}
fn default_argon2_parallelism() -> u32 {
    1
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.jwt.secret.len() < 32 {
            bail!("jwt.secret must be at least 32 bytes");
        }
        if self.jwt.access_ttl_secs <= 0 || self.auth.refresh_ttl_secs <= 0 {
            bail!("token TTLs must be positive");
        }
        if self.auth.max_refresh_tokens_per_user == 0 {
            bail!("auth.max_refresh_tokens_per_user must be at least 1");
        }
        if self.auth.username_min == 0 || self.auth.username_min > self.auth.username_max {
            bail!("auth.username_min/username_max are inconsistent");
        }
        if self.auth.password_min == 0 || self.auth.password_min > self.auth.password_max {
            bail!("auth.password_min/password_max are inconsistent");
        }
        if self.auth.admin_key.is_empty() {
            bail!("auth.admin_key must not be empty");
        }
        if self.auth.refresh_pepper.len() < 16 {
            bail!("auth.refresh_pepper must be at least 16 bytes");
        }
        if self.storage.backend == StorageBackend::Mysql && self.storage.dsn.is_empty() {
            bail!("storage.dsn is required for the mysql backend");
        }
        if self.http.cert_path.is_some() != self.http.key_path.is_some() {
            bail!("http.cert_path and http.key_path must be set together");
        }
        if self.resilience.breaker_threshold == 0 || self.resilience.retry_max_attempts == 0 {
            bail!("resilience thresholds must be at least 1");
        }
        if self.resilience.retry_multiplier < 1.0 {
            bail!("resilience.retry_multiplier must be >= 1.0");
        }
        if self.cleanup.interval_secs == 0 {
            bail!("cleanup.interval_secs must be positive");
        }
        Ok(())
    }
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

/// Loads the TOML file, then applies `APP_<SECTION>__<KEY>` overrides.
pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    settings.validate()?;
    Ok(settings)
}

/// Same as [`parse_settings`] for an in-memory TOML document, without
/// environment overrides.
pub fn parse_settings_str(toml: &str) -> Result<Settings> {
    let settings: Settings = Config::builder()
        .add_source(File::from_str(toml, FileFormat::Toml))
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[http]
address = "127.0.0.1:8080"

[log]
filter = "info"

[storage]
backend = "fake"

[jwt]
secret = "0123456789abcdef0123456789abcdef"
issuer = "tokenkeeper"
audience = "tokenkeeper-clients"

[auth]
admin_key = "admin"
refresh_pepper = "pepper-pepper-pepper"
"#;

    fn load(toml: &str) -> Result<Settings> {
        parse_settings_str(toml)
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let s = load(MINIMAL).unwrap();
        assert_eq!(s.storage.backend, StorageBackend::Fake);
        assert_eq!(s.jwt.access_ttl_secs, 900);
        assert_eq!(s.auth.max_refresh_tokens_per_user, 5);
        assert_eq!(s.rate_limit.login.per_second, 3);
        assert_eq!(s.rate_limit.register.burst, 1);
        assert_eq!(s.cleanup.interval_secs, 3_600);
        assert!(!s.auth.enforce_revocation_cutoff);
    }

    #[test]
    fn short_secret_is_rejected() {
        let toml = MINIMAL.replace("0123456789abcdef0123456789abcdef", "short");
        let err = load(&toml).unwrap_err();
        assert!(err.to_string().contains("jwt.secret"));
    }

    #[test]
    fn mysql_backend_requires_dsn() {
        let toml = MINIMAL.replace("backend = \"fake\"", "backend = \"mysql\"");
        assert!(load(&toml).is_err());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let s = load(MINIMAL).unwrap();
        let dump = format!("{s:?}");
        assert!(!dump.contains("0123456789abcdef"));
        assert!(!dump.contains("pepper-pepper"));
        assert!(dump.contains("<redacted>"));
    }
}
