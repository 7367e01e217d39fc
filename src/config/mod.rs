//! Configuration loading for the tenant provisioner.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `PROVISIONER_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "PROVISIONER_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `PROVISIONER_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Metadata store (control database) URL
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// Direct superuser connection to the engine. Must bypass the pooler.
    #[serde(default = "default_admin_database_url")]
    pub admin_database_url: String,
    #[serde(default = "default_admin_max_connections")]
    pub admin_max_connections: u32,
    /// Timeout applied to every store call, engine call, file operation and reload
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Attempts at the whole create flow when generated names collide
    #[serde(default = "default_create_max_attempts")]
    pub create_max_attempts: u32,
    /// Connection limit for tenants that do not ask for one
    #[serde(default = "default_tenant_max_connections")]
    pub default_tenant_max_connections: i32,
    #[serde(default = "default_hba_path")]
    pub hba_path: PathBuf,
    #[serde(default)]
    pub connection: ConnectionTemplateConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
}

/// Host and port values substituted into tenant connection strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ConnectionTemplateConfig {
    /// Public host clients use to reach the engine and pooler
    #[serde(default = "default_public_host")]
    pub public_host: String,
    /// Engine port (direct, unpooled sessions)
    #[serde(default = "default_direct_port")]
    pub direct_port: u16,
    /// Transaction pooler port
    #[serde(default = "default_pooled_port")]
    pub pooled_port: u16,
    /// libpq `sslmode` appended to every variant
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
}

impl Default for ConnectionTemplateConfig {
    fn default() -> Self {
        Self {
            public_host: default_public_host(),
            direct_port: default_direct_port(),
            pooled_port: default_pooled_port(),
            ssl_mode: default_ssl_mode(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            admin_database_url: default_admin_database_url(),
            admin_max_connections: default_admin_max_connections(),
            operation_timeout_ms: default_operation_timeout_ms(),
            create_max_attempts: default_create_max_attempts(),
            default_tenant_max_connections: default_tenant_max_connections(),
            hba_path: default_hba_path(),
            connection: ConnectionTemplateConfig::default(),
            operator_tokens: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Timeout applied to each external call.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Development profiles expose error chains in API responses.
    pub fn is_development(&self) -> bool {
        matches!(self.profile.as_str(), "local" | "dev" | "test")
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec![REDACTED.to_string()];
        }
        config.database_url = redact_url_password(&config.database_url);
        config.admin_database_url = redact_url_password(&config.admin_database_url);
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        if self.database_url.is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        if self.admin_database_url.is_empty() {
            return Err(ConfigError::MissingAdminDatabaseUrl);
        }

        // A pooled admin path would let DDL land on different backend sessions.
        if let Ok(url) = url::Url::parse(&self.admin_database_url)
            && (url.port() == Some(self.connection.pooled_port)
                || url.query_pairs().any(|(key, _)| key == "pgbouncer"))
        {
            return Err(ConfigError::PooledAdminConnection {
                port: self.connection.pooled_port,
            });
        }

        if self.operation_timeout_ms < 100 || self.operation_timeout_ms > 600_000 {
            return Err(ConfigError::InvalidOperationTimeout {
                value: self.operation_timeout_ms,
            });
        }

        if self.create_max_attempts == 0 || self.create_max_attempts > 10 {
            return Err(ConfigError::InvalidCreateMaxAttempts {
                value: self.create_max_attempts,
            });
        }

        if self.default_tenant_max_connections < 1 {
            return Err(ConfigError::InvalidTenantMaxConnections {
                value: self.default_tenant_max_connections,
            });
        }

        if self.hba_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingHbaPath);
        }

        Ok(())
    }
}

fn redact_url_password(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some(REDACTED));
            url.to_string()
        }
        Ok(_) => raw.to_string(),
        Err(_) => REDACTED.to_string(),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://provisioner@localhost:5432/provisioner".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_admin_database_url() -> String {
    "postgresql://postgres@localhost:5432/postgres".to_string()
}

fn default_admin_max_connections() -> u32 {
    4
}

fn default_operation_timeout_ms() -> u64 {
    15_000
}

fn default_create_max_attempts() -> u32 {
    3
}

fn default_tenant_max_connections() -> i32 {
    20
}

fn default_hba_path() -> PathBuf {
    PathBuf::from("/etc/postgresql/16/main/pg_hba.conf")
}

fn default_public_host() -> String {
    "localhost".to_string()
}

fn default_direct_port() -> u16 {
    5432
}

fn default_pooled_port() -> u16 {
    6432
}

fn default_ssl_mode() -> String {
    "require".to_string()
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error(
        "no operator tokens configured; set PROVISIONER_OPERATOR_TOKEN or PROVISIONER_OPERATOR_TOKENS"
    )]
    MissingOperatorTokens,
    #[error("metadata database URL is missing; set PROVISIONER_DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("admin database URL is missing; set PROVISIONER_ADMIN_DATABASE_URL")]
    MissingAdminDatabaseUrl,
    #[error("admin database URL must connect directly to the engine, not through the pooler on port {port}")]
    PooledAdminConnection { port: u16 },
    #[error("operation timeout must be between 100 and 600000 ms, got {value}")]
    InvalidOperationTimeout { value: u64 },
    #[error("create max attempts must be between 1 and 10, got {value}")]
    InvalidCreateMaxAttempts { value: u32 },
    #[error("default tenant max connections must be positive, got {value}")]
    InvalidTenantMaxConnections { value: i32 },
    #[error("access-control file path is empty; set PROVISIONER_HBA_PATH")]
    MissingHbaPath,
}

/// Loads configuration using layered `.env` files and `PROVISIONER_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads configuration: dotenv layers first, process environment last.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_string(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format = take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")?
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")?
            .unwrap_or_else(default_db_acquire_timeout_ms);
        let admin_database_url = take_string(&mut layered, "ADMIN_DATABASE_URL")
            .unwrap_or_else(default_admin_database_url);
        let admin_max_connections = take_parsed(&mut layered, "ADMIN_MAX_CONNECTIONS")?
            .unwrap_or_else(default_admin_max_connections);
        let operation_timeout_ms = take_parsed(&mut layered, "OPERATION_TIMEOUT_MS")?
            .unwrap_or_else(default_operation_timeout_ms);
        let create_max_attempts = take_parsed(&mut layered, "CREATE_MAX_ATTEMPTS")?
            .unwrap_or_else(default_create_max_attempts);
        let default_tenant_max_connections =
            take_parsed(&mut layered, "DEFAULT_TENANT_MAX_CONNECTIONS")?
                .unwrap_or_else(default_tenant_max_connections);
        let hba_path = take_string(&mut layered, "HBA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_hba_path);

        let connection = ConnectionTemplateConfig {
            public_host: take_string(&mut layered, "PUBLIC_HOST")
                .unwrap_or_else(default_public_host),
            direct_port: take_parsed(&mut layered, "DIRECT_PORT")?
                .unwrap_or_else(default_direct_port),
            pooled_port: take_parsed(&mut layered, "POOLED_PORT")?
                .unwrap_or_else(default_pooled_port),
            ssl_mode: take_string(&mut layered, "SSL_MODE").unwrap_or_else(default_ssl_mode),
        };

        // Support both single token and comma-separated list
        let operator_tokens = if let Some(tokens) = layered.remove("OPERATOR_TOKENS") {
            tokens
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else if let Some(token) = take_string(&mut layered, "OPERATOR_TOKEN") {
            vec![token]
        } else {
            Vec::new()
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            admin_database_url,
            admin_max_connections,
            operation_timeout_ms,
            create_max_attempts,
            default_tenant_max_connections,
            hba_path,
            connection,
            operator_tokens,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("PROVISIONER_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered.remove(key).filter(|v| !v.is_empty())
}

fn take_parsed<T: std::str::FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match take_string(layered, key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(None),
    }
}
