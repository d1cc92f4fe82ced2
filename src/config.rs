//! Configuration for the loader
//!
//! Tunable constants live at the top of this module. The environment-backed
//! [`Settings`] struct is resolved once at startup and passed by value into the
//! runner; nothing else in the crate reads the process environment.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

// ============================================================================
// Source Layout
// ============================================================================

/// Name of the schema registry document at the root of the source directory
pub const SCHEMAS_FILE_NAME: &str = "schemas.json";

/// Prefix shared by every partition file of a dataset (`part-00000`, ...)
pub const PARTITION_PREFIX: &str = "part-";

// ============================================================================
// Loading
// ============================================================================

/// Number of CSV rows read into memory and appended per chunk
pub const DEFAULT_CHUNK_ROWS: usize = 10_000;

/// Upper bound on datasets loaded concurrently
pub const MAX_WORKERS: usize = 8;

// ============================================================================
// Connection Pool Configuration
// ============================================================================

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(45);

pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for a single INSERT statement
///
/// Multi-row statements against tables with indexes can take a while; this only
/// guards against a statement hanging forever. Timeouts are not retried.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(180);

/// Maximum number of bind parameters PostgreSQL accepts in one statement
pub const POSTGRES_MAX_BIND_PARAMS: usize = 65_535;

/// SQLITE_MAX_VARIABLE_NUMBER of the bundled SQLite used by the test pool
#[cfg(test)]
pub const SQLITE_MAX_BIND_PARAMS: usize = 32_766;

// ============================================================================
// Environment Settings
// ============================================================================

pub const ENV_SRC_BASE_DIR: &str = "SRC_BASE_DIR";
pub const ENV_DB_HOST: &str = "DB_HOST";
pub const ENV_DB_PORT: &str = "DB_PORT";
pub const ENV_DB_USERNAME: &str = "DB_USERNAME";
pub const ENV_DB_PASSWORD: &str = "DB_PASSWORD";
pub const ENV_DB_NAME: &str = "DB_NAME";

/// Errors raised while resolving settings from the environment
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Required environment variable {0} is not set")]
    MissingVar(&'static str),

    #[error("Invalid value '{value}' for {var}: expected a port number between 1 and 65535")]
    InvalidPort { var: &'static str, value: String },

    #[error("Cannot build connection URI: {0}")]
    InvalidUri(String),
}

/// Database connection parameters
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl ConnectionSettings {
    /// Assemble `postgresql://{user}:{password}@{host}:{port}/{dbname}`
    ///
    /// User name and password are percent-encoded so credentials containing
    /// `@`, `:` or `/` survive the round trip through the URI parser.
    pub fn connection_uri(&self) -> Result<String, ConfigError> {
        Ok(self.build_url(Some(&self.password))?.to_string())
    }

    /// The connection URI with the password masked, for logs and console output
    pub fn redacted_uri(&self) -> String {
        match self.build_url(Some("*****")) {
            Ok(url) => url.to_string(),
            Err(_) => format!("postgresql://{}@{}:{}/{}", self.username, self.host, self.port, self.database),
        }
    }

    fn build_url(&self, password: Option<&str>) -> Result<Url, ConfigError> {
        // Bare IPv6 literals need brackets inside a URI authority
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        let mut url = Url::parse(&format!("postgresql://{host}"))
            .map_err(|e| ConfigError::InvalidUri(format!("invalid host '{}': {e}", self.host)))?;

        url.set_port(Some(self.port))
            .map_err(|_| ConfigError::InvalidUri("cannot set port".to_string()))?;
        url.set_username(&self.username)
            .map_err(|_| ConfigError::InvalidUri("cannot set username".to_string()))?;
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|_| ConfigError::InvalidUri("cannot set password".to_string()))?;
        }
        url.set_path(&format!("/{}", self.database));

        Ok(url)
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"*****")
            .field("database", &self.database)
            .finish()
    }
}

/// Everything the loader needs from the environment
#[derive(Debug, Clone)]
pub struct Settings {
    pub src_base_dir: PathBuf,
    pub connection: ConnectionSettings,
}

impl Settings {
    /// Resolve settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve settings through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingVar(name))
        };

        let src_base_dir = PathBuf::from(required(ENV_SRC_BASE_DIR)?);
        let host = required(ENV_DB_HOST)?;
        let port_raw = required(ENV_DB_PORT)?;
        let port = port_raw
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or(ConfigError::InvalidPort {
                var: ENV_DB_PORT,
                value: port_raw.clone(),
            })?;
        let username = required(ENV_DB_USERNAME)?;
        // An empty password is legitimate (trust auth), an unset one is not
        let password = lookup(ENV_DB_PASSWORD).ok_or(ConfigError::MissingVar(ENV_DB_PASSWORD))?;
        let database = required(ENV_DB_NAME)?;

        Ok(Self {
            src_base_dir,
            connection: ConnectionSettings {
                host,
                port,
                username,
                password,
                database,
            },
        })
    }
}
