//! Database settings, loaded from the environment.
//!
//! | Variable             | Default              |
//! |----------------------|----------------------|
//! | `DB_HOST`            | `localhost`          |
//! | `DB_PORT`            | `5432`               |
//! | `DB_NAME`            | `bd1_banco`          |
//! | `DB_USER`            | `shibasito_user`     |
//! | `DB_PASS`            | `shibasito_password` |
//! | `DB_MAX_CONNECTIONS` | `5`                  |
//! | `MYSQL_HOST`         | `localhost`          |
//! | `MYSQL_PORT`         | `3306`               |
//! | `MYSQL_USER`         | `shibasito_user`     |
//! | `MYSQL_PASSWORD`     | `shibasito_password` |
//! | `MYSQL_DATABASE`     | `bd2_reniec`         |

use broker_rpc_core::config::{ConfigError, EnvSource};
use std::time::Duration;

const DEFAULT_USER: &str = "shibasito_user";
const DEFAULT_PASSWORD: &str = "shibasito_password";

/// How long a session waits for a pooled connection before treating the
/// database as unreachable.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// PostgreSQL connection settings of the bank service.
#[derive(Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Login role.
    pub user: String,
    /// Password of `user`.
    pub password: String,
    /// Pool size.
    pub max_connections: u32,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "bd1_banco".to_string(),
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            max_connections: 5,
        }
    }
}

impl PostgresConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a numeric variable is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&EnvSource::process())
    }

    /// Load from an explicit source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a numeric variable is invalid or the pool
    /// size is zero.
    pub fn from_source(env: &EnvSource) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            host: env.string_or("DB_HOST", &defaults.host),
            port: env.parse_or("DB_PORT", defaults.port)?,
            database: env.string_or("DB_NAME", &defaults.database),
            user: env.string_or("DB_USER", &defaults.user),
            password: env.string_or("DB_PASS", &defaults.password),
            max_connections: env.parse_or("DB_MAX_CONNECTIONS", defaults.max_connections)?,
        };
        if config.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "DB_MAX_CONNECTIONS must be > 0".to_string(),
            ));
        }
        Ok(config)
    }

    /// Set the host and port.
    #[must_use]
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Set the login.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

/// MySQL connection settings of the identity registry.
#[derive(Clone, PartialEq, Eq)]
pub struct MySqlConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Password of `user`.
    pub password: String,
    /// Database name.
    pub database: String,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            database: "bd2_reniec".to_string(),
        }
    }
}

impl MySqlConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `MYSQL_PORT` is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&EnvSource::process())
    }

    /// Load from an explicit source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `MYSQL_PORT` is invalid.
    pub fn from_source(env: &EnvSource) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: env.string_or("MYSQL_HOST", &defaults.host),
            port: env.parse_or("MYSQL_PORT", defaults.port)?,
            user: env.string_or("MYSQL_USER", &defaults.user),
            password: env.string_or("MYSQL_PASSWORD", &defaults.password),
            database: env.string_or("MYSQL_DATABASE", &defaults.database),
        })
    }
}

impl std::fmt::Debug for MySqlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}
