use std::fmt;
use std::path::PathBuf;

use crate::error::{IntegrationError, Result};

pub const DEFAULT_SQL_DIR: &str = "sql_int";
pub const DEFAULT_TARGET_SCHEMA: &str = "analitycs";

pub const SQL_DIR_VAR: &str = "BRANCHFLOW_SQL_DIR";
pub const TARGET_SCHEMA_VAR: &str = "BRANCHFLOW_TARGET_SCHEMA";

/// The three databases the job talks to, keyed by their environment prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceSystem {
    /// Greenplum warehouse.
    Warehouse,
    /// ClickHouse analytics store.
    Analytics,
    /// Operational reporting store; also the load destination.
    Reporting,
}

impl SourceSystem {
    pub const ALL: [SourceSystem; 3] = [
        SourceSystem::Warehouse,
        SourceSystem::Analytics,
        SourceSystem::Reporting,
    ];

    pub fn env_prefix(self) -> &'static str {
        match self {
            SourceSystem::Warehouse => "GP",
            SourceSystem::Analytics => "CH",
            SourceSystem::Reporting => "ORP",
        }
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceSystem::Warehouse => "warehouse",
            SourceSystem::Analytics => "analytics",
            SourceSystem::Reporting => "reporting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Postgres,
    ClickHouse,
}

impl Engine {
    /// Interprets a SQLAlchemy-style driver string such as `postgresql+psycopg2`
    /// or `clickhouse+native`; only the dialect before `+` matters.
    pub fn from_driver(driver: &str) -> Result<Self> {
        let dialect = driver
            .split('+')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match dialect.as_str() {
            "postgresql" | "postgres" | "greenplum" => Ok(Engine::Postgres),
            "clickhouse" => Ok(Engine::ClickHouse),
            _ => Err(IntegrationError::Configuration(format!(
                "unsupported driver '{driver}'"
            ))),
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Engine::Postgres => 5432,
            Engine::ClickHouse => 8123,
        }
    }
}

#[derive(Clone)]
pub struct ConnectionDescriptor {
    pub driver: String,
    pub login: String,
    pub password: String,
    pub host: String,
    pub database: String,
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("driver", &self.driver)
            .field("login", &self.login)
            .field("password", &"***")
            .field("host", &self.host)
            .field("database", &self.database)
            .finish()
    }
}

impl ConnectionDescriptor {
    /// Reads `<PREFIX>_DRIVER`, `_LOGIN`, `_PASSWORD`, `_HOST` and `_DATABASE`.
    pub fn from_lookup<F>(prefix: &str, lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |field: &str| -> Result<String> {
            let key = format!("{prefix}_{field}");
            match lookup(&key) {
                Some(value) if !value.trim().is_empty() => Ok(value),
                _ => Err(IntegrationError::Configuration(format!(
                    "{key} must be set"
                ))),
            }
        };

        let descriptor = Self {
            driver: required("DRIVER")?,
            login: required("LOGIN")?,
            password: lookup(&format!("{prefix}_PASSWORD")).unwrap_or_default(),
            host: required("HOST")?,
            database: required("DATABASE")?,
        };
        descriptor.engine()?;
        descriptor.host_and_port()?;
        Ok(descriptor)
    }

    pub fn engine(&self) -> Result<Engine> {
        Engine::from_driver(&self.driver)
    }

    /// Splits `host[:port]` or `[ipv6][:port]`, falling back to the engine's
    /// default port. A bare IPv6 address carries no port.
    pub fn host_and_port(&self) -> Result<(String, u16)> {
        let engine = self.engine()?;
        let raw = self.host.trim();
        let unparsable = || IntegrationError::Configuration(format!("unparsable host '{raw}'"));
        let parse_port = |port: &str| {
            port.parse::<u16>().map_err(|_| {
                IntegrationError::Configuration(format!("unparsable port in host '{raw}'"))
            })
        };

        let (host, port) = if let Some(bracketed) = raw.strip_prefix('[') {
            let (host, rest) = bracketed.split_once(']').ok_or_else(unparsable)?;
            let port = match rest {
                "" => engine.default_port(),
                _ => parse_port(rest.strip_prefix(':').ok_or_else(unparsable)?)?,
            };
            (host, port)
        } else if raw.matches(':').count() > 1 {
            (raw, engine.default_port())
        } else {
            match raw.rsplit_once(':') {
                Some((host, port)) => (host, parse_port(port)?),
                None => (raw, engine.default_port()),
            }
        };

        if host.is_empty() || host.contains(['/', '@', ' ', '[', ']']) {
            return Err(unparsable());
        }

        Ok((host.to_string(), port))
    }
}

/// Everything a run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct IntegrationConfig {
    pub warehouse: ConnectionDescriptor,
    pub analytics: ConnectionDescriptor,
    pub reporting: ConnectionDescriptor,
    pub sql_dir: PathBuf,
    pub target_schema: String,
}

impl IntegrationConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let descriptor =
            |system: SourceSystem| ConnectionDescriptor::from_lookup(system.env_prefix(), &lookup);

        Ok(Self {
            warehouse: descriptor(SourceSystem::Warehouse)?,
            analytics: descriptor(SourceSystem::Analytics)?,
            reporting: descriptor(SourceSystem::Reporting)?,
            sql_dir: lookup(SQL_DIR_VAR)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SQL_DIR)),
            target_schema: lookup(TARGET_SCHEMA_VAR)
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_TARGET_SCHEMA.to_string()),
        })
    }

    pub fn descriptor(&self, system: SourceSystem) -> &ConnectionDescriptor {
        match system {
            SourceSystem::Warehouse => &self.warehouse,
            SourceSystem::Analytics => &self.analytics,
            SourceSystem::Reporting => &self.reporting,
        }
    }
}
