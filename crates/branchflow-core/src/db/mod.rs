use std::fmt;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};
use tracing::info;

use crate::config::{ConnectionDescriptor, Engine, IntegrationConfig, SourceSystem};
use crate::error::{IntegrationError, QueryError, Result};

pub type DbPool = Pool<Postgres>;

/// A live handle to one of the source databases.
#[derive(Clone)]
pub enum SourceConnection {
    Postgres(DbPool),
    ClickHouse(clickhouse::Client),
}

impl SourceConnection {
    pub fn engine(&self) -> Engine {
        match self {
            SourceConnection::Postgres(_) => Engine::Postgres,
            SourceConnection::ClickHouse(_) => Engine::ClickHouse,
        }
    }
}

impl fmt::Debug for SourceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SourceConnection")
            .field(&self.engine())
            .finish()
    }
}

/// The three handles of a run. The reporting store doubles as the watermark
/// source and load destination, so it is always Postgres.
pub struct Connections {
    pub warehouse: SourceConnection,
    pub analytics: SourceConnection,
    pub reporting: DbPool,
}

impl Connections {
    pub async fn open(config: &IntegrationConfig) -> Result<Self> {
        let warehouse = connect(SourceSystem::Warehouse, &config.warehouse).await?;
        let analytics = connect(SourceSystem::Analytics, &config.analytics).await?;
        let reporting = match connect(SourceSystem::Reporting, &config.reporting).await? {
            SourceConnection::Postgres(pool) => pool,
            SourceConnection::ClickHouse(_) => {
                return Err(IntegrationError::Configuration(
                    "the reporting store must use a Postgres driver".into(),
                ))
            }
        };

        Ok(Self {
            warehouse,
            analytics,
            reporting,
        })
    }

    pub fn source(&self, system: SourceSystem) -> SourceConnection {
        match system {
            SourceSystem::Warehouse => self.warehouse.clone(),
            SourceSystem::Analytics => self.analytics.clone(),
            SourceSystem::Reporting => SourceConnection::Postgres(self.reporting.clone()),
        }
    }
}

/// Establish a connection for `descriptor`. Connections are opened eagerly so
/// that bad credentials fail the run before any extract starts.
pub async fn connect(
    system: SourceSystem,
    descriptor: &ConnectionDescriptor,
) -> Result<SourceConnection> {
    let (host, port) = descriptor.host_and_port()?;
    let connection_error = |source: QueryError| IntegrationError::Connection {
        system: system.to_string(),
        source,
    };

    let connection = match descriptor.engine()? {
        Engine::Postgres => {
            let options = PgConnectOptions::new()
                .host(&host)
                .port(port)
                .username(&descriptor.login)
                .password(&descriptor.password)
                .database(&descriptor.database);
            let pool = pool_options()
                .connect_with(options)
                .await
                .map_err(|err| connection_error(err.into()))?;
            SourceConnection::Postgres(pool)
        }
        Engine::ClickHouse => {
            let client = clickhouse::Client::default()
                .with_url(http_url(&host, port))
                .with_user(&descriptor.login)
                .with_password(&descriptor.password)
                .with_database(&descriptor.database)
                .with_option("output_format_json_quote_64bit_integers", "0");
            client
                .query("SELECT 1")
                .fetch_one::<u8>()
                .await
                .map_err(|err| connection_error(err.into()))?;
            SourceConnection::ClickHouse(client)
        }
    };

    info!(%system, host = %host, port, database = %descriptor.database, "Connected");
    Ok(connection)
}

fn http_url(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("http://[{host}]:{port}")
    } else {
        format!("http://{host}:{port}")
    }
}

/// Connect straight from a URL; used by tooling and database tests.
pub async fn connect_url(database_url: &str) -> Result<DbPool> {
    pool_options()
        .connect(database_url)
        .await
        .map_err(|err| IntegrationError::Connection {
            system: SourceSystem::Reporting.to_string(),
            source: err.into(),
        })
}

fn pool_options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(30))
}
