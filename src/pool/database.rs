//! Database handles built from `DatabaseOptions`.
//!
//! # Responsibilities
//! - Validate per-name options and parse the DSN
//! - Hand out a `DatabasePool` handle per name
//! - Mark handles closed when the pool releases them
//!
//! # Design Decisions
//! - The handle only records where and how to connect; opening sockets is
//!   left to the driver that consumes it
//! - Credentials in the DSN never reach logs

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use url::Url;

use crate::config::schema::DatabaseOptions;
use crate::config::validation::validate_database_options;
use crate::pool::builder::{BuildError, ResourceBuilder};

/// Live handle for one named database.
pub struct DatabasePool {
    name: String,
    driver: String,
    endpoint: String,
    database: String,
    options: DatabaseOptions,
    closed: AtomicBool,
}

impl DatabasePool {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// DSN scheme, e.g. `mysql` or `postgres`.
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// `host:port` (or just `host` when no port is given).
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.options.connect_timeout_secs)
    }

    pub fn max_connection_lifetime(&self) -> Duration {
        Duration::from_secs(self.options.max_connection_lifetime_secs)
    }

    /// Prefix a table name with the configured table prefix.
    pub fn table(&self, name: &str) -> String {
        format!("{}{}", self.options.table_prefix, name)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for DatabasePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabasePool")
            .field("name", &self.name)
            .field("driver", &self.driver)
            .field("endpoint", &self.endpoint)
            .field("database", &self.database)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Builds `DatabasePool` handles.
#[derive(Debug, Default, Clone)]
pub struct DatabaseBuilder;

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResourceBuilder for DatabaseBuilder {
    type Options = DatabaseOptions;
    type Resource = DatabasePool;

    async fn build(&self, name: &str, options: &DatabaseOptions) -> Result<DatabasePool, BuildError> {
        validate_database_options(options).map_err(|errors| {
            BuildError::InvalidOptions(
                errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            )
        })?;

        let url = Url::parse(&options.dsn).map_err(|e| BuildError::InvalidOptions(e.to_string()))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| BuildError::InvalidOptions(format!("dsn '{}' has no host", redact_dsn(&url))))?;
        let endpoint = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let pool = DatabasePool {
            name: name.to_string(),
            driver: url.scheme().to_string(),
            endpoint,
            database: url.path().trim_start_matches('/').to_string(),
            options: options.clone(),
            closed: AtomicBool::new(false),
        };

        tracing::info!(
            name,
            dsn = %redact_dsn(&url),
            max_open = options.max_open_connections,
            max_idle = options.max_idle_connections,
            debug = options.debug,
            "Database pool ready"
        );
        Ok(pool)
    }

    async fn release(&self, name: &str, resource: Arc<DatabasePool>) {
        if resource.close() {
            tracing::info!(name, endpoint = %resource.endpoint(), "Database pool closed");
        }
    }
}

fn redact_dsn(url: &Url) -> String {
    let mut shown = url.clone();
    if shown.password().is_some() {
        let _ = shown.set_password(Some("***"));
    }
    shown.to_string()
}
