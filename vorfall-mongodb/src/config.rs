//! Store configuration.

use std::time::Duration;

use vorfall_core::projection::ProjectionDefinition;

/// Default logical database name.
pub const DEFAULT_DATABASE_NAME: &str = "default";

/// Default connection-attempt limit.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base retry delay; multiplied by the attempt count for linear
/// backoff.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Configuration for [`EventStore::connect`](crate::EventStore::connect).
///
/// Only the connection string is required; everything else defaults:
///
/// ```
/// use vorfall_mongodb::StoreConfig;
///
/// let config = StoreConfig::new("mongodb://localhost:27017");
/// assert_eq!(config.database_name, "default");
/// assert_eq!(config.max_retries, 3);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Backend URI.
    pub connection_string: String,
    /// Logical database holding the stream collections.
    pub database_name: String,
    /// Projection definitions, captured at store construction.
    pub projections: Vec<ProjectionDefinition>,
    /// Connection-attempt limit for [`EventStore::connect`].
    ///
    /// [`EventStore::connect`]: crate::EventStore::connect
    pub max_retries: u32,
    /// Base delay between connection attempts.
    pub retry_delay: Duration,
}

impl StoreConfig {
    /// Configuration with defaults for everything but the connection string.
    #[must_use]
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            database_name: DEFAULT_DATABASE_NAME.to_owned(),
            projections: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Use a different logical database.
    #[must_use]
    pub fn database_name(mut self, database_name: impl Into<String>) -> Self {
        self.database_name = database_name.into();
        self
    }

    /// Register the projections maintained by the store.
    #[must_use]
    pub fn projections(mut self, projections: Vec<ProjectionDefinition>) -> Self {
        self.projections = projections;
        self
    }

    /// Limit connection attempts.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Base delay between connection attempts.
    #[must_use]
    pub const fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}
