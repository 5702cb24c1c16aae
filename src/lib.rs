//! Feature Server
//!
//! Read-only REST access to the tables and views of a PostgreSQL/PostGIS
//! schema. Tables are selected with include/exclude glob rules and served
//! as JSON features or CSV, with bounding-box and CQL filtering, sorting,
//! pagination and column selection.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub use featureserver_common as common;
pub use featureserver_dbase as dbase;
pub use featureserver_rest as rest;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use featureserver_common::config::FeatureServerConfig;
use featureserver_common::error::Result;
use featureserver_dbase::{Database, DatabaseHandle, PgStore};
use featureserver_rest::RestServer;

/// Build the catalog for `config` against PostgreSQL
///
/// # Errors
/// Returns an error if the database is unreachable or cannot be introspected.
pub async fn open_database(config: &FeatureServerConfig) -> Result<Database> {
    let store = PgStore::connect(&config.database).await?;
    Database::discover(Arc::new(store), &config.mapping).await
}

/// Main feature server
pub struct FeatureServer {
    config_path: Option<PathBuf>,
    config: RwLock<FeatureServerConfig>,
    database: Arc<DatabaseHandle>,
    rest_server: RestServer,
}

impl FeatureServer {
    /// Create a server for `config`. A database that cannot be opened leaves
    /// the server running in the invalid state until the next reconfiguration.
    pub async fn new(config: FeatureServerConfig) -> Self {
        let database = match open_database(&config).await {
            Ok(database) => DatabaseHandle::new(database),
            Err(e) => {
                warn!("Starting without a catalog: {}", e);
                DatabaseHandle::invalid(e.to_string())
            }
        };
        Self::with_handle(config, Arc::new(database))
    }

    /// Load `path` and create the server; the file is re-read on reconfiguration
    ///
    /// # Errors
    /// Returns an error if the configuration file is unreadable or invalid.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let config = FeatureServerConfig::load(path)?;
        info!("Loaded configuration from {}", path.display());
        let mut server = Self::new(config).await;
        server.config_path = Some(path.to_path_buf());
        Ok(server)
    }

    /// Create a server around an existing database handle
    pub fn with_handle(config: FeatureServerConfig, database: Arc<DatabaseHandle>) -> Self {
        let rest_server = RestServer::new(&config.server, database.clone());
        Self {
            config_path: None,
            config: RwLock::new(config),
            database,
            rest_server,
        }
    }

    #[must_use]
    pub fn database(&self) -> Arc<DatabaseHandle> {
        self.database.clone()
    }

    #[must_use]
    pub fn config(&self) -> FeatureServerConfig {
        self.config.read().clone()
    }

    /// Re-read the configuration and rebuild the catalog. On failure the
    /// handle is put in the invalid state and the error is returned.
    ///
    /// # Errors
    /// Returns the configuration or database error that invalidated the catalog.
    pub async fn reconfigure(&self) -> Result<u64> {
        info!("Reconfiguring feature server");
        let config = match &self.config_path {
            Some(path) => FeatureServerConfig::load(path),
            None => Ok(self.config()),
        };
        let config = match config {
            Ok(config) => config,
            Err(e) => {
                self.database.invalidate(e.to_string());
                return Err(e);
            }
        };

        match open_database(&config).await {
            Ok(database) => {
                if config.server.port != self.config.read().server.port {
                    warn!("Server settings change only on restart");
                }
                *self.config.write() = config;
                Ok(self.database.install(database))
            }
            Err(e) => {
                self.database.invalidate(e.to_string());
                Err(e)
            }
        }
    }

    /// Serve HTTP requests until the server stops
    ///
    /// # Errors
    /// Returns an error if the listener cannot be bound.
    pub async fn run(&self) -> Result<()> {
        self.rest_server.run().await
    }

    /// Shutdown gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down feature server (catalog version {})", self.database.version());
    }
}
