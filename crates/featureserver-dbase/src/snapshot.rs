//! Swappable database snapshot
//!
//! Request handlers clone the current `Arc<Database>` and keep it for the
//! duration of a read; reconfiguration installs a new snapshot without
//! disturbing reads already in flight.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use featureserver_common::error::{Error, Result};

use crate::facade::Database;

enum State {
    Ready(Arc<Database>),
    Invalid(String),
}

struct Versioned {
    version: u64,
    state: State,
}

/// Shared handle on the current database snapshot
pub struct DatabaseHandle {
    inner: RwLock<Versioned>,
}

impl DatabaseHandle {
    pub fn new(database: Database) -> Self {
        Self {
            inner: RwLock::new(Versioned {
                version: 1,
                state: State::Ready(Arc::new(database)),
            }),
        }
    }

    /// Handle that reports `message` until a database is installed
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(Versioned {
                version: 1,
                state: State::Invalid(message.into()),
            }),
        }
    }

    pub fn current(&self) -> Result<Arc<Database>> {
        match &self.inner.read().state {
            State::Ready(database) => Ok(database.clone()),
            State::Invalid(message) => Err(Error::ConfigError(message.clone())),
        }
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.inner.read().state, State::Ready(_))
    }

    /// Replace the snapshot; returns the new version
    pub fn install(&self, database: Database) -> u64 {
        let database = Arc::new(database);
        let mut inner = self.inner.write();
        inner.version += 1;
        inner.state = State::Ready(database);
        info!("Installed catalog version {}", inner.version);
        inner.version
    }

    /// Put the handle in the invalid state; returns the new version
    pub fn invalidate(&self, message: impl Into<String>) -> u64 {
        let message = message.into();
        let mut inner = self.inner.write();
        inner.version += 1;
        warn!(
            "Catalog version {} is invalid: {}",
            inner.version, message
        );
        inner.state = State::Invalid(message);
        inner.version
    }
}
