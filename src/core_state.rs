//! Shared application state for the HTTP surface and the seed pipeline.
//!
//! `CoreState` is wrapped in `Arc` at startup. Connections, sinks and
//! geocoders are created per request inside `spawn_blocking`, because
//! `rusqlite::Connection` is not `Sync` and the blocking HTTP clients must
//! not be built or dropped on the async runtime.

use std::sync::Arc;

use rusqlite::Connection;

use crate::config::{SeedConfig, SinkConfig};
use crate::db::{self, DatabaseError};
use crate::seed::geocode::{GeocodeError, Geocoder, NominatimGeocoder};
use crate::seed::insert::{BusinessSink, SinkError, SqliteSink};
use crate::seed::rest_sink::RestSink;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
    #[error("Geocoder error: {0}")]
    Geocode(#[from] GeocodeError),
}

pub struct CoreState {
    pub config: SeedConfig,
    /// Replaces the configured geocoder (tests, offline runs).
    geocoder_override: Option<Arc<dyn Geocoder>>,
}

impl CoreState {
    pub fn new(config: SeedConfig) -> Self {
        Self {
            config,
            geocoder_override: None,
        }
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder_override = Some(geocoder);
        self
    }

    /// Open the local database (catalog, geocode cache and the sqlite sink).
    pub fn open_db(&self) -> Result<Connection, CoreError> {
        Ok(db::open_database(&self.config.db_path)?)
    }

    /// Build the configured sink. The sqlite sink borrows `conn`.
    pub fn sink<'a>(&self, conn: &'a Connection) -> Result<Box<dyn BusinessSink + 'a>, CoreError> {
        match &self.config.sink {
            SinkConfig::Sqlite => Ok(Box::new(SqliteSink::new(conn))),
            SinkConfig::Rest(settings) => Ok(Box::new(RestSink::new(settings)?)),
        }
    }

    /// Geocoder for this run, or `None` when geocoding is switched off.
    pub fn geocoder(&self) -> Result<Option<Arc<dyn Geocoder>>, CoreError> {
        if let Some(geocoder) = &self.geocoder_override {
            return Ok(Some(geocoder.clone()));
        }
        if !self.config.geocoder_enabled {
            return Ok(None);
        }
        let geocoder = NominatimGeocoder::new(&self.config.pipeline.geocode)?;
        Ok(Some(Arc::new(geocoder)))
    }
}
