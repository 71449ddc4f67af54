use thiserror::Error;

use crate::store::DataStoreConfig;

pub const DEFAULT_UNIT_ID: u8 = 1;
pub const DEFAULT_MAX_CONNECTIONS: usize = 8;
pub const MIN_UNIT_ID: u8 = 1;
pub const MAX_UNIT_ID: u8 = 247;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unit id {0} is outside 1..=247")]
    UnitIdOutOfRange(u8),
    #[error("max_connections must be at least 1")]
    NoConnections,
}

/// Server identity, bank sizes and connection limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ServerConfig {
    pub unit_id: u8,
    pub store: DataStoreConfig,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            unit_id: DEFAULT_UNIT_ID,
            store: DataStoreConfig::default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl ServerConfig {
    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn with_store(mut self, store: DataStoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_UNIT_ID..=MAX_UNIT_ID).contains(&self.unit_id) {
            return Err(ConfigError::UnitIdOutOfRange(self.unit_id));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::NoConnections);
        }
        Ok(())
    }
}
