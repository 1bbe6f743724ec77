//! Metadata store factory
//!
//! Creates the MetaStore implementation named by a configuration or URL

use std::path::Path;
use std::sync::Arc;

use crate::meta::config::{Config, DatabaseType};
use crate::meta::store::{MetaError, MetaStore};
use crate::meta::stores::DatabaseMetaStore;

/// Factory for creating MetaStore instances
pub struct MetaStoreFactory;

impl MetaStoreFactory {
    /// Create MetaStore from path
    pub async fn create_from_path(backend_path: &Path) -> Result<Arc<dyn MetaStore>, MetaError> {
        let config =
            Config::from_path(backend_path).map_err(|e| MetaError::Config(e.to_string()))?;
        Self::create_from_config(config).await
    }

    /// Create MetaStore from config
    pub async fn create_from_config(config: Config) -> Result<Arc<dyn MetaStore>, MetaError> {
        let store = DatabaseMetaStore::from_config(config).await?;
        Ok(Arc::new(store))
    }

    /// Create MetaStore from URL (simplified interface)
    pub async fn create_from_url(url: &str) -> Result<Arc<dyn MetaStore>, MetaError> {
        let config = Self::config_from_url(url)?;
        Self::create_from_config(config).await
    }

    /// Parse URL to config
    pub fn config_from_url(url: &str) -> Result<Config, MetaError> {
        let db_config = if url.starts_with("sqlite:") {
            DatabaseType::Sqlite {
                url: url.to_string(),
            }
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DatabaseType::Postgres {
                url: url.to_string(),
            }
        } else {
            return Err(MetaError::Config(format!(
                "Unsupported URL scheme: {}",
                url
            )));
        };

        Ok(Config::with_database(db_config))
    }
}

/// Convenience function to create MetaStore from path
pub async fn create_meta_store(backend_path: &Path) -> Result<Arc<dyn MetaStore>, MetaError> {
    MetaStoreFactory::create_from_path(backend_path).await
}

/// Convenience function to create MetaStore from URL
pub async fn create_meta_store_from_url(url: &str) -> Result<Arc<dyn MetaStore>, MetaError> {
    MetaStoreFactory::create_from_url(url).await
}
