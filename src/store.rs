use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{Config, ConfigError};
use crate::db::{
    ActionLog, Repository, SchemaRegistry, StorageEngine, StorageError, StorageResult,
};
use crate::sync::{
    CredentialProvider, HttpTransport, StaticCredentials, SyncEngine, SyncTransport,
};
use crate::telemetry;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Composition root: one storage engine shared by the repository and the
/// sync engine.
pub struct FitStore {
    config: Config,
    engine: StorageEngine,
    repository: Repository,
    sync: Option<SyncEngine>,
}

impl FitStore {
    /// Loads config, installs tracing and opens the store.
    pub async fn load(config_path: Option<PathBuf>) -> Result<Self, StoreError> {
        let config = Config::load(config_path)?;
        telemetry::init_tracing(&config.log_filter.value);
        if let Some(path) = &config.config_file {
            info!("Config file: {}", path.display());
        }
        Self::open(config).await
    }

    /// Opens the store. Sync is enabled when `sync.server_url` is set.
    pub async fn open(config: Config) -> Result<Self, StoreError> {
        let remote = config.sync.server_url.as_ref().map(|url| {
            let transport: Arc<dyn SyncTransport> = Arc::new(HttpTransport::new(
                url.clone(),
                config.sync.pull_path.clone(),
                config.sync.push_path.clone(),
            ));
            let credentials: Arc<dyn CredentialProvider> = Arc::new(StaticCredentials::new(
                config.sync.api_key.clone(),
                config.sync.user_id.clone(),
            ));
            (transport, credentials)
        });
        if remote.is_none() {
            info!("Sync not configured; running local-only");
        }

        Self::assemble(config, remote).await
    }

    /// Opens the store against a caller-supplied transport.
    pub async fn with_transport(
        config: Config,
        transport: Arc<dyn SyncTransport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, StoreError> {
        Self::assemble(config, Some((transport, credentials))).await
    }

    async fn assemble(
        config: Config,
        remote: Option<(Arc<dyn SyncTransport>, Arc<dyn CredentialProvider>)>,
    ) -> Result<Self, StoreError> {
        info!("Database: {}", config.database_path.value.display());
        let engine =
            StorageEngine::open(config.engine_options(), SchemaRegistry::default_registry())
                .await?;

        let repository = Repository::new(engine.clone(), ActionLog::new(engine.clone()))
            .with_user_id(config.sync.user_id.clone());
        let sync = remote.map(|(transport, credentials)| {
            SyncEngine::new(engine.clone(), transport, credentials)
                .with_policy(config.push_policy())
        });

        Ok(Self {
            config,
            engine,
            repository,
            sync,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// `None` when no remote is configured.
    pub fn sync(&self) -> Option<&SyncEngine> {
        self.sync.as_ref()
    }

    /// Call when the host comes back from suspension.
    pub async fn resume(&self) -> StorageResult<()> {
        self.engine.resume().await
    }

    /// Clears every local collection, including pending actions.
    pub async fn reset(&self) -> StorageResult<()> {
        self.engine.wipe_all().await
    }

    pub async fn close(&self) -> StorageResult<()> {
        self.engine.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ConnectionState, WriteOptions};
    use crate::models::{Meal, MealType};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_local_only() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "database_path: store.db\n").unwrap();

        let store = FitStore::load(Some(config_path)).await.unwrap();
        assert!(store.sync().is_none());
        assert_eq!(store.engine().state().await, ConnectionState::Ready);
        assert!(temp_dir.path().join("store.db").exists());
    }

    #[tokio::test]
    async fn test_open_with_remote_and_reset() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(
            &config_path,
            "database_path: store.db\nsync:\n  server_url: http://localhost:1\n  user_id: u1\n",
        )
        .unwrap();

        let store = FitStore::open(Config::load(Some(config_path)).unwrap())
            .await
            .unwrap();
        assert!(store.sync().is_some());

        store
            .repository()
            .create(&Meal::new("Oats", MealType::Breakfast), WriteOptions::default())
            .await
            .unwrap();
        let pending = store.sync().unwrap().action_log().load_pending().await.unwrap();
        assert_eq!(pending.entries.len(), 1);
        assert_eq!(pending.entries[0].table_name, "meals");

        store.reset().await.unwrap();
        assert_eq!(store.engine().count("meals").await.unwrap(), 0);
        assert_eq!(store.engine().count("action_log").await.unwrap(), 0);
    }
}
