pub mod disk;
pub mod memory;
pub mod table;

use crate::core::config::StorageLocation;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use disk::DiskCollection;
use fjall::{Keyspace, PartitionCreateOptions, PersistMode};
use memory::MemoryCollection;
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, RwLock},
};
use tracing::{debug, info};

/// An ordered byte-keyed collection of documents.
#[async_trait]
pub trait Collection: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
    /// All entries in ascending key order.
    async fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// Hands out named collections.
pub trait Store: Send + Sync {
    fn collection(&self, name: &str) -> Result<Arc<dyn Collection>>;
    fn flush(&self) -> Result<()>;
}

/// A thread-safe key-value store holding multiple collections, kept either in
/// memory or in a fjall keyspace on disk.
pub struct KeyValueStore {
    collections: RwLock<HashMap<String, Arc<dyn Collection>>>,
    keyspace: Option<Arc<Keyspace>>,
}

impl KeyValueStore {
    pub fn in_memory() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            keyspace: None,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create data directory: {}", path.display()))?;
        let keyspace = fjall::Config::new(path)
            .open()
            .with_context(|| format!("Failed to open store at {}", path.display()))?;
        info!("Opened store at {}", path.display());
        Ok(Self {
            collections: RwLock::new(HashMap::new()),
            keyspace: Some(Arc::new(keyspace)),
        })
    }

    pub fn from_location(location: &StorageLocation) -> Result<Self> {
        match location {
            StorageLocation::Memory => {
                info!("Using in-memory store");
                Ok(Self::in_memory())
            }
            StorageLocation::Disk(path) => Self::open(path),
        }
    }
}

impl Store for KeyValueStore {
    fn collection(&self, name: &str) -> Result<Arc<dyn Collection>> {
        {
            let collections = self
                .collections
                .read()
                .map_err(|_| anyhow!("Store lock poisoned"))?;
            if let Some(collection) = collections.get(name) {
                return Ok(Arc::clone(collection));
            }
        }

        let mut collections = self
            .collections
            .write()
            .map_err(|_| anyhow!("Store lock poisoned"))?;
        if let Some(collection) = collections.get(name) {
            return Ok(Arc::clone(collection));
        }

        let collection: Arc<dyn Collection> = match &self.keyspace {
            Some(keyspace) => {
                let partition = keyspace
                    .open_partition(name, PartitionCreateOptions::default())
                    .with_context(|| format!("Failed to open collection: {name}"))?;
                Arc::new(DiskCollection::new(partition))
            }
            None => Arc::new(MemoryCollection::new()),
        };
        debug!("Opened collection {}", name);
        collections.insert(name.to_string(), Arc::clone(&collection));
        Ok(collection)
    }

    fn flush(&self) -> Result<()> {
        if let Some(keyspace) = &self.keyspace {
            keyspace
                .persist(PersistMode::SyncAll)
                .context("Failed to flush store")?;
        }
        Ok(())
    }
}
