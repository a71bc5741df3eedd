use crate::store::Collection;
use anyhow::{Context, Result};
use async_trait::async_trait;
use fjall::PartitionHandle;

/// Collection backed by a fjall partition.
pub struct DiskCollection {
    partition: PartitionHandle,
}

impl DiskCollection {
    pub fn new(partition: PartitionHandle) -> Self {
        Self { partition }
    }
}

#[async_trait]
impl Collection for DiskCollection {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self.partition.get(key).context("Store read failed")?;
        Ok(value.map(|v| v.to_vec()))
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.partition
            .insert(key, value)
            .context("Store write failed")
    }

    async fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.partition
            .iter()
            .map(|item| {
                let (k, v) = item.context("Store scan failed")?;
                Ok((k.to_vec(), v.to_vec()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fjall::PartitionCreateOptions;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_disk_collection_crud() {
        let dir = tempdir().unwrap();
        let keyspace = fjall::Config::new(dir.path()).open().unwrap();
        let partition = keyspace
            .open_partition("rows", PartitionCreateOptions::default())
            .unwrap();
        let collection = DiskCollection::new(partition);

        collection.put(&2u64.to_be_bytes(), b"two").await.unwrap();
        collection.put(&1u64.to_be_bytes(), b"one").await.unwrap();
        assert_eq!(
            collection.get(&1u64.to_be_bytes()).await.unwrap(),
            Some(b"one".to_vec())
        );

        let values: Vec<Vec<u8>> = collection
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        assert_eq!(values, vec![b"one".to_vec(), b"two".to_vec()]);
    }
}
