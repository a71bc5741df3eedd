use crate::store::Collection;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Collection kept in a sorted map; used for tests and `DATABASE_URL=memory://`.
#[derive(Default)]
pub struct MemoryCollection {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.write().await.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .inner
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_collection_crud() {
        let collection = MemoryCollection::new();
        assert!(collection.get(b"a").await.unwrap().is_none());

        collection.put(b"b", b"2").await.unwrap();
        collection.put(b"a", b"1").await.unwrap();
        assert_eq!(collection.get(b"a").await.unwrap(), Some(b"1".to_vec()));

        let keys: Vec<Vec<u8>> = collection
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);

        collection.put(b"a", b"3").await.unwrap();
        assert_eq!(collection.get(b"a").await.unwrap(), Some(b"3".to_vec()));
    }
}
