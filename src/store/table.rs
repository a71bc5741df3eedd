use crate::core::models::{Id, Record};
use crate::store::{Collection, Store};
use anyhow::{Context, Result, anyhow};
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use std::sync::Arc;

const SEQUENCES: &str = "sequences";

/// Typed view over a collection: JSON documents keyed by big-endian ids.
///
/// `insert` allocates ids with a read-modify-write of the sequence counter, so
/// callers serialize inserts (the `Database` write lock does).
pub struct Table<T> {
    name: &'static str,
    rows: Arc<dyn Collection>,
    sequences: Arc<dyn Collection>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Table<T>
where
    T: Record + Serialize + DeserializeOwned,
{
    pub fn open(store: &dyn Store, name: &'static str) -> Result<Self> {
        Ok(Self {
            name,
            rows: store.collection(name)?,
            sequences: store.collection(SEQUENCES)?,
            _marker: PhantomData,
        })
    }

    pub async fn get(&self, id: Id) -> Result<Option<T>> {
        match self.rows.get(&id.to_be_bytes()).await? {
            Some(bytes) => Ok(Some(self.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every row in id order.
    pub async fn all(&self) -> Result<Vec<T>> {
        self.rows
            .entries()
            .await?
            .iter()
            .map(|(_, bytes)| self.decode(bytes))
            .collect()
    }

    pub async fn insert(&self, mut row: T) -> Result<T> {
        let id = self.next_id().await?;
        row.set_id(id);
        self.write(&row).await?;
        Ok(row)
    }

    pub async fn update(&self, row: &T) -> Result<()> {
        if row.id() == 0 {
            return Err(anyhow!("Cannot update unsaved {} row", self.name));
        }
        self.write(row).await
    }

    async fn write(&self, row: &T) -> Result<()> {
        let bytes = serde_json::to_vec(row)
            .with_context(|| format!("Failed to encode {} row", self.name))?;
        self.rows.put(&row.id().to_be_bytes(), &bytes).await
    }

    async fn next_id(&self) -> Result<Id> {
        let current = match self.sequences.get(self.name.as_bytes()).await? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| anyhow!("Corrupt sequence for {}", self.name))?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = current + 1;
        self.sequences
            .put(self.name.as_bytes(), &next.to_be_bytes())
            .await?;
        Ok(next)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).with_context(|| format!("Failed to decode {} row", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::RiskGroup;
    use crate::store::KeyValueStore;

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let store = KeyValueStore::in_memory();
        let table: Table<RiskGroup> = Table::open(&store, "risk_groups").unwrap();

        let a = table
            .insert(RiskGroup { id: 0, name: "Equities".to_string() })
            .await
            .unwrap();
        let b = table
            .insert(RiskGroup { id: 0, name: "Income".to_string() })
            .await
            .unwrap();
        assert_eq!((a.id, b.id), (1, 2));

        let all = table.all().await.unwrap();
        assert_eq!(all, vec![a.clone(), b]);
        assert_eq!(table.get(1).await.unwrap(), Some(a));
        assert!(table.get(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sequences_are_per_table() {
        let store = KeyValueStore::in_memory();
        let groups: Table<RiskGroup> = Table::open(&store, "risk_groups").unwrap();
        let screened: Table<RiskGroup> = Table::open(&store, "screened_groups").unwrap();

        groups
            .insert(RiskGroup { id: 0, name: "Equities".to_string() })
            .await
            .unwrap();
        let other = screened
            .insert(RiskGroup { id: 0, name: "Income".to_string() })
            .await
            .unwrap();
        assert_eq!(other.id, 1);
        assert_eq!(groups.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_requires_saved_row() {
        let store = KeyValueStore::in_memory();
        let table: Table<RiskGroup> = Table::open(&store, "risk_groups").unwrap();

        let unsaved = RiskGroup { id: 0, name: "Equities".to_string() };
        assert!(table.update(&unsaved).await.is_err());

        let mut saved = table.insert(unsaved).await.unwrap();
        saved.name = "Growth".to_string();
        table.update(&saved).await.unwrap();
        assert_eq!(table.get(saved.id).await.unwrap().unwrap().name, "Growth");
    }
}
