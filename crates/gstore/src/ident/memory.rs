use std::{collections::BTreeMap, sync::Arc, time::SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{IdentifierRecord, IdentifierStatus, IdentifierStore, ShardSuffix};
use crate::{Error, Result};

/// In-process identifier registry.
///
/// Clones share the same table. Every operation holds the table lock for its
/// whole duration, which makes claims trivially exclusive.
#[derive(Clone, Debug, Default)]
pub struct MemoryIdentifierStore {
    table: Arc<Mutex<BTreeMap<u64, IdentifierRecord>>>,
}

impl MemoryIdentifierStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u64) -> Option<IdentifierRecord> {
        self.table.lock().get(&id).cloned()
    }

    pub fn count(&self, status: IdentifierStatus) -> usize {
        self.table.lock().values().filter(|r| r.status == status).count()
    }
}

#[async_trait]
impl IdentifierStore for MemoryIdentifierStore {
    async fn claim(&mut self, shard: ShardSuffix) -> Result<Option<u64>> {
        let mut table = self.table.lock();
        let claimed = table
            .values_mut()
            .find(|r| r.status == IdentifierStatus::Prealloc && shard.owns(r.id))
            .map(|r| {
                r.status = IdentifierStatus::Init;
                r.change = SystemTime::now();
                r.id
            });
        Ok(claimed)
    }

    async fn mark_actual(&mut self, id: u64, category: &str, checksum: &[u8]) -> Result<()> {
        let mut table = self.table.lock();
        match table.get_mut(&id) {
            Some(record) if record.status == IdentifierStatus::Init => {
                record.status = IdentifierStatus::Actual;
                record.category = Some(category.to_owned());
                record.checksum = Some(checksum.to_vec());
                record.change = SystemTime::now();
                Ok(())
            }
            _ => Err(Error::NotFound(format!("No identifier {id} in Init state"))),
        }
    }

    async fn release(&mut self, id: u64) -> Result<bool> {
        let mut table = self.table.lock();
        match table.get_mut(&id) {
            Some(record) if record.status == IdentifierStatus::Init => {
                record.status = IdentifierStatus::Prealloc;
                record.change = SystemTime::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_prealloc(&mut self, shard: ShardSuffix) -> Result<u64> {
        let table = self.table.lock();
        Ok(table
            .values()
            .filter(|r| r.status == IdentifierStatus::Prealloc && shard.owns(r.id))
            .count() as u64)
    }

    async fn highest(&mut self, shard: ShardSuffix) -> Result<Option<u64>> {
        let table = self.table.lock();
        Ok(table.keys().rev().copied().find(|&id| shard.owns(id)))
    }

    async fn insert_prealloc(&mut self, ids: &[u64]) -> Result<u64> {
        let mut table = self.table.lock();
        let now = SystemTime::now();
        let mut inserted = 0;
        for &id in ids {
            table.entry(id).or_insert_with(|| {
                inserted += 1;
                IdentifierRecord {
                    id,
                    status: IdentifierStatus::Prealloc,
                    category: None,
                    checksum: None,
                    change: now,
                }
            });
        }
        Ok(inserted)
    }
}
