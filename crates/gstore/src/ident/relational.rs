use async_trait::async_trait;
use serde_json::Value;

use super::{IdentifierStore, ShardSuffix};
use crate::{Connection, Error, Param, Record, Result, sql::query_params, value_as_id};

const CLAIM: &str = "UPDATE \"Identifier\" SET \"Status\" = 'Init', \"Change\" = CURRENT_TIMESTAMP \
     WHERE \"Id\" = (SELECT \"Id\" FROM \"Identifier\" \
     WHERE \"Status\" = 'Prealloc' AND (\"Id\" & $1) = $2 \
     ORDER BY \"Id\" LIMIT 1 FOR UPDATE SKIP LOCKED) RETURNING \"Id\"";

const MARK_ACTUAL: &str = "UPDATE \"Identifier\" SET \"Status\" = 'Actual', \"Change\" = CURRENT_TIMESTAMP, \
     \"Category\" = (SELECT \"Id\" FROM \"Category\" WHERE \"Name\" = $1), \"Checksum\" = $2 \
     WHERE \"Id\" = $3 AND \"Status\" = 'Init'";

const RELEASE: &str = "UPDATE \"Identifier\" SET \"Status\" = 'Prealloc', \"Change\" = CURRENT_TIMESTAMP \
     WHERE \"Id\" = $1 AND \"Status\" = 'Init'";

const COUNT_PREALLOC: &str = "SELECT count(*) AS \"Count\" FROM \"Identifier\" \
     WHERE \"Status\" = 'Prealloc' AND (\"Id\" & $1) = $2";

const HIGHEST: &str = "SELECT max(\"Id\") AS \"Max\" FROM \"Identifier\" WHERE (\"Id\" & $1) = $2";

/// Rows per `INSERT` when registering new identifiers.
const INSERT_CHUNK: usize = 1000;

/// Identifier registry in the `"Identifier"` table of a relational engine.
///
/// Borrows the connection so it can run inside a caller's transaction.
pub struct SqlIdentifierStore<'c, C: Connection> {
    conn: &'c mut C,
}

impl<'c, C: Connection> SqlIdentifierStore<'c, C> {
    pub const fn new(conn: &'c mut C) -> Self {
        Self { conn }
    }
}

fn shard_params(shard: ShardSuffix) -> [Param; 2] {
    [Param::id(shard.mask()), Param::id(shard.suffix())]
}

fn single_value(rows: &[Record], column: &str) -> Option<Value> {
    rows.first()?.get(column).cloned()
}

#[async_trait]
impl<'c, C: Connection> IdentifierStore for SqlIdentifierStore<'c, C> {
    async fn claim(&mut self, shard: ShardSuffix) -> Result<Option<u64>> {
        let rows = self.conn.query(CLAIM, &shard_params(shard)).await?;
        match single_value(&rows, "Id") {
            None => Ok(None),
            Some(id) => value_as_id(&id)
                .map(Some)
                .ok_or_else(|| Error::backend(format!("claimed identifier is not an integer: {id}"))),
        }
    }

    async fn mark_actual(&mut self, id: u64, category: &str, checksum: &[u8]) -> Result<()> {
        let params = [
            Param::from(category),
            Param::Bytes(checksum.to_vec()),
            Param::id(id),
        ];
        match self.conn.execute(MARK_ACTUAL, &params).await? {
            0 => Err(Error::NotFound(format!("No identifier {id} in Init state"))),
            _ => Ok(()),
        }
    }

    async fn release(&mut self, id: u64) -> Result<bool> {
        Ok(self.conn.execute(RELEASE, &[Param::id(id)]).await? > 0)
    }

    async fn count_prealloc(&mut self, shard: ShardSuffix) -> Result<u64> {
        let rows = self.conn.query(COUNT_PREALLOC, &shard_params(shard)).await?;
        Ok(single_value(&rows, "Count").as_ref().and_then(value_as_id).unwrap_or(0))
    }

    async fn highest(&mut self, shard: ShardSuffix) -> Result<Option<u64>> {
        let rows = self.conn.query(HIGHEST, &shard_params(shard)).await?;
        Ok(single_value(&rows, "Max").as_ref().and_then(value_as_id))
    }

    async fn insert_prealloc(&mut self, ids: &[u64]) -> Result<u64> {
        let mut inserted = 0;
        for chunk in ids.chunks(INSERT_CHUNK) {
            let rows = query_params(chunk.len(), 1)
                .split(", ")
                .map(|p| format!("({p}, 'Prealloc', CURRENT_TIMESTAMP)"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "INSERT INTO \"Identifier\" (\"Id\", \"Status\", \"Change\") VALUES {rows} ON CONFLICT DO NOTHING"
            );
            let params: Vec<Param> = chunk.iter().map(|&id| Param::id(id)).collect();
            inserted += self.conn.execute(&sql, &params).await?;
        }
        Ok(inserted)
    }
}
