//! Globally unique, shard-aware identifiers.
//!
//! Identifiers are pre-generated in bulk (`Prealloc`), claimed one per
//! creation (`Init`) and finalized once the owning row commits (`Actual`):
//!
//! ```text
//! Prealloc --claim--> Init --commit--> Actual
//!     ^                 |
//!     +----reclaim------+   (explicit, never automatic)
//! ```
//!
//! Every identifier of a node ends in that node's [`ShardSuffix`], so ids
//! minted on different nodes never collide and the [`crate::RoutingTree`] can
//! route an id back to its owner from its low bits alone.

mod memory;
mod relational;

pub use memory::*;
pub use relational::*;

use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::{Error, Record, Result, Route};

/// Lifecycle state of an identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentifierStatus {
    Prealloc,
    Init,
    Actual,
}

impl IdentifierStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prealloc => "Prealloc",
            Self::Init => "Init",
            Self::Actual => "Actual",
        }
    }
}

/// The low `bits` bits every identifier of one shard shares.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardSuffix {
    suffix: u64,
    bits: u32,
}

impl ShardSuffix {
    /// Widest suffix accepted; ids must stay within a signed 64-bit column.
    pub const MAX_BITS: u32 = 62;

    pub fn new(suffix: u64, bits: u32) -> Result<Self> {
        if bits > Self::MAX_BITS {
            return Err(Error::InvalidArgument(format!(
                "shard bitmask size {bits} exceeds {}",
                Self::MAX_BITS
            )));
        }
        if suffix >> bits != 0 {
            return Err(Error::InvalidArgument(format!(
                "shard suffix {suffix} does not fit in {bits} bits"
            )));
        }
        Ok(Self { suffix, bits })
    }

    /// The shard a routing lookup resolved to.
    pub const fn from_route<S>(route: &Route<S>) -> Self {
        Self {
            suffix: route.suffix,
            bits: route.depth,
        }
    }

    pub const fn suffix(&self) -> u64 {
        self.suffix
    }

    pub const fn bits(&self) -> u32 {
        self.bits
    }

    pub const fn mask(&self) -> u64 {
        (1 << self.bits) - 1
    }

    /// The identifier with sequence number `seq` in this shard.
    pub const fn compose(&self, seq: u64) -> u64 {
        (seq << self.bits) | self.suffix
    }

    pub const fn sequence(&self, id: u64) -> u64 {
        id >> self.bits
    }

    pub const fn owns(&self, id: u64) -> bool {
        id & self.mask() == self.suffix
    }
}

/// One row of the identifier registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentifierRecord {
    pub id: u64,
    pub status: IdentifierStatus,
    pub category: Option<String>,
    pub checksum: Option<Vec<u8>>,
    /// Time of the last state transition.
    pub change: SystemTime,
}

/// Persistence of the identifier registry.
///
/// `claim` must be safe under concurrent claimants: two callers never receive
/// the same id, and a claimant never waits on a row another one is claiming.
#[async_trait]
pub trait IdentifierStore: Send {
    /// Moves the lowest `Prealloc` id of `shard` to `Init` and returns it.
    async fn claim(&mut self, shard: ShardSuffix) -> Result<Option<u64>>;

    /// Moves `id` from `Init` to `Actual`, recording its owner and checksum.
    async fn mark_actual(&mut self, id: u64, category: &str, checksum: &[u8]) -> Result<()>;

    /// Moves `id` from `Init` back to `Prealloc`. Returns whether it did.
    async fn release(&mut self, id: u64) -> Result<bool>;

    async fn count_prealloc(&mut self, shard: ShardSuffix) -> Result<u64>;

    /// Highest id of `shard` in any state.
    async fn highest(&mut self, shard: ShardSuffix) -> Result<Option<u64>>;

    /// Registers `ids` as `Prealloc`, skipping existing ones. Returns the
    /// number inserted.
    async fn insert_prealloc(&mut self, ids: &[u64]) -> Result<u64>;
}

/// Claims identifiers for one shard and keeps its pool topped up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdentifierPool {
    shard: ShardSuffix,
    capacity: u64,
    refill_percent: u8,
}

impl IdentifierPool {
    /// `capacity` is the pool size a refill restores; a refill happens only
    /// once fewer than `refill_percent`% of it remain.
    pub fn new(shard: ShardSuffix, capacity: u64, refill_percent: u8) -> Self {
        Self {
            shard,
            capacity,
            refill_percent: refill_percent.min(100),
        }
    }

    pub const fn shard(&self) -> ShardSuffix {
        self.shard
    }

    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    pub const fn refill_percent(&self) -> u8 {
        self.refill_percent
    }

    /// Claims one identifier. An exhausted pool is reported as
    /// [`Error::NotFound`]; the caller should refill rather than retry.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self, store)))]
    pub async fn take_id<S>(&self, store: &mut S) -> Result<u64>
    where
        S: IdentifierStore + ?Sized,
    {
        match store.claim(self.shard).await? {
            Some(id) => Ok(id),
            None => {
                #[cfg(feature = "tracing")]
                tracing::warn!(shard = ?self.shard, "identifier pool exhausted");
                Err(Error::NotFound(
                    "Cannot get Id to use for object creation, identifier pool exhausted".to_owned(),
                ))
            }
        }
    }

    /// Finalizes a claimed identifier once its record is written.
    pub async fn commit_id<S>(&self, store: &mut S, id: u64, category: &str, record: &Record) -> Result<()>
    where
        S: IdentifierStore + ?Sized,
    {
        store.mark_actual(id, category, &checksum(record)?).await
    }

    pub const fn needs_refill(&self, prealloc: u64) -> bool {
        (prealloc as u128) * 100 < (self.capacity as u128) * (self.refill_percent as u128)
    }

    /// Tops the pool up to `capacity` when it fell below the threshold,
    /// continuing after the shard's highest sequence. Returns the number of
    /// identifiers added.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self, store)))]
    pub async fn refill<S>(&self, store: &mut S) -> Result<u64>
    where
        S: IdentifierStore + ?Sized,
    {
        let prealloc = store.count_prealloc(self.shard).await?;
        if !self.needs_refill(prealloc) {
            return Ok(0);
        }
        let next = store
            .highest(self.shard)
            .await?
            .map_or(0, |id| self.shard.sequence(id) + 1);
        let missing = self.capacity.saturating_sub(prealloc);
        let ids: Vec<u64> = (next..next + missing).map(|seq| self.shard.compose(seq)).collect();
        let inserted = store.insert_prealloc(&ids).await?;
        #[cfg(feature = "tracing")]
        tracing::info!(shard = ?self.shard, prealloc, inserted, "identifier pool refilled");
        Ok(inserted)
    }

    /// Returns an identifier stuck in `Init` to `Prealloc`.
    pub async fn reclaim<S>(&self, store: &mut S, id: u64) -> Result<()>
    where
        S: IdentifierStore + ?Sized,
    {
        if !self.shard.owns(id) {
            return Err(Error::InvalidArgument(format!(
                "identifier {id} does not belong to shard {}/{}",
                self.shard.suffix, self.shard.bits
            )));
        }
        if store.release(id).await? {
            Ok(())
        } else {
            Err(Error::NotFound(format!("No identifier {id} in Init state")))
        }
    }
}

/// SHA-512 over the canonical JSON encoding of `record`.
pub fn checksum(record: &Record) -> Result<Vec<u8>> {
    let encoded = serde_json::to_vec(record).map_err(|e| Error::InvalidArgument(e.to_string()))?;
    Ok(Sha512::digest(&encoded).to_vec())
}

#[cfg(test)]
mod tests;
