use {crate::identity::HolderId, async_trait::async_trait, std::time::Duration, thiserror::Error};

pub mod memory;
pub mod redis;

pub use self::{memory::MemoryLockStore, redis::RedisLockStore};

///
/// Transport or protocol failure from the backing store.
///
/// These are propagated unmodified: the lock core retries *contention*
/// (through the acquire loop), never outages. Retrying across connection
/// failures is the caller's policy.
///
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

///
/// The atomic-script contract a key-value store must offer to host lock
/// records.
///
/// Each operation executes as a single atomic step against the store: no
/// interleaving with any other client's operations on the same key is
/// possible. That atomicity is the entire correctness foundation of the lock
/// protocol.
///
/// Operations return `Ok(false)` when the caller is not eligible to act (the
/// lock is held by a different identity, or the record is gone); `Err` is
/// reserved for store failures.
///
#[async_trait]
pub trait LockStore: Send + Sync {
    ///
    /// Create the lock record for `holder`, or increment its reentrancy count
    /// when `holder` already owns it. Refreshes the TTL when one is given.
    ///
    async fn acquire(
        &self,
        name: &str,
        holder: &HolderId,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    ///
    /// Decrement the reentrancy count, deleting the record when it reaches
    /// zero.
    ///
    async fn release(&self, name: &str, holder: &HolderId) -> Result<bool, StoreError>;

    ///
    /// Lengthen the record's TTL by `additional`, or replace it outright.
    /// Fails on a record without a remaining TTL.
    ///
    async fn extend(
        &self,
        name: &str,
        holder: &HolderId,
        additional: Duration,
        replace: bool,
    ) -> Result<bool, StoreError>;

    ///
    /// Reset the record's TTL to `ttl` without touching the count.
    ///
    async fn reacquire(&self, name: &str, holder: &HolderId, ttl: Duration)
        -> Result<bool, StoreError>;

    ///
    /// Read the current holder token, if the record exists.
    ///
    async fn read_token(&self, name: &str) -> Result<Option<String>, StoreError>;
}
