use {
    super::{LockStore, StoreError},
    crate::identity::HolderId,
    async_trait::async_trait,
    std::{
        collections::HashMap,
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    },
};

struct LockRecord {
    token: String,
    count: i64,
    deadline: Option<Instant>,
}

impl LockRecord {
    fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= Instant::now())
    }
}

///
/// In-memory lock store implementing the same atomic contract as
/// [`super::RedisLockStore`].
///
/// A single mutex around the record map plays the role of the store's
/// script atomicity; TTLs are enforced lazily, on access. Intended for tests
/// and for exercising lock logic without a server, which is why it also
/// exposes record observers ([`MemoryLockStore::count`],
/// [`MemoryLockStore::remaining_ttl`]) that the wire contract does not have.
///
#[derive(Clone, Default)]
pub struct MemoryLockStore {
    records: Arc<Mutex<HashMap<String, LockRecord>>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    ///
    /// Reentrancy count of the named lock, if a live record exists.
    ///
    pub fn count(&self, name: &str) -> Option<i64> {
        let mut records = self.records.lock().expect("lock store mutex poisoned");
        live_record(&mut records, name).map(|record| record.count)
    }

    ///
    /// Remaining TTL of the named lock. `Some(None)` means the record exists
    /// without an expiry.
    ///
    pub fn remaining_ttl(&self, name: &str) -> Option<Option<Duration>> {
        let mut records = self.records.lock().expect("lock store mutex poisoned");
        live_record(&mut records, name)
            .map(|record| record.deadline.map(|deadline| deadline - Instant::now()))
    }
}

// Drops the record if its deadline has passed, mirroring key expiry.
fn live_record<'a>(
    records: &'a mut HashMap<String, LockRecord>,
    name: &str,
) -> Option<&'a mut LockRecord> {
    if records.get(name).is_some_and(LockRecord::expired) {
        records.remove(name);
    }
    records.get_mut(name)
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn acquire(
        &self,
        name: &str,
        holder: &HolderId,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.lock().expect("lock store mutex poisoned");
        match live_record(&mut records, name) {
            Some(record) if record.token != holder.as_str() => Ok(false),
            Some(record) => {
                record.count += 1;
                if let Some(ttl) = ttl {
                    record.deadline = Some(Instant::now() + ttl);
                }
                Ok(true)
            }
            None => {
                records.insert(
                    name.to_string(),
                    LockRecord {
                        token: holder.as_str().to_string(),
                        count: 1,
                        deadline: ttl.map(|ttl| Instant::now() + ttl),
                    },
                );
                Ok(true)
            }
        }
    }

    async fn release(&self, name: &str, holder: &HolderId) -> Result<bool, StoreError> {
        let mut records = self.records.lock().expect("lock store mutex poisoned");
        let Some(record) = live_record(&mut records, name) else {
            return Ok(false);
        };
        if record.token != holder.as_str() {
            return Ok(false);
        }
        record.count -= 1;
        if record.count == 0 {
            records.remove(name);
        }
        Ok(true)
    }

    async fn extend(
        &self,
        name: &str,
        holder: &HolderId,
        additional: Duration,
        replace: bool,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.lock().expect("lock store mutex poisoned");
        let Some(record) = live_record(&mut records, name) else {
            return Ok(false);
        };
        if record.token != holder.as_str() {
            return Ok(false);
        }
        // A record without an expiry has nothing to extend (PTTL < 0).
        let Some(deadline) = record.deadline else {
            return Ok(false);
        };
        record.deadline = Some(if replace {
            Instant::now() + additional
        } else {
            deadline + additional
        });
        Ok(true)
    }

    async fn reacquire(
        &self,
        name: &str,
        holder: &HolderId,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.lock().expect("lock store mutex poisoned");
        let Some(record) = live_record(&mut records, name) else {
            return Ok(false);
        };
        if record.token != holder.as_str() {
            return Ok(false);
        }
        record.deadline = Some(Instant::now() + ttl);
        Ok(true)
    }

    async fn read_token(&self, name: &str) -> Result<Option<String>, StoreError> {
        let mut records = self.records.lock().expect("lock store mutex poisoned");
        Ok(live_record(&mut records, name).map(|record| record.token.clone()))
    }
}
