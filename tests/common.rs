use std::time::Duration;

use redis_reentrant_lock::MemoryLockStore;

#[allow(dead_code)]
pub fn memory_store() -> MemoryLockStore {
    MemoryLockStore::new()
}

pub fn random_str(len: usize) -> String {
    use rand::{distributions::Alphanumeric, thread_rng, Rng};
    let mut rng = thread_rng();
    (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

///
/// Wait until the named lock record disappears from the store, or panic after
/// one second. Background releases go through the worker queue, so tests need
/// a bounded wait instead of a fixed sleep.
///
#[allow(dead_code)]
pub async fn wait_until_released(store: &MemoryLockStore, name: &str) {
    for _ in 0..100 {
        if store.count(name).is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("lock {name} was not released within 1s");
}
