///
/// Holder identity resolution, the token scheme that makes locks reentrant.
///
pub mod identity;

///
/// Lua scripts implementing the atomic acquire/release/extend/reacquire steps.
///
pub mod scripts;

///
/// Store contract and backends (Redis, in-memory).
///
pub mod store;

///
/// Provides an API over a reentrant distributed lock.
///
pub mod lock;

///
/// Background keep-alive for long critical sections.
///
pub mod keepalive;

pub use {
    identity::HolderId,
    keepalive::KeepAlive,
    lock::{
        spawn_lock_client, LockClient, LockClientHandle, LockConfig, LockError, LockGuard,
        ReentrantLock, ReleaseDone,
    },
    store::{LockStore, MemoryLockStore, RedisLockStore, StoreError},
};
