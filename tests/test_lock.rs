use std::time::{Duration, Instant};

use common::{memory_store, random_str, wait_until_released};
use redis_reentrant_lock::{spawn_lock_client, HolderId, LockConfig, LockError, LockStore};
mod common;

fn fast_config() -> LockConfig {
    LockConfig {
        sleep: Duration::from_millis(20),
        ..LockConfig::default()
    }
}

#[tokio::test]
async fn test_locking() {
    let store = memory_store();
    let (client_handle, client) = spawn_lock_client(store.clone());
    let lock_name = random_str(10);

    let mut lock = client.lock(&lock_name);
    assert!(lock.acquire().await.expect("failed to lock"));
    lock.release().await.expect("failed to release");

    drop(client);
    drop(lock);
    client_handle
        .await
        .expect("failed to shut down release worker");
}

#[tokio::test]
async fn second_identity_cannot_acquire_a_held_lock() {
    let store = memory_store();
    let (_client_handle, client) = spawn_lock_client(store.clone());
    let lock_name = random_str(10);

    let mut lock1 = client.lock(&lock_name).with_holder(HolderId::new("h1"));
    let mut lock2 = client.lock(&lock_name).with_holder(HolderId::new("h2"));

    assert!(lock1.acquire().await.expect("failed to lock"));
    assert!(!lock2.try_acquire().await.expect("store failure"));

    lock1.release().await.expect("failed to release");
    assert!(lock2.try_acquire().await.expect("store failure"));
}

#[tokio::test]
async fn reentrant_holder_must_release_as_many_times_as_it_acquired() {
    let store = memory_store();
    let (_client_handle, client) = spawn_lock_client(store.clone());
    let lock_name = random_str(10);

    let mut lock = client.lock(&lock_name).with_holder(HolderId::new("h1"));
    let mut contender = client.lock(&lock_name).with_holder(HolderId::new("h2"));

    for depth in 1..=3 {
        assert!(lock.acquire().await.expect("failed to lock"));
        assert_eq!(store.count(&lock_name), Some(depth));
    }

    lock.release().await.expect("failed to release");
    lock.release().await.expect("failed to release");
    // Two of three levels released, the lock is still held.
    assert_eq!(store.count(&lock_name), Some(1));
    assert!(!contender.try_acquire().await.expect("store failure"));
    assert!(lock.owned().await.expect("store failure"));

    lock.release().await.expect("failed to release");
    assert_eq!(store.count(&lock_name), None);
    assert!(contender.try_acquire().await.expect("store failure"));
}

#[tokio::test]
async fn release_without_acquire_is_an_error() {
    let store = memory_store();
    let (_client_handle, client) = spawn_lock_client(store);
    let mut lock = client.lock(random_str(10));

    assert!(matches!(lock.release().await, Err(LockError::NotLocked)));
}

#[tokio::test]
async fn release_after_expiry_reports_not_owned() {
    let store = memory_store();
    let (_client_handle, client) = spawn_lock_client(store);
    let lock_name = random_str(10);

    let config = LockConfig {
        timeout: Some(Duration::from_millis(40)),
        ..fast_config()
    };
    let mut lock = client.lock_with(&lock_name, config);
    assert!(lock.acquire().await.expect("failed to lock"));

    tokio::time::sleep(Duration::from_millis(70)).await;
    assert!(!lock.owned().await.expect("store failure"));
    assert!(matches!(lock.release().await, Err(LockError::NotOwned)));
}

#[tokio::test]
async fn blocking_acquire_waits_for_the_holder() {
    let store = memory_store();
    let (_client_handle, client) = spawn_lock_client(store);
    let lock_name = random_str(10);

    let mut lock1 = client
        .lock_with(&lock_name, fast_config())
        .with_holder(HolderId::new("h1"));
    assert!(lock1.acquire().await.expect("failed to lock"));

    let h = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        lock1.release().await.expect("failed to release");
    });

    let mut lock2 = client
        .lock_with(&lock_name, fast_config())
        .with_holder(HolderId::new("h2"));
    assert!(lock2.acquire().await.expect("failed to lock"));
    h.await.expect("holder task failed");
}

#[tokio::test]
async fn blocking_timeout_bounds_the_wait() {
    let store = memory_store();
    let (_client_handle, client) = spawn_lock_client(store);
    let lock_name = random_str(10);

    let mut lock1 = client.lock(&lock_name).with_holder(HolderId::new("h1"));
    assert!(lock1.acquire().await.expect("failed to lock"));

    let config = LockConfig {
        sleep: Duration::from_millis(50),
        blocking_timeout: Some(Duration::from_millis(300)),
        ..LockConfig::default()
    };
    let mut lock2 = client
        .lock_with(&lock_name, config)
        .with_holder(HolderId::new("h2"));

    let started = Instant::now();
    assert!(!lock2.acquire().await.expect("store failure"));
    let elapsed = started.elapsed();

    // Bounded by the timeout, give or take one sleep interval.
    assert!(elapsed >= Duration::from_millis(200), "elapsed: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "elapsed: {elapsed:?}");
}

#[tokio::test]
async fn non_blocking_acquire_returns_immediately() {
    let store = memory_store();
    let (_client_handle, client) = spawn_lock_client(store);
    let lock_name = random_str(10);

    let mut lock1 = client.lock(&lock_name).with_holder(HolderId::new("h1"));
    assert!(lock1.acquire().await.expect("failed to lock"));

    let config = LockConfig {
        blocking: false,
        ..LockConfig::default()
    };
    let mut lock2 = client
        .lock_with(&lock_name, config)
        .with_holder(HolderId::new("h2"));

    let started = Instant::now();
    assert!(!lock2.acquire().await.expect("store failure"));
    assert!(started.elapsed() < Duration::from_millis(50));
}

#[tokio::test]
async fn owned_tracks_the_stored_token() {
    let store = memory_store();
    let (_client_handle, client) = spawn_lock_client(store);
    let lock_name = random_str(10);

    let mut lock = client.lock(&lock_name);
    assert!(!lock.owned().await.expect("store failure"));

    assert!(lock.acquire().await.expect("failed to lock"));
    assert!(lock.owned().await.expect("store failure"));

    lock.release().await.expect("failed to release");
    assert!(!lock.owned().await.expect("store failure"));
}

#[tokio::test]
async fn extend_and_reacquire_require_ownership() {
    let store = memory_store();
    let (_client_handle, client) = spawn_lock_client(store.clone());
    let lock_name = random_str(10);

    let config = LockConfig {
        timeout: Some(Duration::from_millis(40)),
        ..LockConfig::default()
    };
    let mut lock = client.lock_with(&lock_name, config);
    assert!(lock.acquire().await.expect("failed to lock"));

    lock.extend(Duration::from_millis(500), false)
        .await
        .expect("failed to extend");
    lock.reacquire(Duration::from_millis(500))
        .await
        .expect("failed to reacquire");

    // Take the record away behind the client's back.
    let mut thief = client.lock(&lock_name).with_holder(HolderId::new("thief"));
    store
        .release(&lock_name, &HolderId::resolve().expect("identity"))
        .await
        .expect("store failure");
    assert!(thief.acquire().await.expect("failed to lock"));

    assert!(matches!(
        lock.extend(Duration::from_millis(500), false).await,
        Err(LockError::NotOwned)
    ));
    assert!(matches!(
        lock.reacquire(Duration::from_millis(500)).await,
        Err(LockError::NotOwned)
    ));
    assert!(!lock.owned().await.expect("store failure"));
}

#[tokio::test]
async fn dropping_a_guard_releases_in_the_background() {
    let store = memory_store();
    let (_client_handle, client) = spawn_lock_client(store.clone());
    let lock_name = random_str(10);

    let mut lock = client.lock(&lock_name);
    let (guard, release_done) = lock
        .acquire_guard_with_release_done()
        .await
        .expect("failed to lock");
    assert_eq!(store.count(&lock_name), Some(1));

    drop(guard);
    release_done.await;
    assert_eq!(store.count(&lock_name), None);
}

#[tokio::test]
async fn guard_release_surfaces_errors_inline() {
    let store = memory_store();
    let (_client_handle, client) = spawn_lock_client(store.clone());
    let lock_name = random_str(10);

    let mut lock = client.lock(&lock_name);
    let guard = lock.acquire_guard().await.expect("failed to lock");
    assert!(guard.owned().await.expect("store failure"));
    guard.release().await.expect("failed to release");
    assert_eq!(store.count(&lock_name), None);
}

#[tokio::test]
async fn scope_releases_on_normal_completion() {
    let store = memory_store();
    let (_client_handle, client) = spawn_lock_client(store.clone());
    let lock_name = random_str(10);

    let mut lock = client.lock(&lock_name);
    let out = lock
        .scope(|| async { 41 + 1 })
        .await
        .expect("scope failed");
    assert_eq!(out, 42);
    assert_eq!(store.count(&lock_name), None);
}

#[tokio::test]
async fn scope_releases_when_the_closure_fails() {
    let store = memory_store();
    let (_client_handle, client) = spawn_lock_client(store.clone());
    let lock_name = random_str(10);

    let mut lock = client.lock(&lock_name);
    let out: Result<i32, &str> = lock
        .scope(|| async { Err("boom") })
        .await
        .expect("scope failed");
    assert_eq!(out, Err("boom"));
    assert_eq!(store.count(&lock_name), None);
}

#[tokio::test]
async fn scope_fails_whole_when_acquire_times_out() {
    let store = memory_store();
    let (_client_handle, client) = spawn_lock_client(store.clone());
    let lock_name = random_str(10);

    let mut holder = client.lock(&lock_name).with_holder(HolderId::new("h1"));
    assert!(holder.acquire().await.expect("failed to lock"));

    let config = LockConfig {
        sleep: Duration::from_millis(20),
        blocking_timeout: Some(Duration::from_millis(100)),
        ..LockConfig::default()
    };
    let mut lock = client
        .lock_with(&lock_name, config)
        .with_holder(HolderId::new("h2"));
    let result = lock
        .scope(|| async {
            unreachable!("scope body must not run");
        })
        .await;
    assert!(matches!(result, Err(LockError::AcquireFailed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_scope_still_releases() {
    let store = memory_store();
    let (_client_handle, client) = spawn_lock_client(store.clone());
    let lock_name = random_str(10);

    let mut lock = client.lock(&lock_name).with_holder(HolderId::new("h1"));
    let (tx, rx) = tokio::sync::oneshot::channel();

    let h = tokio::spawn(async move {
        let _ = tokio::time::timeout(
            Duration::from_millis(50),
            lock.scope(|| async move {
                tokio::time::sleep(Duration::from_secs(20)).await;
                // This should never be reached
                tx.send(()).unwrap();
            }),
        )
        .await;
    });

    let _ = h.await;
    // If the callback rx received a msg it means the scope body ran to completion.
    assert!(rx.await.is_err());

    wait_until_released(&store, &lock_name).await;
    let mut contender = client.lock(&lock_name).with_holder(HolderId::new("h2"));
    assert!(contender.try_acquire().await.expect("store failure"));
}

#[tokio::test]
async fn keep_alive_outlives_the_configured_ttl() {
    let store = memory_store();
    let (_client_handle, client) = spawn_lock_client(store.clone());
    let lock_name = random_str(10);

    let ttl = Duration::from_millis(200);
    let config = LockConfig {
        timeout: Some(ttl),
        ..LockConfig::default()
    };
    let mut lock = client.lock_with(&lock_name, config);
    assert!(lock.acquire().await.expect("failed to lock"));

    let keep_alive = lock
        .keep_alive(ttl, Some(Duration::from_millis(50)))
        .expect("failed to start keep-alive");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(lock.owned().await.expect("store failure"));

    drop(keep_alive);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!lock.owned().await.expect("store failure"));
}
