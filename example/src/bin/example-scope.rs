use std::time::Duration;

use redis_reentrant_lock::{spawn_lock_client, LockConfig, RedisLockStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("redis_reentrant_lock=trace")
        .init();

    let store = RedisLockStore::connect("redis://localhost:6379")
        .await
        .expect("failed to connect to redis");

    let (client_handle, client) = spawn_lock_client(store);

    let ttl = Duration::from_secs(2);
    let config = LockConfig {
        timeout: Some(ttl),
        ..LockConfig::default()
    };
    let mut lock = client.lock_with("example-scope", config);

    let out = lock
        .scope(|| async {
            println!("Inside the critical section!");
            tokio::time::sleep(Duration::from_millis(500)).await;
            "scope output"
        })
        .await
        .expect("scope failed");
    println!("Scope returned: {out}");

    // Long critical sections outlive the TTL by heartbeating.
    assert!(lock.acquire().await.expect("failed to lock"));
    let keep_alive = lock
        .keep_alive(ttl, None)
        .expect("failed to start keep-alive");
    println!("Holding the lock for 5 seconds on a 2 second TTL...");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(lock.owned().await.expect("store failure"));
    println!("Still owned, thanks to the keep-alive task.");

    drop(keep_alive);
    lock.release().await.expect("failed to release");

    drop(client);
    client_handle.await.expect("release worker failed");
    println!("Finished!");
}
