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

    let config = LockConfig {
        timeout: Some(Duration::from_secs(10)),
        sleep: Duration::from_millis(100),
        ..LockConfig::default()
    };

    let mut lock = client.lock_with("example-lock", config.clone());
    assert!(lock.acquire().await.expect("failed to lock"));
    println!("Lock acquired in main task!");

    // The same holder can reenter without deadlocking itself.
    assert!(lock.acquire().await.expect("failed to lock"));
    println!("Lock re-entered in main task!");

    let client2 = client.clone();
    let h = tokio::spawn(async move {
        let mut lock = client2.lock_with("example-lock", config);
        lock.acquire().await.expect("failed to lock");
        println!("Lock acquired in task 2!");
        lock.release().await.expect("failed to release");
    });

    println!("Sleeping for 3 seconds...");
    for i in 1..=3 {
        println!("{}...", i);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    println!("Releasing both levels!");
    lock.release().await.expect("failed to release");
    lock.release().await.expect("failed to release");

    println!("Waiting for task 2 to acquire the lock...");
    h.await.expect("task 2 failed to acquire lock");

    drop(client);
    client_handle.await.expect("release worker failed");
    println!("Finished!");
}
