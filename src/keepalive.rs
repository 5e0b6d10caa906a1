use {
    crate::{identity::HolderId, store::LockStore},
    std::time::Duration,
    tokio::{sync::oneshot, time::Instant},
    tracing::{trace, warn},
};

///
/// Handle to a background keep-alive task spawned by
/// [`crate::lock::ReentrantLock::keep_alive`].
///
/// The task refreshes the lock's TTL on a fixed schedule and stops on its
/// own when the lock is no longer owned. Dropping this handle also stops it.
///
pub struct KeepAlive {
    // Let this field dead, because when drop it will wake the renewal task so
    // it can stop.
    #[allow(dead_code)]
    _tx_terminate: oneshot::Sender<()>,
}

pub(crate) fn spawn_keep_alive<S>(
    store: S,
    name: String,
    holder: HolderId,
    ttl: Duration,
    interval: Option<Duration>,
) -> KeepAlive
where
    S: LockStore + Send + Sync + 'static,
{
    let (tx_terminate, mut rx_terminate) = oneshot::channel::<()>();
    let interval = interval.unwrap_or(ttl / 2);
    tokio::spawn(async move {
        let mut next_renewal = Instant::now() + interval;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_renewal) => {
                    match store.reacquire(&name, &holder, ttl).await {
                        Ok(true) => {
                            trace!("kept lock {name} alive for another {ttl:?}");
                            next_renewal += interval;
                        }
                        Ok(false) => {
                            warn!("lock {name} is no longer held by {holder}, stopping keep-alive");
                            break;
                        }
                        Err(e) => {
                            // Transport hiccup, retry at the next tick.
                            warn!("failed to keep lock {name} alive: {e}");
                            next_renewal += interval;
                        }
                    }
                }
                _ = &mut rx_terminate => {
                    trace!("keep-alive for lock {name} terminated");
                    break;
                }
            }
        }
    });
    KeepAlive {
        _tx_terminate: tx_terminate,
    }
}
