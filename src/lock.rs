use {
    crate::{
        identity::{HolderId, IdentityError},
        keepalive::{self, KeepAlive},
        store::{LockStore, StoreError},
    },
    futures::{future::join_all, FutureExt},
    serde::{Deserialize, Serialize},
    std::{
        future::Future,
        ops::{Deref, DerefMut},
        pin::Pin,
        task::{Context, Poll},
        time::{Duration, Instant},
    },
    thiserror::Error,
    tokio::{
        sync::mpsc,
        task::{JoinError, JoinHandle},
    },
    tracing::{error, info, trace, warn},
};

///
/// Tuning knobs for a [`ReentrantLock`] handle.
///
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    ///
    /// Auto-expiry applied to the lock record on every successful acquire.
    ///
    /// `None` disables expiry entirely, which is discouraged outside tests: a
    /// holder that crashes before releasing then wedges the lock forever.
    ///
    pub timeout: Option<Duration>,

    ///
    /// Interval between acquire retries while the lock is contended.
    ///
    pub sleep: Duration,

    ///
    /// Whether `acquire` waits for a contended lock at all.
    ///
    pub blocking: bool,

    ///
    /// Upper bound on the total wait of one `acquire` call. `None` waits
    /// forever.
    ///
    pub blocking_timeout: Option<Duration>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            sleep: Duration::from_millis(100),
            blocking: true,
            blocking_timeout: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock was never acquired through this handle")]
    NotLocked,
    #[error("lock is no longer owned by this holder")]
    NotOwned,
    #[error("failed to acquire lock within the configured blocking policy")]
    AcquireFailed,
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

enum ReleaseQueueCommand {
    Release {
        name: String,
        holder: HolderId,
        done: mpsc::UnboundedSender<()>,
    },
}

///
/// Join handle for the background release worker. Await it after dropping
/// every [`LockClient`] clone to shut down gracefully.
///
pub struct LockClientHandle {
    inner: JoinHandle<()>,
}

impl Future for LockClientHandle {
    type Output = Result<(), JoinError>;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

///
/// Resolves once the background worker has executed the release queued by a
/// dropped [`LockGuard`].
///
pub struct ReleaseDone {
    done_rx: mpsc::UnboundedReceiver<()>,
}

impl Future for ReleaseDone {
    type Output = ();
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.done_rx.poll_recv(cx) {
            Poll::Ready(Some(_)) => Poll::Ready(()),
            Poll::Ready(None) => Poll::Ready(()),
            Poll::Pending => Poll::Pending,
        }
    }
}

///
/// Creates a lock client whose guards release through a background worker.
///
/// [`LockGuard`]s queue their release on drop instead of awaiting it, so a
/// guard dropped on any exit path (early return, error, cancelled future)
/// still releases its acquisition. The worker stops once every
/// [`LockClient`] clone is dropped; await the [`LockClientHandle`] to let it
/// drain the queue.
///
/// ```no_run
/// use redis_reentrant_lock::{spawn_lock_client, RedisLockStore};
///
/// # #[tokio::main]
/// # async fn main() {
/// let store = RedisLockStore::connect("redis://localhost:6379")
///     .await
///     .expect("failed to connect to redis");
/// let (handle, client) = spawn_lock_client(store);
///
/// let mut lock = client.lock("jobs:nightly");
/// assert!(lock.acquire().await.expect("store failure"));
/// // ... critical section ...
/// lock.release().await.expect("failed to release");
///
/// drop(client);
/// handle.await.expect("release worker failed");
/// # }
/// ```
///
pub fn spawn_lock_client<S>(store: S) -> (LockClientHandle, LockClient<S>)
where
    S: LockStore + Clone + Send + Sync + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (entangled_tx, mut entangled_rx) = mpsc::unbounded_channel::<()>();
    let store2 = store.clone();
    let tx2 = tx.clone();
    let handle = tokio::spawn(async move {
        let _tx2 = tx2;
        loop {
            let cmd = tokio::select! {
                cmd = rx.recv() => {
                    cmd.expect("command rx dropped")
                }
                maybe = entangled_rx.recv() => {
                    match maybe {
                        Some(_) => unreachable!("entangled_rx should not carry any message"),
                        None => {
                            // If entangled_rx is closed, no LockClient instance is alive anymore.
                            break
                        },
                    }
                }
            };
            match cmd {
                ReleaseQueueCommand::Release { name, holder, done } => {
                    let result = store2.release(&name, &holder).await;
                    let _ = done.send(());
                    match result {
                        Ok(true) => {
                            info!("Released lock {name}");
                        }
                        Ok(false) => {
                            warn!("Lock {name} was no longer owned by {holder} at release");
                        }
                        Err(e) => {
                            error!("Failed to release lock {name}: {e}");
                        }
                    }
                }
            }
        }
        // Drain any remaining release commands
        let mut futures = vec![];
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                ReleaseQueueCommand::Release { name, holder, done } => {
                    let store = store2.clone();
                    let fut = async move {
                        let result = store.release(&name, &holder).await;
                        let _ = done.send(());
                        result
                    };
                    futures.push(fut);
                }
            }
        }
        // The worker is exiting, nothing left to report failures to.
        let _ = join_all(futures).await;
    });
    let handle = LockClientHandle { inner: handle };
    (
        handle,
        LockClient {
            store,
            release_tx: tx,
            lock_client_handle_entangled_tx: entangled_tx,
        },
    )
}

///
/// Factory for [`ReentrantLock`] handles sharing one store connection and one
/// release worker. Cloning is cheap and clones can be shared across tasks.
///
#[derive(Clone)]
pub struct LockClient<S> {
    store: S,
    release_tx: mpsc::UnboundedSender<ReleaseQueueCommand>,

    #[allow(dead_code)]
    // When all senders to this channel are dropped, the release worker stops.
    lock_client_handle_entangled_tx: mpsc::UnboundedSender<()>,
}

impl<S> LockClient<S>
where
    S: LockStore + Clone,
{
    ///
    /// Open a handle on the named lock with the default [`LockConfig`].
    ///
    pub fn lock<N>(&self, name: N) -> ReentrantLock<S>
    where
        N: Into<String>,
    {
        self.lock_with(name, LockConfig::default())
    }

    pub fn lock_with<N>(&self, name: N, config: LockConfig) -> ReentrantLock<S>
    where
        N: Into<String>,
    {
        ReentrantLock {
            store: self.store.clone(),
            name: name.into(),
            config,
            holder: None,
            local_token: None,
            local_depth: 0,
            release_tx: self.release_tx.clone(),
        }
    }
}

///
/// Handle on a named reentrant lock.
///
/// The same holder identity may acquire the lock any number of times and must
/// release it as many times before a different identity can take it. The
/// authoritative reentrancy depth lives in the store record; this handle only
/// tracks the token it last acquired with and how many of its own acquires
/// are still outstanding.
///
/// Every mutating operation takes `&mut self`, so one handle cannot be shared
/// across tasks; open one handle per task (they coordinate through the store)
/// or pin an explicit identity with [`ReentrantLock::with_holder`].
///
pub struct ReentrantLock<S> {
    store: S,
    name: String,
    config: LockConfig,
    holder: Option<HolderId>,
    local_token: Option<HolderId>,
    local_depth: u32,
    release_tx: mpsc::UnboundedSender<ReleaseQueueCommand>,
}

impl<S> ReentrantLock<S>
where
    S: LockStore,
{
    ///
    /// Pin an explicit holder identity instead of deriving one from the
    /// current host and thread/task. Use this when pooled workers act on
    /// behalf of logical owners (sessions, requests) so that reentrancy
    /// follows the owner, not the thread it happens to run on.
    ///
    pub fn with_holder(mut self, holder: HolderId) -> Self {
        self.holder = Some(holder);
        self
    }

    pub fn with_config(mut self, config: LockConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    ///
    /// Acquire the lock, retrying per the configured blocking policy.
    ///
    /// Returns `Ok(true)` on success (including reentrant success) and
    /// `Ok(false)` when the lock is contended and the policy gave up; a
    /// timed-out wait is an expected outcome, not an error. The sleep between
    /// retries is the only suspension point, and the returned future holds
    /// nothing across it: dropping the future (e.g. inside `tokio::select!`
    /// or `tokio::time::timeout`) cancels the wait cleanly.
    ///
    pub async fn acquire(&mut self) -> Result<bool, LockError> {
        let blocking = self.config.blocking;
        self.acquire_inner(blocking).await
    }

    ///
    /// Single non-blocking acquire attempt, regardless of the configured
    /// blocking policy.
    ///
    pub async fn try_acquire(&mut self) -> Result<bool, LockError> {
        self.acquire_inner(false).await
    }

    async fn acquire_inner(&mut self, blocking: bool) -> Result<bool, LockError> {
        let holder = self.current_holder()?;
        let deadline = self
            .config
            .blocking_timeout
            .map(|timeout| Instant::now() + timeout);
        loop {
            if self
                .store
                .acquire(&self.name, &holder, self.config.timeout)
                .await?
            {
                self.local_token = Some(holder);
                self.local_depth += 1;
                trace!("acquired lock {} (depth {})", self.name, self.local_depth);
                return Ok(true);
            }
            if !blocking {
                return Ok(false);
            }
            // Give up when the next retry would land past the deadline.
            if let Some(deadline) = deadline {
                if Instant::now() + self.config.sleep > deadline {
                    return Ok(false);
                }
            }
            tokio::time::sleep(self.config.sleep).await;
        }
    }

    ///
    /// Release one level of the lock.
    ///
    /// Fails with [`LockError::NotOwned`] when the store no longer shows this
    /// handle's token, which means the lock expired or was taken over; that
    /// is an ordering bug upstream and is never silently swallowed.
    ///
    pub async fn release(&mut self) -> Result<(), LockError> {
        let token = self.local_token.clone().ok_or(LockError::NotLocked)?;
        if !self.store.release(&self.name, &token).await? {
            return Err(LockError::NotOwned);
        }
        self.local_depth = self.local_depth.saturating_sub(1);
        if self.local_depth == 0 {
            self.local_token = None;
        }
        trace!("released lock {} (depth {})", self.name, self.local_depth);
        Ok(())
    }

    ///
    /// Add `additional` to the record's remaining TTL, or replace the TTL
    /// outright when `replace` is set.
    ///
    pub async fn extend(&mut self, additional: Duration, replace: bool) -> Result<(), LockError> {
        let token = self.local_token.clone().ok_or(LockError::NotLocked)?;
        if !self
            .store
            .extend(&self.name, &token, additional, replace)
            .await?
        {
            return Err(LockError::NotOwned);
        }
        Ok(())
    }

    ///
    /// Reset the record's TTL to `ttl` without touching the reentrancy count.
    /// This is the heartbeat primitive; see [`ReentrantLock::keep_alive`] for
    /// the managed version.
    ///
    pub async fn reacquire(&mut self, ttl: Duration) -> Result<(), LockError> {
        let token = self.local_token.clone().ok_or(LockError::NotLocked)?;
        if !self.store.reacquire(&self.name, &token, ttl).await? {
            return Err(LockError::NotOwned);
        }
        Ok(())
    }

    ///
    /// Whether the store record still carries this handle's token. Use before
    /// risky operations to assert ownership survived the TTL.
    ///
    pub async fn owned(&self) -> Result<bool, LockError> {
        let Some(token) = &self.local_token else {
            return Ok(false);
        };
        let stored = self.store.read_token(&self.name).await?;
        Ok(stored.as_deref() == Some(token.as_str()))
    }

    ///
    /// Acquire and return a guard that queues its release on the background
    /// worker when dropped. Fails with [`LockError::AcquireFailed`] when the
    /// configured blocking policy gives up.
    ///
    pub async fn acquire_guard(&mut self) -> Result<LockGuard<'_, S>, LockError> {
        self.acquire_guard_with_release_done()
            .await
            .map(|(guard, _)| guard)
    }

    ///
    /// Like [`ReentrantLock::acquire_guard`], additionally returning a future
    /// that resolves once the release has actually executed.
    ///
    pub async fn acquire_guard_with_release_done(
        &mut self,
    ) -> Result<(LockGuard<'_, S>, ReleaseDone), LockError> {
        if self.release_tx.is_closed() {
            panic!("LockClient release worker is stopped.");
        }
        if !self.acquire().await? {
            return Err(LockError::AcquireFailed);
        }
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Ok((
            LockGuard {
                lock: self,
                done_tx,
                released: false,
            },
            ReleaseDone { done_rx },
        ))
    }

    ///
    /// Run `f` while holding the lock: acquire on entry, release on every
    /// exit path. A normal return or an error inside `f` releases inline; a
    /// cancelled scope future releases through the guard's drop path.
    ///
    pub async fn scope<T, F, Fut>(&mut self, f: F) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.acquire_guard().await?;
        let output = f().await;
        guard.release().await?;
        Ok(output)
    }

    fn current_holder(&self) -> Result<HolderId, LockError> {
        match &self.holder {
            Some(holder) => Ok(holder.clone()),
            None => Ok(HolderId::resolve()?),
        }
    }
}

impl<S> ReentrantLock<S>
where
    S: LockStore + Clone + Send + Sync + 'static,
{
    ///
    /// Spawn a background task that refreshes the record's TTL to `ttl` every
    /// `interval` (default `ttl / 2`) for as long as the lock stays owned.
    /// Dropping the returned [`KeepAlive`] stops the task.
    ///
    pub fn keep_alive(&self, ttl: Duration, interval: Option<Duration>) -> Result<KeepAlive, LockError> {
        let token = self.local_token.clone().ok_or(LockError::NotLocked)?;
        Ok(keepalive::spawn_keep_alive(
            self.store.clone(),
            self.name.clone(),
            token,
            ttl,
            interval,
        ))
    }
}

///
/// RAII guard for one acquisition level of a [`ReentrantLock`].
///
/// Dropping the guard queues the release on the client's background worker,
/// so the acquisition is undone even when the owning future is cancelled.
/// Prefer [`LockGuard::release`] on the happy path to observe release errors.
///
pub struct LockGuard<'a, S>
where
    S: LockStore,
{
    lock: &'a mut ReentrantLock<S>,
    done_tx: mpsc::UnboundedSender<()>,
    released: bool,
}

impl<S> LockGuard<'_, S>
where
    S: LockStore,
{
    ///
    /// Release this acquisition level inline, surfacing any
    /// [`LockError::NotOwned`] failure to the caller.
    ///
    pub async fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        let result = self.lock.release().await;
        let _ = self.done_tx.send(());
        result
    }
}

impl<S> Deref for LockGuard<'_, S>
where
    S: LockStore,
{
    type Target = ReentrantLock<S>;
    fn deref(&self) -> &Self::Target {
        self.lock
    }
}

impl<S> DerefMut for LockGuard<'_, S>
where
    S: LockStore,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.lock
    }
}

impl<S> Drop for LockGuard<'_, S>
where
    S: LockStore,
{
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Some(token) = self.lock.local_token.clone() else {
            return;
        };
        self.lock.local_depth = self.lock.local_depth.saturating_sub(1);
        if self.lock.local_depth == 0 {
            self.lock.local_token = None;
        }
        let _ = self.lock.release_tx.send(ReleaseQueueCommand::Release {
            name: self.lock.name.clone(),
            holder: token,
            done: self.done_tx.clone(),
        });
    }
}
