use {
    super::{LockStore, StoreError},
    crate::{identity::HolderId, scripts},
    async_trait::async_trait,
    redis::aio::ConnectionManager,
    std::time::Duration,
    tracing::trace,
};

///
/// Lock store backed by a Redis-compatible server.
///
/// Every mutation runs one of the scripts in [`crate::scripts`] so the
/// check-then-set sequences stay atomic server-side. The connection manager
/// is injected at construction and can be shared with the rest of the
/// application; cloning the store is cheap.
///
#[derive(Clone)]
pub struct RedisLockStore {
    connection: ConnectionManager,
}

impl RedisLockStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    ///
    /// Convenience constructor from a Redis URL, e.g.
    /// `redis://localhost:6379`.
    ///
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::new(connection))
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn acquire(
        &self,
        name: &str,
        holder: &HolderId,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let mut invocation = scripts::ACQUIRE.prepare_invoke();
        invocation.key(name).arg(holder.as_str());
        if let Some(ttl) = ttl {
            invocation.arg(ttl.as_millis() as u64);
        }
        let granted: i32 = invocation.invoke_async(&mut conn).await?;
        trace!("acquire {name} as {holder}: granted={granted}");
        Ok(granted == 1)
    }

    async fn release(&self, name: &str, holder: &HolderId) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let released: i32 = scripts::RELEASE
            .key(name)
            .arg(holder.as_str())
            .invoke_async(&mut conn)
            .await?;
        trace!("release {name} as {holder}: released={released}");
        Ok(released == 1)
    }

    async fn extend(
        &self,
        name: &str,
        holder: &HolderId,
        additional: Duration,
        replace: bool,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let extended: i32 = scripts::EXTEND
            .key(name)
            .arg(holder.as_str())
            .arg(additional.as_millis() as u64)
            .arg(if replace { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn reacquire(
        &self,
        name: &str,
        holder: &HolderId,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let reacquired: i32 = scripts::REACQUIRE
            .key(name)
            .arg(holder.as_str())
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(reacquired == 1)
    }

    async fn read_token(&self, name: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let token: Option<String> = redis::cmd("HGET")
            .arg(name)
            .arg("token")
            .query_async(&mut conn)
            .await?;
        Ok(token)
    }
}
