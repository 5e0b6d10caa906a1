use {
    std::{
        fmt,
        hash::{Hash, Hasher},
    },
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to resolve hostname: {0}")]
    Hostname(#[source] std::io::Error),
}

///
/// Identity of a lock holder, stored in the lock record as the `token` field.
///
/// Reentrancy hinges on this value: an acquire attempt whose identity equals
/// the stored token is treated as the *same* holder and increments the
/// reentrancy count instead of failing. The default derivation
/// ([`HolderId::resolve`]) is `host:pid-task-N` / `host:pid-thread-N`, which
/// means two unrelated call sites running on the same thread or task share an
/// identity and can reenter each other's critical sections. Callers that pool
/// worker threads/tasks across logical owners should supply an explicit
/// identity (a session or request id) via [`HolderId::new`] instead.
///
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HolderId(String);

impl HolderId {
    ///
    /// Build an identity from a caller-chosen logical owner id.
    ///
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    ///
    /// Derive an identity for the current execution context.
    ///
    /// Stable across repeated calls from the same thread (or tokio task) for
    /// the life of the process, distinct across machines, processes, threads
    /// and tasks. Pure read of host/OS identity; the only failure mode is an
    /// unreadable hostname, which is fatal for lock usage.
    ///
    pub fn resolve() -> Result<Self, IdentityError> {
        let host = hostname::get().map_err(IdentityError::Hostname)?;
        let host = host.to_string_lossy();
        let pid = std::process::id();
        let id = match tokio::task::try_id() {
            Some(task_id) => format!("{host}:{pid}-task-{task_id}"),
            None => format!("{host}:{pid}-thread-{}", current_thread_token()),
        };
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HolderId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// `ThreadId::as_u64` is nightly-only, so hash the opaque id instead.
// `DefaultHasher::new` is keyed deterministically within a process, which is
// all the stability the token needs.
fn current_thread_token() -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}
