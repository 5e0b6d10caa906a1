use {once_cell::sync::Lazy, redis::Script};

// The lock record is a single hash per lock name:
//   token -> identity of the current holder
//   count -> reentrancy depth, >= 1 while the record exists
//
// Every mutation goes through one of the scripts below so that
// check-then-set sequences cannot interleave with other clients.

/// `KEYS[1]` lock name
/// `ARGV[1]` holder identity
/// `ARGV[2]` optional TTL in milliseconds
///
/// Returns 1 unless the lock is held by a different identity.
pub static ACQUIRE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local token = redis.call('hget', KEYS[1], 'token')
        if not token then
            redis.call('hset', KEYS[1], 'token', ARGV[1])
            redis.call('hset', KEYS[1], 'count', 0)
        elseif token ~= ARGV[1] then
            return 0
        end

        redis.call('hincrby', KEYS[1], 'count', 1)

        local ttl = tonumber(ARGV[2])
        if ttl then
            redis.call('pexpire', KEYS[1], ttl)
        end

        return 1
    "#,
    )
});

/// `KEYS[1]` lock name
/// `ARGV[1]` holder identity
///
/// Decrements the reentrancy count, deleting the record when it reaches zero.
/// Returns 1 if released, 0 if the identity does not hold the lock.
pub static RELEASE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local token = redis.call('hget', KEYS[1], 'token')
        if not token or token ~= ARGV[1] then
            return 0
        end

        local count = redis.call('hget', KEYS[1], 'count')
        if not count then
            return 0
        end

        count = redis.call('hincrby', KEYS[1], 'count', -1)
        if count == 0 then
            redis.call('del', KEYS[1])
        end
        return 1
    "#,
    )
});

/// `KEYS[1]` lock name
/// `ARGV[1]` holder identity
/// `ARGV[2]` additional milliseconds
/// `ARGV[3]` '1' to replace the remaining TTL, '0' to add to it
///
/// Returns 1 if the TTL was adjusted, 0 on token mismatch or when the record
/// has no remaining TTL to extend.
pub static EXTEND: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local token = redis.call('hget', KEYS[1], 'token')
        if not token or token ~= ARGV[1] then
            return 0
        end

        local expiration = redis.call('pttl', KEYS[1])
        if not expiration then
            expiration = 0
        end
        if expiration < 0 then
            return 0
        end

        local newttl = tonumber(ARGV[2])
        if ARGV[3] == '0' then
            newttl = newttl + expiration
        end
        redis.call('pexpire', KEYS[1], newttl)
        return 1
    "#,
    )
});

/// `KEYS[1]` lock name
/// `ARGV[1]` holder identity
/// `ARGV[2]` TTL in milliseconds
///
/// Unconditionally resets the TTL without touching the count. Returns 1 on
/// success, 0 on token mismatch.
pub static REACQUIRE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local token = redis.call('hget', KEYS[1], 'token')
        if not token or token ~= ARGV[1] then
            return 0
        end
        redis.call('pexpire', KEYS[1], ARGV[2])
        return 1
    "#,
    )
});
