//! Server-side Lua scripts.
//!
//! A state write and its change notification must be atomic: if they were
//! separate commands, a subscriber could aggregate the caches between the
//! two and then drop the notification as an echo, losing the change.

use redis::Script;

/// Writes (or deletes) one field of a state cache hash and publishes the
/// change notification in the same atomic step.
///
/// `KEYS[1]` cache hash, `ARGV[1]` user id, `ARGV[2]` serialized state
/// (empty string deletes), `ARGV[3]` topic, `ARGV[4]` message payload.
pub fn state_write() -> Script {
    Script::new(
        r#"
        if ARGV[2] == '' then
            redis.call('HDEL', KEYS[1], ARGV[1])
        else
            redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
        end
        redis.call('PUBLISH', ARGV[3], ARGV[4])
        return 1
        "#,
    )
}
