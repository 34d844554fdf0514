//! Tunables named explicitly by the specification. These are defaults;
//! tiers and the scheduler may override them from configuration.

use std::time::Duration;

/// Maximum bytes sent per `ByteStream.Read` chunk.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Default unit size limit for the in-memory tier: it exists only for tiny,
/// frequently-accessed blobs such as `Action`/`Command` protos.
pub const MEMORY_UNIT_SIZE_LIMIT: i64 = 200;

/// Default unit size limit for the redis tier.
pub const REDIS_UNIT_SIZE_LIMIT: i64 = 10 * 1024 * 1024;

/// Default TTL applied to every redis `Set`.
pub const REDIS_DEFAULT_TTL: Duration = Duration::from_secs(3 * 60 * 60);

/// Consecutive heartbeat failures before a worker is marked broken.
pub const BREAK_TO_BROKEN: u32 = 10;

/// How long a worker may stay broken before the scheduler removes it.
pub const REMOVE_AFTER_BROKEN: Duration = Duration::from_secs(10);

/// Heartbeat interval.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// How long `AcquireClient` backs off before retrying when no worker is
/// available.
pub const NO_WORKER_BACKOFF: Duration = Duration::from_secs(60);

/// Target open-file ulimit raised at process startup.
pub const TARGET_FILE_ULIMIT: u64 = 4096;
