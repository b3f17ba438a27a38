//! Remote cache client (component D): a thin wrapper over a Redis
//! connection that backs the viewport-result cache, the tile cache, and
//! cross-process precompute leases.
//!
//! Every operation degrades gracefully — a read failure or disconnected
//! client yields a miss, a write failure is logged and dropped — so a
//! Redis outage turns the service into an uncached one rather than a dead
//! one (spec.md §7's cache degradation rule).
//!
//! Grounded on `meridian-cache`'s `RedisCache` (`redis::aio::ConnectionManager`
//! plus raw `redis::cmd(...)` calls rather than the higher-level typed API),
//! adapted from that crate's stats-tracking wrapper to this service's
//! fail-open requirement.

use redis::aio::ConnectionManager;

/// A connected (or permanently degraded) handle to the remote cache.
/// Cloning is cheap: `ConnectionManager` multiplexes over one underlying
/// connection.
#[derive(Clone)]
pub struct Cache {
    conn: Option<ConnectionManager>,
}

impl Cache {
    /// Connects to `redis_url`. On any failure, logs a warning and returns a
    /// cache that behaves as permanently empty — callers never see the
    /// difference between "cache miss" and "cache down".
    pub async fn connect(redis_url: &str) -> Self {
        let client = match redis::Client::open(redis_url) {
            Ok(client) => client,
            Err(error) => {
                tracing::warn!(%error, "invalid redis url, caching disabled");
                return Self { conn: None };
            }
        };

        match ConnectionManager::new(client).await {
            Ok(conn) => {
                tracing::info!("connected to redis cache");
                Self { conn: Some(conn) }
            }
            Err(error) => {
                tracing::warn!(%error, "failed to connect to redis, caching disabled");
                Self { conn: None }
            }
        }
    }

    /// A cache that never talks to Redis; used in tests and when caching is
    /// explicitly disabled.
    pub fn disabled() -> Self {
        Self { conn: None }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone()?;
        match redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await
        {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(%error, key, "cache get failed");
                None
            }
        }
    }

    /// Positional results line up with `keys`; a miss or failure yields
    /// `None` at that position without failing the rest of the batch.
    pub async fn mget(&self, keys: &[String]) -> Vec<Option<String>> {
        if keys.is_empty() {
            return Vec::new();
        }
        let Some(mut conn) = self.conn.clone() else {
            return vec![None; keys.len()];
        };
        match redis::cmd("MGET")
            .arg(keys)
            .query_async::<Vec<Option<String>>>(&mut conn)
            .await
        {
            Ok(values) => values,
            Err(error) => {
                tracing::warn!(%error, count = keys.len(), "cache mget failed");
                vec![None; keys.len()]
            }
        }
    }

    pub async fn setex(&self, key: &str, ttl_secs: u64, value: &str) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        if let Err(error) = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
        {
            tracing::warn!(%error, key, "cache setex failed");
        }
    }

    /// A batch of `SETEX`s flushed together; used by the precomputer to
    /// avoid a round trip per tile.
    pub fn pipeline(&self) -> CachePipeline {
        CachePipeline {
            conn: self.conn.clone(),
            pipe: redis::pipe(),
            queued: 0,
        }
    }

    /// Attempts to acquire a distributed lock under the literal key `name`
    /// via `SET NX EX`. Returns `None` both when another process holds it
    /// and when Redis is unreachable — callers cannot distinguish "lost the
    /// race" from "cache down" and must treat both as "don't run this work".
    pub async fn acquire_lease(&self, name: &str, ttl_secs: u64) -> Option<LeaseHandle> {
        let mut conn = self.conn.clone()?;
        let acquired = redis::cmd("SET")
            .arg(name)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<Option<String>>(&mut conn)
            .await
            .unwrap_or(None);

        if acquired.as_deref() == Some("OK") {
            Some(LeaseHandle {
                conn,
                key: name.to_string(),
            })
        } else {
            None
        }
    }

    /// Sets `key` to `value` with no expiry, used for durable markers such
    /// as the precompute-done flag.
    pub async fn set_forever(&self, key: &str, value: &str) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        if let Err(error) = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
        {
            tracing::warn!(%error, key, "cache set failed");
        }
    }
}

/// A batch of queued `SETEX` commands. `execute` sends and clears the
/// batch; a fresh one can be started immediately after.
pub struct CachePipeline {
    conn: Option<ConnectionManager>,
    pipe: redis::Pipeline,
    queued: usize,
}

impl CachePipeline {
    pub fn setex(&mut self, key: &str, ttl_secs: u64, value: &str) -> &mut Self {
        self.pipe.cmd("SETEX").arg(key).arg(ttl_secs).arg(value);
        self.queued += 1;
        self
    }

    pub fn len(&self) -> usize {
        self.queued
    }

    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    /// Sends the queued batch, if any, and resets it. A failure is logged
    /// and swallowed; the precomputer can keep going with the next batch.
    pub async fn execute(&mut self) {
        if self.queued == 0 {
            return;
        }
        if let Some(conn) = self.conn.as_mut() {
            if let Err(error) = self.pipe.query_async::<()>(conn).await {
                tracing::warn!(%error, queued = self.queued, "cache pipeline flush failed");
            }
        }
        self.pipe = redis::pipe();
        self.queued = 0;
    }
}

/// Holds a distributed lease. Dropping without calling `release` leaves the
/// lease to expire on its own TTL; `release` lets a successful run free it
/// early rather than blocking other instances for the full TTL.
pub struct LeaseHandle {
    conn: ConnectionManager,
    key: String,
}

impl LeaseHandle {
    pub async fn release(mut self) {
        if let Err(error) = redis::cmd("DEL")
            .arg(&self.key)
            .query_async::<()>(&mut self.conn)
            .await
        {
            tracing::warn!(%error, key = %self.key, "failed to release lease, will expire on TTL");
        }
    }
}
