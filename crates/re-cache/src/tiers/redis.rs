//! Redis-backed tier: every value carries a fixed TTL, and `Size` is read
//! back from the server's own memory accounting rather than tracked
//! locally.

use crate::traits::{BoxedReader, Cache, CacheWriter};
use async_trait::async_trait;
use re_core::metrics::cache_metrics;
use re_core::{Error, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::io::Cursor;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;

const TIER: &str = "redis";

pub struct RedisCache {
    conn: ConnectionManager,
    ttl: Duration,
    unit_size_limit: i64,
}

impl RedisCache {
    pub async fn connect(url: &str, ttl: Duration, unit_size_limit: i64) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::internal(format!("invalid redis url: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::Unavailable(format!("redis connection failed: {e}")))?;
        Ok(Self {
            conn,
            ttl,
            unit_size_limit,
        })
    }

    fn map_err(e: redis::RedisError) -> Error {
        Error::Unavailable(format!("redis: {e}"))
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn contains(&self, key: &str) -> Result<bool> {
        // A `GET`, not `EXISTS`: the Open Question resolution is that a
        // successful read (even of an empty value) counts as present.
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(Self::map_err)?;
        Ok(value.is_some())
    }

    async fn find_missing(&self, keys: &[String]) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut missing = Vec::new();
        for key in keys {
            let value: Option<Vec<u8>> = conn.get(key).await.map_err(Self::map_err)?;
            if value.is_none() {
                missing.push(key.clone());
            }
        }
        Ok(missing)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(Self::map_err)?;
        if value.is_some() {
            cache_metrics().record_hit(TIER);
        } else {
            cache_metrics().record_miss(TIER);
        }
        Ok(value)
    }

    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let mut out = HashMap::new();
        for key in keys {
            if let Some(v) = self.get(key).await? {
                out.insert(key.clone(), v);
            }
        }
        Ok(out)
    }

    async fn set(&self, key: &str, data: Vec<u8>) -> Result<()> {
        if data.len() as i64 > self.unit_size_limit {
            return Err(Error::ResourceExhausted(format!(
                "blob of {} bytes exceeds redis tier unit limit of {}",
                data.len(),
                self.unit_size_limit
            )));
        }
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, data, self.ttl.as_secs())
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn set_multi(&self, items: HashMap<String, Vec<u8>>) -> Result<()> {
        for (k, v) in items {
            self.set(&k, v).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn reader(&self, key: &str, offset: i64) -> Result<BoxedReader> {
        let data = self.get(key).await?.ok_or_else(|| Error::not_found(key))?;
        let offset = offset.max(0) as usize;
        let slice = data.get(offset..).unwrap_or_default().to_vec();
        Ok(Box::pin(Cursor::new(slice)))
    }

    async fn writer(&self, key: &str) -> Result<Box<dyn CacheWriter>> {
        Ok(Box::new(RedisWriter {
            conn: self.conn.clone(),
            ttl: self.ttl,
            unit_size_limit: self.unit_size_limit,
            key: key.to_string(),
            buf: Vec::new(),
        }))
    }

    async fn check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn size(&self) -> i64 {
        let mut conn = self.conn.clone();
        let info: Result<String> = redis::cmd("INFO")
            .arg("memory")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err);
        info.ok()
            .and_then(|s| parse_used_memory(&s))
            .unwrap_or(0)
    }
}

/// Extract `used_memory:<n>` from a Redis `INFO memory` reply.
fn parse_used_memory(info: &str) -> Option<i64> {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory:"))
        .and_then(|v| v.trim().parse().ok())
}

struct RedisWriter {
    conn: ConnectionManager,
    ttl: Duration,
    unit_size_limit: i64,
    key: String,
    buf: Vec<u8>,
}

impl AsyncWrite for RedisWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl CacheWriter for RedisWriter {
    async fn commit(mut self: Box<Self>) -> Result<i64> {
        if self.buf.len() as i64 > self.unit_size_limit {
            return Err(Error::ResourceExhausted(format!(
                "blob of {} bytes exceeds redis tier unit limit of {}",
                self.buf.len(),
                self.unit_size_limit
            )));
        }
        let len = self.buf.len() as i64;
        let _: () = self
            .conn
            .set_ex(&self.key, self.buf, self.ttl.as_secs())
            .await
            .map_err(RedisCache::map_err)?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_used_memory_from_info_reply() {
        let info = "# Memory\r\nused_memory:104857600\r\nused_memory_human:100.00M\r\n";
        assert_eq!(parse_used_memory(info), Some(104_857_600));
    }

    #[test]
    fn missing_used_memory_line_yields_none() {
        assert_eq!(parse_used_memory("# Memory\r\nmaxmemory:0\r\n"), None);
    }
}
