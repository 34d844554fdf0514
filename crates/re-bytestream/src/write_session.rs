//! The `ByteStream.Write` state machine, transport-agnostic: the gRPC
//! service in `re-server` feeds it one request at a time and forwards the
//! outcome.
//!
//! ```text
//!  Init ── recv(first) ──► Parsed ── offset==committed ──► Writing
//!             │                            │
//!             │  empty-hash ──► Closed(0)   │
//!             │  already-cached ──► Closed(size)
//!             ▼                            ▼
//!          rejected                finish_write? ──► Verify ──► Closed(n)
//! ```

use re_cache::Cache;
use re_core::{Error, ResourceName, Result};
use sha2::{Digest as _, Sha256};
use std::sync::Arc;

#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// More data expected; `committed` bytes received so far.
    Continue { committed: i64 },
    /// The write is done (either just now or because the blob was already
    /// present); `committed` is the final size.
    Closed { committed: i64 },
}

enum State {
    Init,
    Writing {
        resource: ResourceName,
        committed: i64,
        hasher: Sha256,
        writer: Box<dyn re_cache::CacheWriter>,
    },
    Closed,
}

/// Drives one client's `Write` stream against a CAS cache already scoped
/// to the right instance via [`re_cache::with_isolation`].
pub struct WriteSession {
    cas: Arc<dyn Cache>,
    state: State,
}

impl WriteSession {
    pub fn new(cas: Arc<dyn Cache>) -> Self {
        Self {
            cas,
            state: State::Init,
        }
    }

    /// Feed one `WriteRequest`'s fields through the state machine.
    pub async fn handle(
        &mut self,
        resource_name: &str,
        write_offset: i64,
        data: &[u8],
        finish_write: bool,
    ) -> Result<WriteOutcome> {
        if matches!(self.state, State::Init) {
            if let Some(outcome) = self.start(resource_name, write_offset).await? {
                return Ok(outcome);
            }
        }

        let State::Writing {
            resource,
            committed,
            hasher,
            writer,
        } = &mut self.state
        else {
            return Err(Error::FailedPrecondition(
                "write called after stream already closed".to_string(),
            ));
        };

        if write_offset != *committed {
            return Err(Error::invalid_argument(format!(
                "non-monotonic write_offset {write_offset}, expected {committed}"
            )));
        }

        if !data.is_empty() {
            use tokio::io::AsyncWriteExt;
            writer
                .write_all(data)
                .await
                .map_err(|e| Error::internal(format!("writing blob chunk: {e}")))?;
            hasher.update(data);
            *committed += data.len() as i64;
        }

        if !finish_write {
            return Ok(WriteOutcome::Continue {
                committed: *committed,
            });
        }

        let digest = resource.digest.clone();
        let committed = *committed;
        let computed_hash = hex::encode(hasher.clone().finalize());

        let State::Writing { writer, .. } = std::mem::replace(&mut self.state, State::Closed) else {
            unreachable!()
        };

        if committed != digest.size_bytes || computed_hash != digest.hash {
            // Drop path: abandon the writer without committing.
            drop(writer);
            return Err(Error::invalid_argument(format!(
                "blob verification failed: committed={committed} expected_size={} hash={computed_hash} expected_hash={}",
                digest.size_bytes, digest.hash
            )));
        }

        writer.commit().await?;
        Ok(WriteOutcome::Closed { committed })
    }

    /// Parses the resource name and handles the two first-request short
    /// circuits. Returns `Some(outcome)` if the stream closed immediately,
    /// `None` if the caller should proceed to write `data` in `Writing`.
    async fn start(&mut self, resource_name: &str, write_offset: i64) -> Result<Option<WriteOutcome>> {
        let resource = ResourceName::parse(resource_name)
            .map_err(|e| Error::invalid_argument(format!("malformed resource name: {e}")))?;

        if write_offset != 0 {
            return Err(Error::invalid_argument(
                "first write request must start at offset 0",
            ));
        }

        if resource.digest.is_empty() {
            self.state = State::Closed;
            return Ok(Some(WriteOutcome::Closed { committed: 0 }));
        }

        if self.cas.contains(&resource.digest.hash).await? {
            self.state = State::Closed;
            return Ok(Some(WriteOutcome::Closed {
                committed: resource.digest.size_bytes,
            }));
        }

        let writer = self.cas.writer(&resource.digest.hash).await?;
        self.state = State::Writing {
            resource,
            committed: 0,
            hasher: Sha256::new(),
            writer,
        };
        Ok(None)
    }

    /// Whether the very first request already closed the stream (either
    /// via the empty-hash short circuit or an at-most-once commit hit).
    pub fn closed_immediately(&self) -> bool {
        matches!(self.state, State::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use re_cache::tiers::memory::MemoryCache;

    fn resource_name(hash: &str, size: i64) -> String {
        format!("uploads/11111111-1111-1111-1111-111111111111/blobs/{hash}/{size}")
    }

    #[tokio::test]
    async fn small_blob_roundtrips() {
        let cas: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let data = b"hello world";
        let hash = hex::encode(Sha256::digest(data));
        let mut session = WriteSession::new(cas.clone());
        let outcome = session
            .handle(&resource_name(&hash, data.len() as i64), 0, data, true)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WriteOutcome::Closed {
                committed: data.len() as i64
            }
        );
        assert_eq!(cas.get(&hash).await.unwrap(), Some(data.to_vec()));
    }

    #[tokio::test]
    async fn chunked_write_accumulates_and_verifies() {
        let cas: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let data = b"chunk1chunk2chunk3";
        let hash = hex::encode(Sha256::digest(data));
        let mut session = WriteSession::new(cas.clone());
        let name = resource_name(&hash, data.len() as i64);

        let out1 = session.handle(&name, 0, b"chunk1", false).await.unwrap();
        assert_eq!(out1, WriteOutcome::Continue { committed: 6 });
        let out2 = session.handle(&name, 6, b"chunk2", false).await.unwrap();
        assert_eq!(out2, WriteOutcome::Continue { committed: 12 });
        let out3 = session.handle(&name, 12, b"chunk3", true).await.unwrap();
        assert_eq!(out3, WriteOutcome::Closed { committed: 18 });
        assert_eq!(cas.get(&hash).await.unwrap(), Some(data.to_vec()));
    }

    #[tokio::test]
    async fn hash_mismatch_is_rejected_and_nothing_is_stored() {
        let cas: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let data = b"real data";
        let claimed_hash = hex::encode(Sha256::digest(b"different data"));
        let mut session = WriteSession::new(cas.clone());
        let name = resource_name(&claimed_hash, data.len() as i64);
        let err = session.handle(&name, 0, data, true).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(!cas.contains(&claimed_hash).await.unwrap());
    }

    #[tokio::test]
    async fn non_monotonic_offset_is_rejected() {
        let cas: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let data = b"0123456789";
        let hash = hex::encode(Sha256::digest(data));
        let mut session = WriteSession::new(cas.clone());
        let name = resource_name(&hash, data.len() as i64);
        session.handle(&name, 0, b"01234", false).await.unwrap();
        let err = session.handle(&name, 99, b"56789", true).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn empty_hash_short_circuits_without_storage() {
        let cas: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let mut session = WriteSession::new(cas.clone());
        let name = resource_name(re_core::EMPTY_SHA, 0);
        let outcome = session.handle(&name, 0, b"", true).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Closed { committed: 0 });
        assert!(session.closed_immediately());
    }

    #[tokio::test]
    async fn already_cached_blob_short_circuits() {
        let cas: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let data = b"already here";
        let hash = hex::encode(Sha256::digest(data));
        cas.set(&hash, data.to_vec()).await.unwrap();

        let mut session = WriteSession::new(cas.clone());
        let name = resource_name(&hash, data.len() as i64);
        let outcome = session.handle(&name, 0, data, true).await.unwrap();
        assert_eq!(
            outcome,
            WriteOutcome::Closed {
                committed: data.len() as i64
            }
        );
        assert!(session.closed_immediately());
    }
}
