//! `ByteStream.QueryWriteStatus`: partial uploads are not resumable in
//! this design, so the only meaningful answer is "fully present" or
//! `NotFound`.

use re_cache::Cache;
use re_core::{Error, ResourceName, Result};
use std::sync::Arc;

#[derive(Debug)]
pub struct WriteStatus {
    pub committed_size: i64,
    pub complete: bool,
}

pub async fn query_write_status(cas: Arc<dyn Cache>, resource_name: &str) -> Result<WriteStatus> {
    let resource = ResourceName::parse(resource_name)
        .map_err(|e| Error::invalid_argument(format!("malformed resource name: {e}")))?;

    if resource.digest.is_empty() {
        return Ok(WriteStatus {
            committed_size: 0,
            complete: true,
        });
    }

    match cas.get(&resource.digest.hash).await? {
        Some(data) => Ok(WriteStatus {
            committed_size: data.len() as i64,
            complete: true,
        }),
        None => Err(Error::not_found(resource.digest.hash)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use re_cache::tiers::memory::MemoryCache;
    use sha2::Digest as _;

    #[tokio::test]
    async fn present_blob_reports_complete() {
        let cas: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let data = b"hello".to_vec();
        let hash = hex::encode(sha2::Sha256::digest(&data));
        cas.set(&hash, data.clone()).await.unwrap();

        let status = query_write_status(cas, &format!("blobs/{hash}/{}", data.len()))
            .await
            .unwrap();
        assert!(status.complete);
        assert_eq!(status.committed_size, 5);
    }

    #[tokio::test]
    async fn absent_blob_is_not_found() {
        let cas: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let err = query_write_status(cas, "blobs/deadbeef/4").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
