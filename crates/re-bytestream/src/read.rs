//! `ByteStream.Read`: parse the resource name, open a reader at the
//! requested offset, and chunk it into a stream of byte vectors no
//! caller-facing type (tonic or otherwise) needs to know about.

use re_cache::Cache;
use re_core::{Error, ResourceName, Result};
use std::sync::Arc;

pub const CHUNK_SIZE: usize = re_core::constants::CHUNK_SIZE;

/// Resolve `resource_name` against `cas` and return the chunks to send,
/// honoring `read_limit` (0 means unbounded). Collects eagerly rather than
/// returning a `Stream`, since the transport layer re-chunks regardless;
/// `re-server` wraps this in a `tokio_stream::once`/`iter` as needed.
pub async fn read_chunks(
    cas: Arc<dyn Cache>,
    resource_name: &str,
    read_offset: i64,
    read_limit: i64,
) -> Result<Vec<Vec<u8>>> {
    if read_offset < 0 {
        return Err(Error::OutOfRange("read_offset must be non-negative".to_string()));
    }
    if read_limit < 0 {
        return Err(Error::OutOfRange("read_limit must be non-negative".to_string()));
    }

    let resource = ResourceName::parse(resource_name)
        .map_err(|e| Error::invalid_argument(format!("malformed resource name: {e}")))?;

    let mut reader = cas.reader(&resource.digest.hash, read_offset).await?;

    let mut remaining = if read_limit == 0 { i64::MAX } else { read_limit };
    let mut chunks = Vec::new();
    use tokio::io::AsyncReadExt;
    loop {
        if remaining <= 0 {
            break;
        }
        let want = (CHUNK_SIZE as i64).min(remaining) as usize;
        let mut buf = vec![0u8; want];
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| Error::internal(format!("reading blob chunk: {e}")))?;
        if n == 0 {
            break;
        }
        buf.truncate(n);
        remaining -= n as i64;
        chunks.push(buf);
    }
    Ok(chunks)
}
