//! Action-result validation: every digest an `ActionResult` references
//! must still be present in CAS before the result is trusted as a cache
//! hit.

use futures::future::try_join_all;
use re_cache::Cache;
use re_core::{Digest, Error, Result};
use std::sync::Arc;

pub struct OutputFile {
    pub digest: Digest,
}

pub struct OutputDirectory {
    pub tree_digest: Digest,
}

pub struct ActionResultView {
    pub output_files: Vec<OutputFile>,
    pub output_directories: Vec<OutputDirectory>,
}

pub struct FileNode {
    pub digest: Digest,
}

pub struct DirectoryView {
    pub files: Vec<FileNode>,
}

pub struct TreeView {
    pub root: DirectoryView,
    pub children: Vec<DirectoryView>,
}

/// Validate `result` against `cache` (CAS-scoped). `decode_tree` unmarshals
/// the raw `Tree` proto bytes fetched for each output directory; it is
/// injected so this module has no dependency on a specific proto crate.
pub async fn validate(
    cache: Arc<dyn Cache>,
    result: &ActionResultView,
    decode_tree: impl Fn(&[u8]) -> Result<TreeView> + Send + Sync,
) -> Result<()> {
    let mut collected: Vec<String> = result
        .output_files
        .iter()
        .filter(|f| f.digest.size_bytes > 0)
        .map(|f| f.digest.hash.clone())
        .collect();

    let tree_fetches = result.output_directories.iter().map(|dir| {
        let cache = cache.clone();
        let hash = dir.tree_digest.hash.clone();
        async move {
            cache
                .get(&hash)
                .await?
                .ok_or_else(|| Error::not_found(format!("tree blob {hash}")))
        }
    });
    let tree_bytes = try_join_all(tree_fetches).await?;

    for bytes in &tree_bytes {
        let tree = decode_tree(bytes)?;
        collected.extend(tree.root.files.iter().map(|f| f.digest.hash.clone()));
        for child in &tree.children {
            collected.extend(child.files.iter().map(|f| f.digest.hash.clone()));
        }
    }

    let missing = cache.find_missing(&collected).await?;
    if let Some(first) = missing.first() {
        return Err(Error::not_found(format!(
            "action result references missing blob {first}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use re_cache::tiers::memory::MemoryCache;

    fn digest(hash: &str, size: i64) -> Digest {
        Digest::new(hash.to_string(), size)
    }

    #[tokio::test]
    async fn valid_when_every_referenced_blob_is_present() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        cache.set("file1", b"a".to_vec()).await.unwrap();
        cache.set("tree1", b"fake-tree-bytes".to_vec()).await.unwrap();

        let result = ActionResultView {
            output_files: vec![OutputFile {
                digest: digest("file1", 1),
            }],
            output_directories: vec![OutputDirectory {
                tree_digest: digest("tree1", 16),
            }],
        };

        let outcome = validate(cache, &result, |_bytes| {
            Ok(TreeView {
                root: DirectoryView {
                    files: vec![FileNode {
                        digest: digest("nested1", 2),
                    }],
                },
                children: vec![],
            })
        })
        .await;
        // `nested1` was never stored, so validation must fail even though
        // the top-level file and tree blob are present.
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn valid_when_nested_blobs_are_also_present() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        cache.set("file1", b"a".to_vec()).await.unwrap();
        cache.set("tree1", b"fake-tree-bytes".to_vec()).await.unwrap();
        cache.set("nested1", b"bb".to_vec()).await.unwrap();

        let result = ActionResultView {
            output_files: vec![OutputFile {
                digest: digest("file1", 1),
            }],
            output_directories: vec![OutputDirectory {
                tree_digest: digest("tree1", 16),
            }],
        };

        validate(cache, &result, |_bytes| {
            Ok(TreeView {
                root: DirectoryView {
                    files: vec![FileNode {
                        digest: digest("nested1", 2),
                    }],
                },
                children: vec![],
            })
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn empty_file_digests_are_never_collected() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let result = ActionResultView {
            output_files: vec![OutputFile {
                digest: digest("anything", 0),
            }],
            output_directories: vec![],
        };
        validate(cache, &result, |_| unreachable!()).await.unwrap();
    }

    #[tokio::test]
    async fn missing_tree_blob_itself_is_not_found() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let result = ActionResultView {
            output_files: vec![],
            output_directories: vec![OutputDirectory {
                tree_digest: digest("absent-tree", 5),
            }],
        };
        let err = validate(cache, &result, |_| unreachable!()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
