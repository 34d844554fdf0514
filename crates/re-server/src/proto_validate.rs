//! Adapts generated `re-proto` message types to the transport-agnostic
//! views `re_scheduler::validate` operates over.

use prost::Message;
use re_core::{Digest as CoreDigest, Error, Result};
use re_proto::{ActionResult, Digest as ProtoDigest, Tree};
use re_scheduler::validate::{ActionResultView, DirectoryView, FileNode, OutputDirectory, OutputFile, TreeView};

fn to_core_digest(d: &ProtoDigest) -> CoreDigest {
    CoreDigest::new(d.hash.clone(), d.size_bytes)
}

pub fn view_of_action_result(result: &ActionResult) -> ActionResultView {
    ActionResultView {
        output_files: result
            .output_files
            .iter()
            .filter_map(|f| f.digest.as_ref())
            .map(|d| OutputFile {
                digest: to_core_digest(d),
            })
            .collect(),
        output_directories: result
            .output_directories
            .iter()
            .filter_map(|d| d.tree_digest.as_ref())
            .map(|d| OutputDirectory {
                tree_digest: to_core_digest(d),
            })
            .collect(),
    }
}

pub fn decode_tree(bytes: &[u8]) -> Result<TreeView> {
    let tree = Tree::decode(bytes).map_err(|e| Error::DataLoss(format!("corrupt tree blob: {e}")))?;
    let directory_view = |dir: &re_proto::Directory| DirectoryView {
        files: dir
            .files
            .iter()
            .filter_map(|f| f.digest.as_ref())
            .map(|d| FileNode {
                digest: to_core_digest(d),
            })
            .collect(),
    };
    Ok(TreeView {
        root: tree.root.as_ref().map(directory_view).unwrap_or(DirectoryView { files: vec![] }),
        children: tree.children.iter().map(directory_view).collect(),
    })
}
