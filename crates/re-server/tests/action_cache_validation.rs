//! `ActionCache` + `ContentAddressableStorage` wired to the same in-memory
//! cache, exercised through their `tonic` service impls directly (no
//! network) rather than through either service's own unit tests in
//! isolation.

use re_cache::tiers::memory::MemoryCache;
use re_proto::action_cache_server::ActionCache;
use re_proto::content_addressable_storage_server::ContentAddressableStorage;
use re_proto::{
    ActionResult, BatchUpdateBlobsRequest, Digest, GetActionResultRequest, OutputFile,
    UpdateActionResultRequest,
};
use re_server::services::action_cache::ActionCacheService;
use re_server::services::cas::CasService;
use std::sync::Arc;
use tonic::Request;

fn digest_of(data: &[u8]) -> Digest {
    let d = re_core::digest::Digest::of_bytes(data);
    Digest {
        hash: d.hash,
        size_bytes: d.size_bytes,
    }
}

#[tokio::test]
async fn get_action_result_succeeds_once_outputs_are_in_cas() {
    let cache: Arc<dyn re_cache::Cache> = Arc::new(MemoryCache::new(1_048_576, 65_536));
    let cas_service = CasService::new(cache.clone());
    let ac_service = ActionCacheService::new(cache.clone(), cache.clone());

    let output_bytes = b"compiled output".to_vec();
    let output_digest = digest_of(&output_bytes);

    cas_service
        .batch_update_blobs(Request::new(BatchUpdateBlobsRequest {
            instance_name: String::new(),
            requests: vec![re_proto::batch_update_blobs_request::Request {
                digest: Some(output_digest.clone()),
                data: output_bytes,
            }],
        }))
        .await
        .unwrap();

    let action_digest = digest_of(b"some action proto bytes");
    let result = ActionResult {
        output_files: vec![OutputFile {
            path: "out.bin".to_string(),
            digest: Some(output_digest),
            is_executable: false,
        }],
        ..Default::default()
    };

    ac_service
        .update_action_result(Request::new(UpdateActionResultRequest {
            instance_name: String::new(),
            action_digest: Some(action_digest.clone()),
            action_result: Some(result),
        }))
        .await
        .unwrap();

    let fetched = ac_service
        .get_action_result(Request::new(GetActionResultRequest {
            instance_name: String::new(),
            action_digest: Some(action_digest),
        }))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(fetched.output_files.len(), 1);
    assert_eq!(fetched.output_files[0].path, "out.bin");
}

#[tokio::test]
async fn get_action_result_fails_validation_when_output_blob_is_missing() {
    let cache: Arc<dyn re_cache::Cache> = Arc::new(MemoryCache::new(1_048_576, 65_536));
    let ac_service = ActionCacheService::new(cache.clone(), cache.clone());

    // Output digest is never written to CAS.
    let output_digest = digest_of(b"never uploaded");
    let action_digest = digest_of(b"another action");
    let result = ActionResult {
        output_files: vec![OutputFile {
            path: "out.bin".to_string(),
            digest: Some(output_digest),
            is_executable: false,
        }],
        ..Default::default()
    };

    ac_service
        .update_action_result(Request::new(UpdateActionResultRequest {
            instance_name: String::new(),
            action_digest: Some(action_digest.clone()),
            action_result: Some(result),
        }))
        .await
        .unwrap();

    let err = ac_service
        .get_action_result(Request::new(GetActionResultRequest {
            instance_name: String::new(),
            action_digest: Some(action_digest),
        }))
        .await
        .unwrap_err();

    assert_eq!(err.code(), tonic::Code::NotFound);
}
