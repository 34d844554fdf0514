//! `ContentAddressableStorage`: `FindMissingBlobs`, `BatchUpdateBlobs`,
//! `BatchReadBlobs`. `GetTree` is left unimplemented — nothing in this
//! deployment needs paginated directory listing over gRPC; clients fetch
//! `Tree` blobs directly through `BatchReadBlobs`.

use re_cache::{with_isolation, Cache, IsolationKind};
use re_proto::content_addressable_storage_server::ContentAddressableStorage;
use re_proto::{
    BatchReadBlobsRequest, BatchReadBlobsResponse, BatchUpdateBlobsRequest,
    BatchUpdateBlobsResponse, Digest, FindMissingBlobsRequest, FindMissingBlobsResponse,
    GetTreeRequest, GetTreeResponse, Status as ProtoStatus,
};
use std::pin::Pin;
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub struct CasService {
    cas: Arc<dyn Cache>,
}

impl CasService {
    pub fn new(cas: Arc<dyn Cache>) -> Self {
        Self { cas }
    }

    fn scoped(&self, instance: &str) -> Arc<dyn Cache> {
        with_isolation(self.cas.clone(), IsolationKind::Cas, instance)
    }
}

#[tonic::async_trait]
impl ContentAddressableStorage for CasService {
    async fn find_missing_blobs(
        &self,
        request: Request<FindMissingBlobsRequest>,
    ) -> Result<Response<FindMissingBlobsResponse>, Status> {
        let req = request.into_inner();
        let cache = self.scoped(&req.instance_name);
        let hashes: Vec<String> = req.blob_digests.iter().map(|d| d.hash.clone()).collect();
        let missing_hashes = cache.find_missing(&hashes).await?;

        let by_hash: std::collections::HashMap<&str, &Digest> =
            req.blob_digests.iter().map(|d| (d.hash.as_str(), d)).collect();
        let missing_blob_digests = missing_hashes
            .iter()
            .filter_map(|h| by_hash.get(h.as_str()).map(|d| (*d).clone()))
            .collect();

        Ok(Response::new(FindMissingBlobsResponse {
            missing_blob_digests,
        }))
    }

    async fn batch_update_blobs(
        &self,
        request: Request<BatchUpdateBlobsRequest>,
    ) -> Result<Response<BatchUpdateBlobsResponse>, Status> {
        let req = request.into_inner();
        let cache = self.scoped(&req.instance_name);
        let mut responses = Vec::with_capacity(req.requests.len());
        for item in req.requests {
            let digest = item.digest.unwrap_or_default();
            let status = match cache.set(&digest.hash, item.data).await {
                Ok(()) => ProtoStatus {
                    code: 0,
                    message: String::new(),
                },
                Err(e) => {
                    let s: Status = e.into();
                    ProtoStatus {
                        code: s.code() as i32,
                        message: s.message().to_string(),
                    }
                }
            };
            responses.push(re_proto::batch_update_blobs_response::Response {
                digest: Some(digest),
                status: Some(status),
            });
        }
        Ok(Response::new(BatchUpdateBlobsResponse { responses }))
    }

    async fn batch_read_blobs(
        &self,
        request: Request<BatchReadBlobsRequest>,
    ) -> Result<Response<BatchReadBlobsResponse>, Status> {
        let req = request.into_inner();
        let cache = self.scoped(&req.instance_name);
        let mut responses = Vec::with_capacity(req.digests.len());
        for digest in req.digests {
            let (data, status) = match cache.get(&digest.hash).await {
                Ok(Some(data)) => (
                    data,
                    ProtoStatus {
                        code: 0,
                        message: String::new(),
                    },
                ),
                Ok(None) => (
                    Vec::new(),
                    ProtoStatus {
                        code: tonic::Code::NotFound as i32,
                        message: format!("blob {} not found", digest.hash),
                    },
                ),
                Err(e) => {
                    let s: Status = e.into();
                    (
                        Vec::new(),
                        ProtoStatus {
                            code: s.code() as i32,
                            message: s.message().to_string(),
                        },
                    )
                }
            };
            responses.push(re_proto::batch_read_blobs_response::Response {
                digest: Some(digest),
                data,
                status: Some(status),
            });
        }
        Ok(Response::new(BatchReadBlobsResponse { responses }))
    }

    type GetTreeStream =
        Pin<Box<dyn futures::Stream<Item = Result<GetTreeResponse, Status>> + Send + 'static>>;

    async fn get_tree(
        &self,
        _request: Request<GetTreeRequest>,
    ) -> Result<Response<Self::GetTreeStream>, Status> {
        Err(Status::unimplemented("GetTree is not implemented"))
    }
}
