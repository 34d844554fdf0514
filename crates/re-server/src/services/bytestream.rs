//! Bridges the generated `ByteStream` gRPC trait to the transport-agnostic
//! logic in `re-bytestream`.

use re_bytestream::{read_chunks, query_write_status, WriteOutcome, WriteSession};
use re_cache::{with_isolation, Cache, IsolationKind};
use re_core::ResourceName;
use re_proto::byte_stream_server::ByteStream;
use re_proto::{QueryWriteStatusRequest, QueryWriteStatusResponse, ReadRequest, ReadResponse, WriteRequest, WriteResponse};
use std::pin::Pin;
use tonic::{Request, Response, Status, Streaming};

pub struct ByteStreamService {
    cas: std::sync::Arc<dyn Cache>,
}

impl ByteStreamService {
    pub fn new(cas: std::sync::Arc<dyn Cache>) -> Self {
        Self { cas }
    }

    fn scoped_for(&self, resource_name: &str) -> std::sync::Arc<dyn Cache> {
        let instance = ResourceName::parse(resource_name)
            .map(|r| r.instance)
            .unwrap_or_default();
        with_isolation(self.cas.clone(), IsolationKind::Cas, &instance)
    }
}

#[tonic::async_trait]
impl ByteStream for ByteStreamService {
    type ReadStream = Pin<Box<dyn futures::Stream<Item = Result<ReadResponse, Status>> + Send + 'static>>;

    async fn read(&self, request: Request<ReadRequest>) -> Result<Response<Self::ReadStream>, Status> {
        let req = request.into_inner();
        let cas = self.scoped_for(&req.resource_name);
        let chunks = read_chunks(cas, &req.resource_name, req.read_offset, req.read_limit).await?;
        let stream = tokio_stream::iter(chunks.into_iter().map(|data| Ok(ReadResponse { data })));
        Ok(Response::new(Box::pin(stream)))
    }

    async fn write(
        &self,
        request: Request<Streaming<WriteRequest>>,
    ) -> Result<Response<WriteResponse>, Status> {
        let mut stream = request.into_inner();
        let mut session: Option<WriteSession> = None;

        loop {
            let Some(req) = stream.message().await? else {
                return Err(Status::invalid_argument("write stream ended before finish_write"));
            };

            if session.is_none() {
                let cas = self.scoped_for(&req.resource_name);
                session = Some(WriteSession::new(cas));
            }
            let outcome = session
                .as_mut()
                .expect("session initialized above")
                .handle(&req.resource_name, req.write_offset, &req.data, req.finish_write)
                .await?;

            if let WriteOutcome::Closed { committed } = outcome {
                return Ok(Response::new(WriteResponse {
                    committed_size: committed,
                }));
            }
        }
    }

    async fn query_write_status(
        &self,
        request: Request<QueryWriteStatusRequest>,
    ) -> Result<Response<QueryWriteStatusResponse>, Status> {
        let req = request.into_inner();
        let cas = self.scoped_for(&req.resource_name);
        let status = query_write_status(cas, &req.resource_name).await?;
        Ok(Response::new(QueryWriteStatusResponse {
            committed_size: status.committed_size,
            complete: status.complete,
        }))
    }
}
