//! `Execution.Execute`/`WaitExecution`: both stream `Operation` updates, so
//! a client that drops its `Execute` stream can reattach with
//! `WaitExecution` as long as the run hasn't finished and been reaped.

use dashmap::DashMap;
use futures::Stream;
use prost::Message;
use re_cache::Cache;
use re_proto::execution_server::Execution;
use re_proto::{
    ExecuteOperationMetadata, ExecuteRequest, ExecuteResponse, ExecutionStage as ProtoStage,
    Operation, Status as ProtoStatus, WaitExecutionRequest,
};
use re_scheduler::{execute, execution_id, ExecuteRequest as CoreExecuteRequest, Stage, TaskQueue};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tonic::{Request, Response, Status};

use crate::proto_validate::{decode_tree, view_of_action_result};

fn proto_stage(stage: Stage) -> ProtoStage {
    match stage {
        Stage::Unknown => ProtoStage::Unknown,
        Stage::CacheCheck => ProtoStage::CacheCheck,
        Stage::Executing => ProtoStage::Executing,
        Stage::Completed => ProtoStage::Completed,
    }
}

fn progress_operation(name: &str, digest: Option<re_proto::Digest>, stage: Stage) -> Operation {
    let metadata = ExecuteOperationMetadata {
        stage: proto_stage(stage) as i32,
        action_digest: digest,
    };
    let mut metadata_value = Vec::new();
    let _ = metadata.encode(&mut metadata_value);
    Operation {
        name: name.to_string(),
        metadata_value,
        metadata_type_url: "type.googleapis.com/build.bazel.remote.execution.v2.ExecuteOperationMetadata"
            .to_string(),
        done: false,
        error: None,
        response_value: Vec::new(),
        response_type_url: String::new(),
    }
}

fn done_operation(name: &str, outcome: Result<ActionResultPayload, re_core::Error>) -> Operation {
    match outcome {
        Ok(payload) => {
            let response = ExecuteResponse {
                result: Some(payload.result),
                cached_result: payload.cached,
                status: Some(ProtoStatus {
                    code: 0,
                    message: String::new(),
                }),
            };
            let mut response_value = Vec::new();
            let _ = response.encode(&mut response_value);
            Operation {
                name: name.to_string(),
                metadata_value: Vec::new(),
                metadata_type_url: String::new(),
                done: true,
                error: None,
                response_value,
                response_type_url: "type.googleapis.com/build.bazel.remote.execution.v2.ExecuteResponse"
                    .to_string(),
            }
        }
        Err(e) => {
            let status: Status = e.into();
            Operation {
                name: name.to_string(),
                metadata_value: Vec::new(),
                metadata_type_url: String::new(),
                done: true,
                error: Some(ProtoStatus {
                    code: status.code() as i32,
                    message: status.message().to_string(),
                }),
                response_value: Vec::new(),
                response_type_url: String::new(),
            }
        }
    }
}

struct ActionResultPayload {
    result: re_proto::ActionResult,
    cached: bool,
}

pub struct ExecutionService {
    ac: Arc<dyn Cache>,
    cas: Arc<dyn Cache>,
    queue: TaskQueue,
    operations: Arc<DashMap<String, watch::Receiver<Operation>>>,
}

impl ExecutionService {
    pub fn new(ac: Arc<dyn Cache>, cas: Arc<dyn Cache>, queue: TaskQueue) -> Self {
        Self {
            ac,
            cas,
            queue,
            operations: Arc::new(DashMap::new()),
        }
    }

    fn spawn_execution(&self, req: ExecuteRequest) -> watch::Receiver<Operation> {
        let digest = req.action_digest.clone().unwrap_or_default();
        let name = execution_id(&digest.hash, digest.size_bytes);
        let (tx, rx) = watch::channel(progress_operation(&name, Some(digest.clone()), Stage::Unknown));
        self.operations.insert(name.clone(), rx.clone());

        let ac = self.ac.clone();
        let cas = self.cas.clone();
        let queue = self.queue.clone();
        let operations = self.operations.clone();
        let op_name = name.clone();
        let dispatched = Arc::new(AtomicBool::new(false));

        tokio::spawn(async move {
            let emit_digest = Some(digest.clone());
            let emit_name = op_name.clone();
            let emit = {
                let tx = tx.clone();
                let dispatched = dispatched.clone();
                move |stage: Stage| {
                    if stage == Stage::Executing {
                        dispatched.store(true, Ordering::SeqCst);
                    }
                    let _ = tx.send(progress_operation(&emit_name, emit_digest.clone(), stage));
                }
            };

            let outcome = execute(
                ac,
                cas,
                queue,
                CoreExecuteRequest {
                    instance: req.instance_name,
                    action_hash: digest.hash.clone(),
                    action_size: digest.size_bytes,
                    skip_cache_lookup: req.skip_cache_lookup,
                    max_retry: 0,
                },
                emit,
                |bytes| {
                    re_proto::ActionResult::decode(bytes)
                        .map_err(|e| re_core::Error::DataLoss(format!("corrupt action result: {e}")))
                        .map(|r| view_of_action_result(&r))
                },
                decode_tree,
            )
            .await;

            let was_dispatched = dispatched.load(Ordering::SeqCst);
            let payload = outcome.and_then(|bytes| {
                re_proto::ActionResult::decode(bytes.as_slice())
                    .map_err(|e| re_core::Error::DataLoss(format!("corrupt action result: {e}")))
                    .map(|result| ActionResultPayload {
                        result,
                        cached: !was_dispatched,
                    })
            });

            let _ = tx.send(done_operation(&op_name, payload));
            operations.remove(&op_name);
        });

        rx
    }
}

enum StreamState {
    /// Emit the receiver's current value without waiting for a change.
    Fresh(watch::Receiver<Operation>),
    /// Wait for the next change before emitting.
    Waiting(watch::Receiver<Operation>),
    Done,
}

fn watch_to_stream(
    rx: watch::Receiver<Operation>,
) -> Pin<Box<dyn Stream<Item = Result<Operation, Status>> + Send + 'static>> {
    Box::pin(futures::stream::unfold(
        StreamState::Fresh(rx),
        |state| async move {
            let mut rx = match state {
                StreamState::Fresh(rx) => rx,
                StreamState::Waiting(mut rx) => {
                    if rx.changed().await.is_err() {
                        return None;
                    }
                    rx
                }
                StreamState::Done => return None,
            };
            let op = rx.borrow_and_update().clone();
            let next = if op.done {
                StreamState::Done
            } else {
                StreamState::Waiting(rx)
            };
            Some((Ok(op), next))
        },
    ))
}

#[tonic::async_trait]
impl Execution for ExecutionService {
    type ExecuteStream = Pin<Box<dyn Stream<Item = Result<Operation, Status>> + Send + 'static>>;
    type WaitExecutionStream = Pin<Box<dyn Stream<Item = Result<Operation, Status>> + Send + 'static>>;

    async fn execute(
        &self,
        request: Request<ExecuteRequest>,
    ) -> Result<Response<Self::ExecuteStream>, Status> {
        let rx = self.spawn_execution(request.into_inner());
        Ok(Response::new(watch_to_stream(rx)))
    }

    async fn wait_execution(
        &self,
        request: Request<WaitExecutionRequest>,
    ) -> Result<Response<Self::WaitExecutionStream>, Status> {
        let req = request.into_inner();
        let rx = self
            .operations
            .get(&req.name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Status::not_found(format!("no in-flight operation named {}", req.name)))?;
        Ok(Response::new(watch_to_stream(rx)))
    }
}
