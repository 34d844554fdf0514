//! `ActionCache.GetActionResult` / `UpdateActionResult`, with validation
//! against CAS on every read so a stale or partially-evicted result is
//! never served as a hit.

use crate::proto_validate::{decode_tree, view_of_action_result};
use prost::Message;
use re_cache::{with_isolation, Cache, IsolationKind};
use re_proto::action_cache_server::ActionCache;
use re_proto::{ActionResult, GetActionResultRequest, UpdateActionResultRequest};
use re_scheduler::validate_action_result;
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub struct ActionCacheService {
    ac: Arc<dyn Cache>,
    cas: Arc<dyn Cache>,
}

impl ActionCacheService {
    pub fn new(ac: Arc<dyn Cache>, cas: Arc<dyn Cache>) -> Self {
        Self { ac, cas }
    }
}

#[tonic::async_trait]
impl ActionCache for ActionCacheService {
    async fn get_action_result(
        &self,
        request: Request<GetActionResultRequest>,
    ) -> Result<Response<ActionResult>, Status> {
        let req = request.into_inner();
        let digest = req
            .action_digest
            .ok_or_else(|| Status::invalid_argument("missing action_digest"))?;
        let ac = with_isolation(self.ac.clone(), IsolationKind::Ac, &req.instance_name);
        let cas = with_isolation(self.cas.clone(), IsolationKind::Cas, &req.instance_name);

        let bytes = ac
            .get(&digest.hash)
            .await?
            .ok_or_else(|| Status::not_found("action result not cached"))?;
        let result = ActionResult::decode(bytes.as_slice())
            .map_err(|e| Status::data_loss(format!("corrupt cached action result: {e}")))?;

        let view = view_of_action_result(&result);
        validate_action_result(cas, &view, decode_tree)
            .await
            .map_err(|e| {
                Status::not_found(format!("cached action result failed validation: {e}"))
            })?;

        Ok(Response::new(result))
    }

    async fn update_action_result(
        &self,
        request: Request<UpdateActionResultRequest>,
    ) -> Result<Response<ActionResult>, Status> {
        let req = request.into_inner();
        let digest = req
            .action_digest
            .ok_or_else(|| Status::invalid_argument("missing action_digest"))?;
        let result = req
            .action_result
            .ok_or_else(|| Status::invalid_argument("missing action_result"))?;
        let ac = with_isolation(self.ac.clone(), IsolationKind::Ac, &req.instance_name);

        let mut bytes = Vec::new();
        result
            .encode(&mut bytes)
            .map_err(|e| Status::data_loss(format!("marshalling action result: {e}")))?;
        ac.set(&digest.hash, bytes).await?;

        Ok(Response::new(result))
    }
}
