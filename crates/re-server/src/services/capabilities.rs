//! `Capabilities.GetCapabilities`: a fixed reply describing this server's
//! supported digest functions, execution support, and API version range.

use re_proto::capabilities_server::Capabilities;
use re_proto::digest_function::Value as DigestFunctionValue;
use re_proto::symlink_absolute_path_strategy::Value as SymlinkStrategy;
use re_proto::{
    ActionCacheUpdateCapabilities, CacheCapabilities, ExecutionCapabilities,
    GetCapabilitiesRequest, ServerCapabilities,
};
use tonic::{Request, Response, Status};

pub struct CapabilitiesService;

#[tonic::async_trait]
impl Capabilities for CapabilitiesService {
    async fn get_capabilities(
        &self,
        _request: Request<GetCapabilitiesRequest>,
    ) -> Result<Response<ServerCapabilities>, Status> {
        Ok(Response::new(ServerCapabilities {
            cache_capabilities: Some(CacheCapabilities {
                digest_functions: vec![
                    DigestFunctionValue::Md5 as i32,
                    DigestFunctionValue::Sha1 as i32,
                    DigestFunctionValue::Sha256 as i32,
                    DigestFunctionValue::Sha384 as i32,
                    DigestFunctionValue::Sha512 as i32,
                ],
                action_cache_update_capabilities: Some(ActionCacheUpdateCapabilities {
                    update_enabled: true,
                }),
                symlink_absolute_path_strategy: SymlinkStrategy::Allowed as i32,
                max_batch_total_size_bytes: 0,
            }),
            execution_capabilities: Some(ExecutionCapabilities {
                digest_function: DigestFunctionValue::Sha256 as i32,
                exec_enabled: true,
            }),
            low_api_version: "2.0".to_string(),
            high_api_version: "2.0".to_string(),
        }))
    }
}
