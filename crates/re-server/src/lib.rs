//! Wires the composed cache, scheduler, and both the gRPC and HTTP
//! surfaces together behind one `Config`.

pub mod config;
pub mod http;
pub mod proto_validate;
pub mod services;

use crate::config::Config;
use crate::services::action_cache::ActionCacheService;
use crate::services::bytestream::ByteStreamService;
use crate::services::capabilities::CapabilitiesService;
use crate::services::cas::CasService;
use crate::services::execution::ExecutionService;
use re_cache::Cache;
use re_core::{Error, Result};
use re_proto::action_cache_server::ActionCacheServer;
use re_proto::byte_stream_server::ByteStreamServer;
use re_proto::capabilities_server::CapabilitiesServer;
use re_proto::content_addressable_storage_server::ContentAddressableStorageServer;
use re_proto::execution_server::ExecutionServer;
use re_scheduler::{run_worker_loop, TaskQueue, WorkerRegistry};
use std::sync::Arc;
use tracing::info;

const TASK_QUEUE_CAPACITY: usize = 256;

/// Everything needed to run the server, already bound to a cache and a
/// (possibly empty) worker registry.
pub struct App {
    pub cache: Arc<dyn Cache>,
    pub registry: Arc<WorkerRegistry>,
    pub queue: TaskQueue,
}

impl App {
    pub async fn build(config: &Config) -> Result<Self> {
        // Force both metrics singletons into existence so `/metrics` reports
        // registered-but-zero series from the first scrape, not an empty body.
        re_core::metrics::cache_metrics();
        re_scheduler::scheduler_metrics();

        let cache = re_cache::build_from_config(&config.caches).await?;
        let registry = Arc::new(WorkerRegistry::new());
        let (queue, receiver) = TaskQueue::new(TASK_QUEUE_CAPACITY);
        tokio::spawn(run_worker_loop(queue.clone(), receiver, registry.clone()));
        registry.spawn_heartbeat_loop();
        Ok(Self {
            cache,
            registry,
            queue,
        })
    }

    /// Runs the gRPC server (and, if configured, the HTTP cache surface)
    /// until the process is interrupted. `ac` and `cas` are namespaced out
    /// of the same backing cache by `IsolationKind` at the service layer.
    pub async fn serve(&self, server_cfg: &config::ServerConfig) -> Result<()> {
        let grpc_addr = server_cfg
            .listen_addr
            .parse()
            .map_err(|e| Error::invalid_argument(format!("bad listen_addr: {e}")))?;

        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(re_proto::FILE_DESCRIPTOR_SET)
            .build()
            .map_err(|e| Error::internal(format!("building reflection service: {e}")))?;

        let cas_service = CasService::new(self.cache.clone());
        let action_cache_service = ActionCacheService::new(self.cache.clone(), self.cache.clone());
        let bytestream_service = ByteStreamService::new(self.cache.clone());
        let execution_service =
            ExecutionService::new(self.cache.clone(), self.cache.clone(), self.queue.clone());

        let grpc_server = tonic::transport::Server::builder()
            .add_service(reflection)
            .add_service(ContentAddressableStorageServer::new(cas_service))
            .add_service(ActionCacheServer::new(action_cache_service))
            .add_service(ByteStreamServer::new(bytestream_service))
            .add_service(ExecutionServer::new(execution_service))
            .add_service(CapabilitiesServer::new(CapabilitiesService))
            .serve(grpc_addr);

        if let Some(http_addr) = server_cfg.http_listen_addr.as_ref() {
            let http_addr = http_addr.clone();
            let http_state = http::HttpState {
                ac: self.cache.clone(),
                cas: self.cache.clone(),
            };
            let http_server = async move {
                let listener = tokio::net::TcpListener::bind(&http_addr)
                    .await
                    .map_err(|e| Error::io("bind http listener", std::path::Path::new(&http_addr), e))?;
                info!(addr = %http_addr, "http cache surface listening");
                axum::serve(listener, http::router(http_state))
                    .await
                    .map_err(|e| Error::internal(format!("http server error: {e}")))
            };

            info!(addr = %server_cfg.listen_addr, "grpc server listening");
            tokio::try_join!(
                async { grpc_server.await.map_err(|e| Error::internal(format!("grpc server error: {e}"))) },
                http_server,
            )?;
        } else {
            info!(addr = %server_cfg.listen_addr, "grpc server listening");
            grpc_server
                .await
                .map_err(|e| Error::internal(format!("grpc server error: {e}")))?;
        }

        Ok(())
    }
}
