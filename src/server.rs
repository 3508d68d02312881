//! HTTP metadata server.
//!
//! Each request takes a fresh snapshot from the container runtime, works out
//! which container is asking, and answers with its container or task
//! document.  Routes without an identifier use the peer address of the
//! connection to find the caller.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::{debug, error, info, warn};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::metadata::{ContainerMetadata, MetadataService, TaskMetadata};
use crate::resolver::{resolve, ResolveError, SelfRef};
use crate::runtime::ContainerRuntime;
use crate::types::Container;

pub struct AppState {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub metadata: MetadataService,
    pub self_ref: SelfRef,
}

/// What a request tells us about its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Identifier(String),
    Caller(IpAddr),
}

impl Lookup {
    pub fn caller(peer: SocketAddr) -> Self {
        let ip = match peer.ip() {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
            ip => ip,
        };
        Lookup::Caller(ip)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("failed to list containers: {0}")]
    Snapshot(anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Resolve(ResolveError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Resolve(ResolveError::Configuration(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Snapshot(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

impl AppState {
    async fn snapshot(&self) -> Result<Vec<Container>, ApiError> {
        self.runtime.snapshot().await.map_err(|e| {
            error!("Container snapshot failed: {}", e);
            ApiError::Snapshot(e)
        })
    }

    fn find<'a>(
        &self,
        containers: &'a [Container],
        lookup: &Lookup,
    ) -> Result<&'a Container, ApiError> {
        let result = match lookup {
            Lookup::Identifier(identifier) => resolve(containers, &self.self_ref, identifier, ""),
            Lookup::Caller(ip) => resolve(containers, &self.self_ref, "", &ip.to_string()),
        };
        match result {
            Ok(container) => {
                debug!("Resolved {:?} to container {}", lookup, container.name());
                Ok(container)
            }
            Err(e) => {
                warn!("Failed to resolve {:?}: {}", lookup, e);
                Err(e.into())
            }
        }
    }

    pub async fn container(&self, lookup: &Lookup) -> Result<ContainerMetadata, ApiError> {
        let containers = self.snapshot().await?;
        let container = self.find(&containers, lookup)?;
        Ok(self.metadata.container_metadata(container))
    }

    pub async fn task(&self, lookup: &Lookup, with_tags: bool) -> Result<TaskMetadata, ApiError> {
        let containers = self.snapshot().await?;
        let container = self.find(&containers, lookup)?;
        Ok(self
            .metadata
            .task_metadata(&containers, container, &self.self_ref, with_tags))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v3", get(caller_container))
        .route("/v3/task", get(caller_task))
        .route("/v3/taskWithTags", get(caller_task_with_tags))
        .route("/v3/containers/:identifier", get(container_by_id))
        .route("/v3/containers/:identifier/task", get(task_by_id))
        .route("/v3/containers/:identifier/taskWithTags", get(task_with_tags_by_id))
        .route("/v2/metadata", get(caller_task))
        .route("/v2/metadata/self", get(caller_container))
        .with_state(state)
}

/// Start the metadata server.
pub async fn run_metadata_server(
    bind_addr: SocketAddr,
    state: Arc<AppState>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!("Metadata server listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Wait for either `shutdown` or the server task to finish.  A server that
/// stops on its own is an error: the process must not linger without serving.
pub async fn supervise<F>(
    mut server: JoinHandle<anyhow::Result<()>>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = shutdown => {
            server.abort();
            Ok(())
        }
        joined = &mut server => match joined {
            Ok(Ok(())) => Err(anyhow::anyhow!("Metadata server stopped unexpectedly")),
            Ok(Err(e)) => {
                error!("Metadata server failed: {}", e);
                Err(e)
            }
            Err(e) => Err(anyhow::anyhow!("Metadata server task failed: {}", e)),
        },
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn caller_container(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<Json<ContainerMetadata>, ApiError> {
    state.container(&Lookup::caller(peer)).await.map(Json)
}

async fn caller_task(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<Json<TaskMetadata>, ApiError> {
    state.task(&Lookup::caller(peer), false).await.map(Json)
}

async fn caller_task_with_tags(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<Json<TaskMetadata>, ApiError> {
    state.task(&Lookup::caller(peer), true).await.map(Json)
}

async fn container_by_id(
    State(state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
) -> Result<Json<ContainerMetadata>, ApiError> {
    state.container(&Lookup::Identifier(identifier)).await.map(Json)
}

async fn task_by_id(
    State(state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
) -> Result<Json<TaskMetadata>, ApiError> {
    state.task(&Lookup::Identifier(identifier), false).await.map(Json)
}

async fn task_with_tags_by_id(
    State(state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
) -> Result<Json<TaskMetadata>, ApiError> {
    state.task(&Lookup::Identifier(identifier), true).await.map(Json)
}
