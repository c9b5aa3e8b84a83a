//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use console_api::{
    CacheServerRequest, CacheServerSummary, ErrorResponse, HealthResponse, ProcedureRequest,
    ServerSummary, SubmitJobResponse, VersionResponse,
};
use secrecy::SecretString;
use tracing::{error, warn};
use uuid::Uuid;

use crate::errors::ConsoleError;
use crate::models::server::{CacheServer, Server, DEFAULT_STUNNEL_PORT};
use crate::server::state::ServerState;
use crate::storage::store::Records;
use crate::utils::{random_chars, version_info};

const GENERATED_SECRET_LEN: usize = 20;

/// A console error rendered as a JSON error body
pub struct ApiError(pub ConsoleError);

impl From<ConsoleError> for ApiError {
    fn from(err: ConsoleError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ConsoleError::NotFound(_) => StatusCode::NOT_FOUND,
            ConsoleError::TopologyError(_) => StatusCode::CONFLICT,
            ConsoleError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ConsoleError::JobError(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        // topology refusals carry the message operators act on
        let message = match self.0 {
            ConsoleError::TopologyError(msg) => msg,
            other => other.to_string(),
        };
        (status, Json(ErrorResponse { message })).into_response()
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "clusterctl".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Submit a procedure to the job runner
pub async fn submit_job_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ProcedureRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let ProcedureRequest::RemoveReplicationDeployment { server_id } = &request {
        guard_removal(&state, *server_id).await?;
    }
    submit(&state, request).await
}

async fn submit(
    state: &ServerState,
    request: ProcedureRequest,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    let procedure = request.name().to_string();
    let job_id = state.runner.submit(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse { job_id, procedure }),
    ))
}

async fn guard_removal(state: &ServerState, server_id: u64) -> Result<(), ApiError> {
    let notices = state.orchestrator.check_removal(server_id).await?;
    for notice in notices {
        warn!("{}", notice);
    }
    Ok(())
}

/// Job status and log
pub async fn job_handler(
    State(state): State<Arc<ServerState>>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .runner
        .status(job_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError(ConsoleError::NotFound(format!("job {}", job_id))))
}

fn server_summary(server: &Server) -> ServerSummary {
    ServerSummary {
        id: server.id,
        hostname: server.hostname.clone(),
        ip: server.ip.clone(),
        os: server.os.clone(),
        primary: server.primary,
        mmr: server.mmr,
        filebeat: server.filebeat,
        installed: server.installed,
    }
}

fn cache_server_summary(cache: &CacheServer) -> CacheServerSummary {
    CacheServerSummary {
        id: cache.id,
        hostname: cache.hostname.clone(),
        ip: cache.ip.clone(),
        install_redis: cache.install_redis,
        stunnel_port: cache.stunnel_port,
        primary: cache.primary,
        installed: cache.installed,
    }
}

/// Managed servers
pub async fn servers_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiError> {
    let servers = state.orchestrator.store().servers().await?;
    Ok(Json(servers.iter().map(server_summary).collect::<Vec<_>>()))
}

/// Registered cache servers
pub async fn cache_servers_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiError> {
    let cache_servers = state.orchestrator.store().cache_servers().await?;
    Ok(Json(
        cache_servers
            .iter()
            .map(cache_server_summary)
            .collect::<Vec<_>>(),
    ))
}

/// Build the record a registration request describes.
///
/// New records get a generated secret and the default tunnel port unless
/// the request names them; the first cache server becomes primary when no
/// record is flagged.
pub fn cache_server_from_request(
    records: &Records,
    request: CacheServerRequest,
) -> Result<CacheServer, ConsoleError> {
    let existing = match request.id {
        Some(id) => Some(
            records
                .cache_servers
                .iter()
                .find(|c| c.id == id)
                .ok_or_else(|| ConsoleError::NotFound(format!("cache server {}", id)))?,
        ),
        None => None,
    };

    let id = match existing {
        Some(cache) => cache.id,
        None => records.cache_servers.iter().map(|c| c.id).max().unwrap_or(0) + 1,
    };
    let redis_password = match (request.redis_password, existing) {
        (Some(password), _) => SecretString::from(password),
        (None, Some(cache)) => cache.redis_password.clone(),
        (None, None) => SecretString::from(random_chars(GENERATED_SECRET_LEN)),
    };
    let stunnel_port = request
        .stunnel_port
        .or(existing.map(|c| c.stunnel_port))
        .unwrap_or(DEFAULT_STUNNEL_PORT);
    let others_flagged = records
        .cache_servers
        .iter()
        .any(|c| c.primary && c.id != id);
    let primary = request
        .primary
        .or(existing.map(|c| c.primary))
        .unwrap_or(!others_flagged);

    let cache = CacheServer {
        id,
        hostname: request.hostname,
        ip: request.ip,
        os: existing.and_then(|c| c.os.clone()),
        install_redis: request.install_redis,
        redis_password,
        stunnel_port,
        primary,
        installed: existing.map(|c| c.installed).unwrap_or(false),
    };
    cache.validate()?;
    Ok(cache)
}

/// Create or update a cache server
pub async fn save_cache_server_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CacheServerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.orchestrator.store();
    let created = request.id.is_none();
    let cache = cache_server_from_request(&store.read().await?, request)?;
    store.save_cache_server(&cache).await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(cache_server_summary(&cache))))
}

/// Engine and tunnel reachability across the fleet
pub async fn cache_status_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.orchestrator.cache_status().await?))
}

/// Add a server to the replication topology
pub async fn deploy_replication_handler(
    State(state): State<Arc<ServerState>>,
    Path(server_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    state.orchestrator.store().server(server_id).await?;
    submit(&state, ProcedureRequest::DeployReplicationConfig { server_id }).await
}

/// Take a server out of the replication topology, unless others still
/// replicate from it
pub async fn remove_replication_handler(
    State(state): State<Arc<ServerState>>,
    Path(server_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    guard_removal(&state, server_id).await?;
    submit(
        &state,
        ProcedureRequest::RemoveReplicationDeployment { server_id },
    )
    .await
}
