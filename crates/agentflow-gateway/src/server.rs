use crate::error::{ApiError, ApiResult};
use crate::middleware::{
    auth_middleware, rate_limit_middleware, MiddlewareState, SecurityConfig,
};
use agentflow_core::{
    AgentflowError, ExecutionList, ExecutionStats, Job, JobId, JobStatus, SubmitRequest,
    SubmitResponse,
};
use agentflow_orchestrator::JobSubmitter;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    middleware as axum_mw,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::info;

/// Shared application state.
pub struct AppState {
    pub submitter: Arc<JobSubmitter>,
}

/// The HTTP front of the job orchestrator.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the gateway without auth or rate limiting.
    pub fn build(submitter: Arc<JobSubmitter>) -> Router {
        Self::api_routes(Arc::new(AppState { submitter })).merge(Self::health_routes())
    }

    /// Build the gateway with API-key auth and rate limiting on the `/api` routes.
    ///
    /// `/health` stays open so probes work without credentials.
    pub fn build_with_middleware(
        submitter: Arc<JobSubmitter>,
        security: &SecurityConfig,
    ) -> (Router, Arc<MiddlewareState>) {
        let mw_state = Arc::new(MiddlewareState {
            rate_limiter: Arc::new(security.rate_limiter()),
            api_keys: security.api_keys.clone(),
        });

        // The last layer added runs first: rate limiting, then auth.
        let api = Self::api_routes(Arc::new(AppState { submitter }))
            .layer(axum_mw::from_fn_with_state(mw_state.clone(), auth_middleware))
            .layer(axum_mw::from_fn_with_state(
                mw_state.clone(),
                rate_limit_middleware,
            ));

        (api.merge(Self::health_routes()), mw_state)
    }

    fn api_routes(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/api/orchestration/execute", post(execute_handler))
            .route("/api/progress/{execution_id}", get(progress_handler))
            .route(
                "/api/orchestration/status/{execution_id}",
                get(progress_handler),
            )
            .route("/api/executions", get(executions_handler))
            .with_state(state)
    }

    fn health_routes() -> Router {
        Router::new().route("/health", get(health_handler))
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "service": "agentflow"}))
}

/// `POST /api/orchestration/execute`
///
/// Async submissions answer `202` with the job ID as soon as the job is
/// stored. Sync submissions wait for a terminal state and answer `200` with
/// the result or the failure reason.
async fn execute_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let handle = state
        .submitter
        .submit_with(
            &request.task,
            request.max_iterations,
            request.error_handling_strategy,
        )
        .await?;
    let execution_id = handle.id;

    if request.run_async {
        return Ok((
            StatusCode::ACCEPTED,
            Json(SubmitResponse {
                execution_id,
                status: JobStatus::Pending,
                result: None,
                error: None,
            }),
        ));
    }

    info!(job_id = %execution_id, "Waiting for synchronous execution");
    handle.wait().await?;
    let job = state.submitter.orchestrator().store().get(execution_id).await?;
    Ok((
        StatusCode::OK,
        Json(SubmitResponse {
            execution_id,
            status: job.status,
            result: job.result,
            error: job.error,
        }),
    ))
}

/// `GET /api/progress/{execution_id}` and its status alias.
async fn progress_handler(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<String>,
) -> ApiResult<Json<Job>> {
    // A malformed ID can never match a job.
    let id: JobId = execution_id
        .parse()
        .map_err(|_| AgentflowError::NotFound(format!("job {execution_id}")))?;
    let job = state.submitter.orchestrator().store().get(id).await?;
    Ok(Json(job))
}

/// `GET /api/executions`
async fn executions_handler(State(state): State<Arc<AppState>>) -> Json<ExecutionList> {
    let executions = state.submitter.orchestrator().store().list().await;
    let stats = ExecutionStats::from_summaries(&executions);
    Json(ExecutionList { executions, stats })
}
