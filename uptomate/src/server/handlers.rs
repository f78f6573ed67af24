//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::{Action, DeploymentState};
use crate::errors::EngineError;
use crate::policy::{PolicyOutcome, PolicyReport};
use crate::problems::Problem;
use crate::server::error::ApiError;
use crate::server::state::ServerState;
use crate::tasks::{Task, TaskFilter, TaskHandle, TaskStatus};
use crate::utils::version_info;

type ApiResult<T> = Result<T, ApiError>;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "uptomate".to_string(),
        version: version.version,
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

// ================================= PROBLEMS ===================================== //

pub async fn list_problems_handler(
    State(state): State<Arc<ServerState>>,
) -> ApiResult<Json<Vec<Problem>>> {
    Ok(Json(state.problems.repository().list().await?))
}

/// Live and predicted state of a problem's deployment
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub slug: String,
    pub state: DeploymentState,
    pub predicted: DeploymentState,
    pub active_task: Option<Task>,
}

pub async fn problem_status_handler(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let problem = state.problems.get(&slug).await?;
    let live = state
        .queue
        .factory()
        .get(problem.deployment())?
        .status()
        .await?;
    let predicted = state.queue.predict_state(problem.deployment()).await?;
    let active_task = state.queue.active_task(problem.deployment());

    Ok(Json(StatusResponse {
        slug: problem.slug,
        state: live,
        predicted,
        active_task,
    }))
}

#[derive(Debug, Serialize)]
pub struct AddressResponse {
    pub slug: String,
    pub address: Option<String>,
}

pub async fn problem_address_handler(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
) -> ApiResult<Json<AddressResponse>> {
    let problem = state.problems.get(&slug).await?;
    let address = state
        .queue
        .factory()
        .get(problem.deployment())?
        .service_network_address()
        .await?;
    Ok(Json(AddressResponse {
        slug: problem.slug,
        address,
    }))
}

pub async fn problem_tasks_handler(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
) -> ApiResult<Json<Vec<Task>>> {
    let problem = state.problems.get(&slug).await?;
    Ok(Json(
        state
            .queue
            .list(&TaskFilter::deployment(problem.deployment())),
    ))
}

/// Reply to a request that submitted a task
#[derive(Debug, Serialize)]
pub struct TaskAccepted {
    pub task_id: String,
    pub deployment: String,
    pub action: Action,
    pub status: TaskStatus,
}

impl From<TaskHandle> for TaskAccepted {
    fn from(handle: TaskHandle) -> Self {
        let status = handle.status();
        Self {
            task_id: handle.id,
            deployment: handle.deployment,
            action: handle.action,
            status,
        }
    }
}

pub async fn problem_action_handler(
    State(state): State<Arc<ServerState>>,
    Path((slug, action)): Path<(String, String)>,
) -> ApiResult<(StatusCode, Json<TaskAccepted>)> {
    let problem = state.problems.get(&slug).await?;
    let handle = state
        .scheduler
        .run_on_existing(&action, problem.deployment())?;
    Ok((StatusCode::ACCEPTED, Json(handle.into())))
}

pub async fn destroy_problem_handler(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
) -> ApiResult<(StatusCode, Json<TaskAccepted>)> {
    let handle = state.problems.destroy_problem(&slug).await?;
    Ok((StatusCode::ACCEPTED, Json(handle.into())))
}

// =================================== TASKS ====================================== //

pub async fn list_tasks_handler(
    State(state): State<Arc<ServerState>>,
    Query(filter): Query<TaskFilter>,
) -> Json<Vec<Task>> {
    Json(state.queue.list(&filter))
}

pub async fn get_task_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.queue.status(&id)?))
}

// ================================== CATALOG ===================================== //

pub async fn catalog_handler(
    State(state): State<Arc<ServerState>>,
) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.problems.find_installable().await?))
}

#[derive(Debug, Deserialize)]
pub struct InstallRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct InstallResponse {
    pub slug: String,
    pub task_id: String,
}

pub async fn catalog_install_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<InstallRequest>,
) -> ApiResult<(StatusCode, Json<InstallResponse>)> {
    let (problem, handle) = state.problems.create_problem(&request.path).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(InstallResponse {
            slug: problem.slug,
            task_id: handle.id,
        }),
    ))
}

/// One entry of a bulk install
#[derive(Debug, Serialize)]
pub struct InstallResult {
    pub path: String,
    pub slug: Option<String>,
    pub task_id: Option<String>,
    pub code: Option<&'static str>,
    pub message: Option<&'static str>,
}

pub async fn catalog_install_all_handler(
    State(state): State<Arc<ServerState>>,
) -> ApiResult<Json<Vec<InstallResult>>> {
    let reports = state.problems.install_available().await?;
    let results = reports
        .into_iter()
        .map(|report| match report.outcome {
            Ok(installed) => InstallResult {
                path: report.path,
                slug: Some(installed.slug),
                task_id: Some(installed.task_id),
                code: None,
                message: None,
            },
            Err(e) => InstallResult {
                path: report.path,
                slug: None,
                task_id: None,
                code: Some(e.code()),
                message: Some(e.user_message()),
            },
        })
        .collect();
    Ok(Json(results))
}

// ================================= POLICIES ===================================== //

/// Restricts a policy to some problems; all registered problems otherwise
#[derive(Debug, Default, Deserialize)]
pub struct PolicyQuery {
    /// Comma separated slugs
    #[serde(default)]
    pub slugs: Option<String>,
}

impl PolicyQuery {
    fn slugs(&self) -> Option<Vec<String>> {
        self.slugs.as_ref().map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

async fn select_deployments(
    state: &ServerState,
    slugs: Option<Vec<String>>,
) -> Result<Vec<String>, EngineError> {
    let Some(slugs) = slugs else {
        let problems = state.problems.repository().list().await?;
        return Ok(problems.into_iter().map(|p| p.path).collect());
    };

    let mut deployments = Vec::with_capacity(slugs.len());
    for slug in slugs {
        deployments.push(state.problems.get(&slug).await?.path);
    }
    Ok(deployments)
}

fn reports(outcomes: &[PolicyOutcome]) -> Vec<PolicyReport> {
    outcomes.iter().map(PolicyReport::from).collect()
}

pub async fn start_used_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<PolicyQuery>,
) -> ApiResult<Json<Vec<PolicyReport>>> {
    let deployments = select_deployments(&state, query.slugs()).await?;
    let outcomes = state.scheduler.start_used(&deployments).await;
    Ok(Json(reports(&outcomes)))
}

pub async fn stop_unused_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<PolicyQuery>,
) -> ApiResult<Json<Vec<PolicyReport>>> {
    let deployments = select_deployments(&state, query.slugs()).await?;
    let outcomes = state
        .scheduler
        .stop_unused(&deployments, state.usage.as_ref())
        .await;
    Ok(Json(reports(&outcomes)))
}

#[derive(Debug, Deserialize)]
pub struct ApplyPolicyRequest {
    pub action: String,

    /// Trigger states, as reported by any backend
    #[serde(default)]
    pub states: Vec<String>,

    #[serde(default)]
    pub slugs: Option<Vec<String>>,
}

pub async fn apply_policy_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ApplyPolicyRequest>,
) -> ApiResult<Json<Vec<PolicyReport>>> {
    let action = request
        .action
        .parse::<Action>()
        .ok()
        .filter(|a| state.scheduler.options().legal_actions.contains(a))
        .ok_or_else(|| EngineError::IllegalAction(request.action.clone()))?;
    let states: Vec<DeploymentState> = request
        .states
        .iter()
        .map(|s| DeploymentState::normalize(s))
        .collect();

    let deployments = select_deployments(&state, request.slugs).await?;
    let outcomes = state
        .scheduler
        .apply_policy(&deployments, action, &states)
        .await;
    Ok(Json(reports(&outcomes)))
}
