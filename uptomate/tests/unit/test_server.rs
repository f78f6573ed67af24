//! HTTP API tests

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uptomate::filesys::file::File;
use uptomate::policy::{PolicyOptions, PolicyScheduler};
use uptomate::problems::{JsonProblemRepository, ProblemManager};
use uptomate::server::serve::router;
use uptomate::server::state::ServerState;
use uptomate::tasks::TaskQueue;

use crate::common::Fixture;

async fn app(fx: &Fixture) -> (Router, TaskQueue) {
    let queue = fx.queue();
    let repository = Arc::new(
        JsonProblemRepository::open(File::new(fx.dir.path().join("problems.json")))
            .await
            .unwrap(),
    );
    let state = ServerState::new(
        queue.clone(),
        PolicyScheduler::new(queue.clone(), PolicyOptions::default()),
        ProblemManager::new(repository.clone(), queue.clone()),
        repository,
    );
    (router(Arc::new(state)), queue)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn wait_for(queue: &TaskQueue, id: &str) -> String {
    loop {
        let task = queue.status(id).unwrap();
        if task.status.is_terminal() {
            return task.status.to_string();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_health() {
    let fx = Fixture::new();
    let (app, _) = app(&fx).await;

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "uptomate");
}

#[tokio::test]
async fn test_install_from_catalog_and_query() {
    let fx = Fixture::new();
    fx.add_deployment("alpha");
    let (app, queue) = app(&fx).await;

    let (status, body) = send(&app, Method::GET, "/catalog", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["alpha"]));

    let (status, body) = send(
        &app,
        Method::POST,
        "/catalog/install",
        Some(json!({ "path": "alpha" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["slug"], "alpha");
    let task_id = body["task_id"].as_str().unwrap().to_string();
    assert_eq!(wait_for(&queue, &task_id).await, "succeeded");

    let (status, body) = send(&app, Method::GET, &format!("/tasks/{}", task_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "install");
    assert_eq!(body["status"], "succeeded");

    let (_, body) = send(&app, Method::GET, "/problems", None).await;
    assert_eq!(body[0]["slug"], "alpha");
    assert_eq!(body[0]["meta"]["points"], 50);

    let (status, body) = send(&app, Method::GET, "/problems/alpha/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "not_created");
    assert_eq!(body["predicted"], "not_created");
    assert!(body["active_task"].is_null());

    let (_, body) = send(&app, Method::GET, "/problems/alpha/address", None).await;
    assert_eq!(body["address"], "127.0.0.1");

    let (status, body) = send(&app, Method::POST, "/problems/alpha/actions/start", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["action"], "start");
    let start_id = body["task_id"].as_str().unwrap().to_string();
    assert_eq!(wait_for(&queue, &start_id).await, "succeeded");

    let (_, body) = send(&app, Method::GET, "/tasks?deployment=alpha&action=start", None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    let (_, body) = send(&app, Method::GET, "/problems/alpha/tasks", None).await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = send(&app, Method::GET, "/catalog", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_error_responses() {
    let fx = Fixture::new();
    fx.add_deployment("alpha");
    let (app, queue) = app(&fx).await;

    let (status, body) = send(&app, Method::GET, "/problems/ghost/status", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not-found");

    let (_, body) = send(
        &app,
        Method::POST,
        "/catalog/install",
        Some(json!({ "path": "alpha" })),
    )
    .await;
    wait_for(&queue, body["task_id"].as_str().unwrap()).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/problems/alpha/actions/format_disk",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["code"], "illegal-action");

    let (status, body) = send(
        &app,
        Method::POST,
        "/catalog/install",
        Some(json!({ "path": "../etc" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "path-traversal");

    let (status, _) = send(&app, Method::GET, "/tasks/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        Method::POST,
        "/policies/apply",
        Some(json!({ "action": "install", "states": ["poweroff"] })),
    )
    .await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["code"], "illegal-action");
}

#[tokio::test]
async fn test_policy_endpoints() {
    let fx = Fixture::new();
    fx.add_deployment("alpha");
    fx.add_deployment("beta");
    let (app, queue) = app(&fx).await;

    let (_, body) = send(&app, Method::POST, "/catalog/install-all", None).await;
    let results = body.as_array().unwrap();
    assert_eq!(results.len(), 2);
    for result in results {
        assert!(result["code"].is_null());
        wait_for(&queue, result["task_id"].as_str().unwrap()).await;
    }

    let (status, body) = send(&app, Method::POST, "/policies/start-used?slugs=alpha", None).await;
    assert_eq!(status, StatusCode::OK);
    let reports = body.as_array().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["deployment"], "alpha");
    assert_eq!(reports[0]["predicted"], "not_created");
    let start_id = reports[0]["task_id"].as_str().unwrap().to_string();
    assert_eq!(wait_for(&queue, &start_id).await, "succeeded");

    // Nobody uses alpha, so it is stopped again; beta is not running
    let (_, body) = send(&app, Method::POST, "/policies/stop-unused", None).await;
    let reports = body.as_array().unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["deployment"], "alpha");
    assert!(reports[0]["task_id"].is_string());
    assert_eq!(reports[1]["deployment"], "beta");
    assert!(reports[1]["task_id"].is_null());

    let (status, body) = send(
        &app,
        Method::POST,
        "/policies/apply",
        Some(json!({ "action": "start", "states": ["not_created"], "slugs": ["beta"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body[0]["task_id"].is_string());
}

#[tokio::test(start_paused = true)]
async fn test_status_reports_prediction_of_active_task() {
    let fx = Fixture::new();
    let path = fx.add_deployment("alpha");
    let (app, queue) = app(&fx).await;

    let (_, body) = send(
        &app,
        Method::POST,
        "/catalog/install",
        Some(json!({ "path": "alpha" })),
    )
    .await;
    assert_eq!(wait_for(&queue, body["task_id"].as_str().unwrap()).await, "succeeded");

    // Status probes below also count towards the start polls
    fx.backend.set_start_after(&path, Some(5));
    let (_, body) = send(&app, Method::POST, "/problems/alpha/actions/start", None).await;
    let start_id = body["task_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::GET, "/problems/alpha/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "not_created");
    assert_eq!(body["predicted"], "running");
    assert_eq!(body["active_task"]["id"], start_id.as_str());

    assert_eq!(wait_for(&queue, &start_id).await, "succeeded");
    let (_, body) = send(&app, Method::GET, "/problems/alpha/status", None).await;
    assert_eq!(body["state"], "running");
    assert_eq!(body["predicted"], "running");
    assert!(body["active_task"].is_null());
}
