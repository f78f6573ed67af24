//! Task queue tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::time::Instant;
use uptomate::deploy::{Action, DeploymentState};
use uptomate::errors::EngineError;
use uptomate::tasks::{CompletionHook, Task, TaskFilter, TaskQueueOptions, TaskStatus};
use uptomate::workers::sweeper;

use crate::common::Fixture;

#[tokio::test(start_paused = true)]
async fn test_second_submission_is_rejected_while_active() {
    let fx = Fixture::new();
    let path = fx.add_installed("alpha");
    fx.backend.set_start_after(&path, Some(3));
    let queue = fx.queue();

    let start = queue.submit("alpha", Action::Start).unwrap();
    match queue.submit("alpha", Action::Stop) {
        Err(EngineError::TaskInFlight {
            deployment,
            task_id,
        }) => {
            assert_eq!(deployment, "alpha");
            assert_eq!(task_id, start.id);
        }
        other => panic!("unexpected result: {:?}", other.map(|h| h.id)),
    }

    assert_eq!(start.wait().await, TaskStatus::Succeeded);

    // The slot is free as soon as the task is reported finished
    let stop = queue.submit("alpha", Action::Stop).unwrap();
    assert_eq!(stop.wait().await, TaskStatus::Succeeded);
    assert_eq!(queue.list(&TaskFilter::deployment("alpha")).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_predicted_state_follows_active_task() {
    let fx = Fixture::new();
    let path = fx.add_installed("alpha");
    fx.backend.set_start_after(&path, Some(3));
    let queue = fx.queue();

    assert_eq!(
        queue.predict_state("alpha").await.unwrap(),
        DeploymentState::NotCreated
    );

    let start = queue.submit("alpha", Action::Start).unwrap();
    assert_eq!(
        queue.predict_state("alpha").await.unwrap(),
        DeploymentState::Running
    );
    assert_eq!(queue.active_task("alpha").unwrap().id, start.id);

    start.wait().await;
    assert!(queue.active_task("alpha").is_none());
    assert_eq!(
        queue.predict_state("alpha").await.unwrap(),
        DeploymentState::Running
    );
}

#[tokio::test(start_paused = true)]
async fn test_prediction_falls_back_to_live_state_after_failure() {
    let fx = Fixture::polling(2, 1);
    let path = fx.add_installed("alpha");
    fx.backend.set_start_after(&path, None);
    let queue = fx.queue();

    let start = queue.submit("alpha", Action::Start).unwrap();
    assert_eq!(
        queue.predict_state("alpha").await.unwrap(),
        DeploymentState::Running
    );

    assert_eq!(start.wait().await, TaskStatus::Failed);
    assert_eq!(
        queue.status(&start.id).unwrap().error_code.as_deref(),
        Some("start-timeout")
    );
    assert_eq!(
        queue.predict_state("alpha").await.unwrap(),
        DeploymentState::NotCreated
    );
}

#[tokio::test(start_paused = true)]
async fn test_distinct_deployments_run_in_parallel() {
    let fx = Fixture::new();
    for name in ["alpha", "beta"] {
        let path = fx.add_installed(name);
        fx.backend.set_start_after(&path, Some(3));
    }
    let queue = fx.queue();

    let started = Instant::now();
    let alpha = queue.submit("alpha", Action::Start).unwrap();
    let beta = queue.submit("beta", Action::Start).unwrap();
    assert_eq!(alpha.wait().await, TaskStatus::Succeeded);
    assert_eq!(beta.wait().await, TaskStatus::Succeeded);

    assert_eq!(started.elapsed(), Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_cap_delays_execution() {
    let fx = Fixture::new();
    for name in ["alpha", "beta"] {
        let path = fx.add_installed(name);
        fx.backend.set_start_after(&path, Some(2));
    }
    let queue = fx.queue_with(TaskQueueOptions {
        max_concurrent: Some(1),
        ..Default::default()
    });

    let started = Instant::now();
    let alpha = queue.submit("alpha", Action::Start).unwrap();
    let beta = queue.submit("beta", Action::Start).unwrap();
    assert_eq!(alpha.wait().await, TaskStatus::Succeeded);
    assert_eq!(beta.wait().await, TaskStatus::Succeeded);

    assert_eq!(started.elapsed(), Duration::from_secs(20));
}

#[tokio::test]
async fn test_failed_task_keeps_error() {
    let fx = Fixture::new();
    fx.add_deployment("alpha");
    let queue = fx.queue();

    let stop = queue.submit("alpha", Action::Stop).unwrap();
    assert_eq!(stop.wait().await, TaskStatus::Failed);

    let task = queue.status(&stop.id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_code.as_deref(), Some("not-installed"));
    assert!(task.started_at.is_some());
    assert!(task.finished_at.unwrap() >= task.started_at.unwrap());
    assert!(task.result.unwrap().contains("not installed"));
}

#[tokio::test]
async fn test_status_and_listing() {
    let fx = Fixture::new();
    fx.add_deployment("alpha");
    fx.add_deployment("beta");
    let queue = fx.queue();

    assert!(matches!(queue.status("nope"), Err(EngineError::NotFound(_))));

    let install = queue.submit("alpha", Action::Install).unwrap();
    let stop = queue.submit("beta", Action::Stop).unwrap();
    install.wait().await;
    stop.wait().await;

    let all = queue.list(&TaskFilter::default());
    assert_eq!(all.len(), 2);
    assert!(all[0].submitted_at <= all[1].submitted_at);

    let failed = queue.list(&TaskFilter {
        status: Some(TaskStatus::Failed),
        ..Default::default()
    });
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].deployment, "beta");

    let installs = queue.list(&TaskFilter {
        action: Some(Action::Install),
        ..Default::default()
    });
    assert_eq!(installs[0].id, install.id);
}

#[tokio::test]
async fn test_purge_only_drops_expired_finished_tasks() {
    let fx = Fixture::new();
    fx.add_deployment("alpha");
    let queue = fx.queue_with(TaskQueueOptions {
        ttl: Duration::from_secs(60),
        ..Default::default()
    });

    let install = queue.submit("alpha", Action::Install).unwrap();
    install.wait().await;

    assert_eq!(queue.purge_expired(Utc::now()), 0);
    assert_eq!(
        queue.purge_expired(Utc::now() + chrono::Duration::seconds(61)),
        1
    );
    assert!(queue.is_empty());
    assert!(matches!(queue.status(&install.id), Err(EngineError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_active_task_survives_purge() {
    let fx = Fixture::new();
    let path = fx.add_installed("alpha");
    fx.backend.set_start_after(&path, Some(3));
    let queue = fx.queue_with(TaskQueueOptions {
        ttl: Duration::from_secs(1),
        ..Default::default()
    });

    let start = queue.submit("alpha", Action::Start).unwrap();
    let far_future = Utc::now() + chrono::Duration::days(7);
    assert_eq!(queue.purge_expired(far_future), 0);

    assert_eq!(start.wait().await, TaskStatus::Succeeded);
    assert_eq!(queue.purge_expired(far_future), 1);
}

#[tokio::test]
async fn test_completion_hook_runs_before_wait_returns() {
    let fx = Fixture::new();
    fx.add_deployment("alpha");
    let queue = fx.queue();

    let seen = Arc::new(AtomicBool::new(false));
    let flag = seen.clone();
    let hook: CompletionHook = Box::new(move |task: Task| {
        async move {
            assert_eq!(task.status, TaskStatus::Succeeded);
            flag.store(true, Ordering::SeqCst);
        }
        .boxed()
    });

    let install = queue
        .submit_with_hook("alpha", Action::Install, Some(hook))
        .unwrap();
    assert_eq!(install.wait().await, TaskStatus::Succeeded);
    assert!(seen.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_purges_until_shutdown() {
    let fx = Fixture::new();
    fx.add_deployment("alpha");
    let queue = fx.queue_with(TaskQueueOptions {
        ttl: Duration::ZERO,
        ..Default::default()
    });
    queue.submit("alpha", Action::Install).unwrap().wait().await;
    assert_eq!(queue.len(), 1);

    let options = sweeper::Options {
        interval: Duration::from_secs(60),
    };
    let started = Instant::now();
    sweeper::run(
        &options,
        &queue,
        tokio::time::sleep,
        Box::pin(tokio::time::sleep(Duration::from_secs(90))),
    )
    .await;

    assert!(queue.is_empty());
    assert_eq!(started.elapsed(), Duration::from_secs(90));
}

#[tokio::test]
async fn test_panicking_hook_still_releases_slot() {
    let fx = Fixture::new();
    fx.add_deployment("alpha");
    let queue = fx.queue();

    let hook: CompletionHook = Box::new(|task: Task| {
        async move {
            panic!("hook of task {} blew up", task.id);
        }
        .boxed()
    });
    let install = queue
        .submit_with_hook("alpha", Action::Install, Some(hook))
        .unwrap();
    assert_eq!(install.wait().await, TaskStatus::Succeeded);

    let task = queue.status(&install.id).unwrap();
    assert_eq!(task.status, TaskStatus::Succeeded);
    assert!(task.finished_at.is_some());
    assert!(queue.active_task("alpha").is_none());

    let start = queue.submit("alpha", Action::Start).unwrap();
    assert_eq!(start.wait().await, TaskStatus::Succeeded);
}

#[tokio::test]
async fn test_names_leaving_the_root_are_rejected() {
    let fx = Fixture::new();
    fx.add_deployment("alpha");
    let queue = fx.queue();

    for name in ["../outside", "", "alpha/../.."] {
        let err = queue.submit(name, Action::Install).unwrap_err();
        assert!(
            matches!(err, EngineError::PathTraversal { .. }),
            "{:?} gave {:?}",
            name,
            err
        );
        assert!(queue.predict_state(name).await.is_err());
    }
    assert!(queue.is_empty());
    assert!(fx.backend.calls().is_empty());
    assert!(!fx.dir.path().join("outside").exists());
}

#[tokio::test(start_paused = true)]
async fn test_equivalent_names_share_a_slot() {
    let fx = Fixture::new();
    let path = fx.add_installed("alpha");
    fx.backend.set_start_after(&path, Some(3));
    let queue = fx.queue();

    let start = queue.submit("./alpha", Action::Start).unwrap();
    assert_eq!(start.deployment, "alpha");
    assert!(matches!(
        queue.submit("alpha/", Action::Stop),
        Err(EngineError::TaskInFlight { .. })
    ));
    assert_eq!(start.wait().await, TaskStatus::Succeeded);
}
