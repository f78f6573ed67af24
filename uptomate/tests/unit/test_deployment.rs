//! Deployment state machine tests

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use uptomate::deploy::deployment::{DeploymentFactory, INSTALLED_MARKER_FILE};
use uptomate::deploy::{Action, DeploymentState, FsmSettings, OpenMode};
use uptomate::errors::EngineError;
use uptomate::provider::ProviderRegistry;
use uptomate::tasks::TaskStatus;

use crate::common::Fixture;

#[tokio::test]
async fn test_install_then_start_scenario() {
    let fx = Fixture::new();
    let path = fx.add_deployment("alpha");
    let queue = fx.queue();
    let alpha = fx.deployment("alpha");

    assert_eq!(alpha.status().await.unwrap(), DeploymentState::Unknown);
    assert!(!alpha.is_installed().await.unwrap());

    let install = queue.submit("alpha", Action::Install).unwrap();
    assert_eq!(install.wait().await, TaskStatus::Succeeded);
    assert!(path.join(INSTALLED_MARKER_FILE).exists());
    assert_eq!(alpha.status().await.unwrap(), DeploymentState::NotCreated);

    let start = queue.submit("alpha", Action::Start).unwrap();
    assert_eq!(start.wait().await, TaskStatus::Succeeded);
    assert_eq!(alpha.status().await.unwrap(), DeploymentState::Running);
    assert_eq!(fx.backend.count(&path, "up"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_stops_polling_at_first_success() {
    let fx = Fixture::new();
    let path = fx.add_installed("alpha");
    fx.backend.set_start_after(&path, Some(3));

    let started = Instant::now();
    fx.deployment("alpha").start().await.unwrap();

    assert_eq!(fx.backend.probes(&path, "running"), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn test_start_times_out() {
    let fx = Fixture::new();
    let path = fx.add_installed("alpha");
    fx.backend.set_start_after(&path, None);

    let started = Instant::now();
    let err = fx.deployment("alpha").start().await.unwrap_err();

    match err {
        EngineError::StartTimeout {
            deployment,
            attempts,
        } => {
            assert_eq!(deployment, "alpha");
            assert_eq!(attempts, 30);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(fx.backend.probes(&path, "running"), 30);
    assert_eq!(started.elapsed(), Duration::from_secs(290));
}

#[tokio::test]
async fn test_status_probe_priority() {
    let fx = Fixture::new();
    let path = fx.add_installed("alpha");
    let alpha = fx.deployment("alpha");

    fx.backend.set_statuses(&path, &["running", "paused"]);
    assert_eq!(alpha.status().await.unwrap(), DeploymentState::Running);

    fx.backend.set_statuses(&path, &["paused", "stopped"]);
    assert_eq!(alpha.status().await.unwrap(), DeploymentState::Stopped);

    fx.backend.set_statuses(&path, &["paused"]);
    assert_eq!(alpha.status().await.unwrap(), DeploymentState::Paused);

    fx.backend.set_statuses(&path, &[]);
    assert_eq!(alpha.status().await.unwrap(), DeploymentState::NotCreated);
}

#[tokio::test]
async fn test_status_of_missing_folder() {
    let fx = Fixture::new();
    let status = fx.deployment("ghost").status().await.unwrap();
    assert_eq!(status, DeploymentState::Unknown);
    assert!(fx.backend.calls().is_empty());
}

#[tokio::test]
async fn test_destroy_tolerates_declined_codes() {
    let fx = Fixture::new();
    let path = fx.add_installed("alpha");
    std::fs::write(path.join(INSTALLED_MARKER_FILE), "").unwrap();
    fx.backend.fail_command(&path, "down", 1);

    let queue = fx.queue();
    let handle = queue.submit("alpha", Action::Destroy).unwrap();
    assert_eq!(handle.wait().await, TaskStatus::Succeeded);
    assert!(!path.join(INSTALLED_MARKER_FILE).exists());

    let down = fx
        .backend
        .calls()
        .into_iter()
        .find(|c| c.command == "down")
        .unwrap();
    assert_eq!(down.args, vec!["--rmi", "all"]);
}

#[tokio::test]
async fn test_destroy_fails_on_other_codes() {
    let fx = Fixture::new();
    let path = fx.add_installed("alpha");
    fx.backend.fail_command(&path, "down", 3);

    let queue = fx.queue();
    let handle = queue.submit("alpha", Action::Destroy).unwrap();
    assert_eq!(handle.wait().await, TaskStatus::Failed);

    let task = queue.status(&handle.id).unwrap();
    assert_eq!(task.error_code.as_deref(), Some("backend"));
    assert!(task.result.unwrap().contains("exit status 3"));
}

#[tokio::test]
async fn test_declined_codes_are_configurable() {
    let fx = Fixture::with_settings(FsmSettings {
        destroy_declined_codes: vec![],
        ..Default::default()
    });
    let path = fx.add_installed("alpha");
    fx.backend.fail_command(&path, "down", 1);

    let err = fx.deployment("alpha").destroy().await.unwrap_err();
    assert!(matches!(err, EngineError::BackendCommand { code: Some(1), .. }));
}

#[tokio::test]
async fn test_gated_operations_need_install() {
    let fx = Fixture::new();
    let path = fx.add_deployment("alpha");
    let alpha = fx.deployment("alpha");

    for action in [Action::Start, Action::Stop, Action::Suspend, Action::Resume, Action::Destroy] {
        let err = alpha.perform(action).await.unwrap_err();
        assert!(
            matches!(err, EngineError::NotInstalled(ref name) if name == "alpha"),
            "{} returned {:?}",
            action,
            err
        );
    }
    assert!(matches!(
        alpha.hostname().await,
        Err(EngineError::NotInstalled(_))
    ));

    // Only the installed check reached the backend
    assert!(fx.backend.calls().iter().all(|c| c.command == "config"));
    assert_eq!(fx.backend.count(&path, "config"), 6);
}

#[tokio::test]
async fn test_install_missing_folder() {
    let fx = Fixture::new();
    let err = fx.deployment("ghost").install().await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert!(fx.backend.calls().is_empty());
}

#[tokio::test]
async fn test_installed_check_without_images() {
    let fx = Fixture::new();
    let path = fx.add_deployment("downloads");
    fx.backend.set_images(&path, vec![]);

    let err = fx.deployment("downloads").is_installed().await.unwrap_err();
    assert_eq!(err.code(), "invalidconfig");
}

#[tokio::test]
async fn test_suspend_resume_and_stop() {
    let fx = Fixture::new();
    fx.add_installed("alpha");
    let alpha = fx.deployment("alpha");

    alpha.start().await.unwrap();
    alpha.suspend().await.unwrap();
    assert_eq!(alpha.status().await.unwrap(), DeploymentState::Paused);

    alpha.resume().await.unwrap();
    assert_eq!(alpha.status().await.unwrap(), DeploymentState::Running);

    alpha.stop().await.unwrap();
    assert_eq!(alpha.status().await.unwrap(), DeploymentState::NotCreated);
}

#[tokio::test]
async fn test_reload_rebuilds_and_starts() {
    let fx = Fixture::new();
    let path = fx.add_installed("alpha");
    let alpha = fx.deployment("alpha");
    alpha.start().await.unwrap();

    alpha.reload().await.unwrap();

    let commands: Vec<String> = fx
        .backend
        .calls()
        .into_iter()
        .map(|c| c.command)
        .filter(|c| matches!(c.as_str(), "build" | "up" | "down"))
        .collect();
    assert_eq!(commands, vec!["up", "down", "build", "up"]);
    assert!(path.join(INSTALLED_MARKER_FILE).exists());
    assert_eq!(alpha.status().await.unwrap(), DeploymentState::Running);
}

#[tokio::test]
async fn test_content_file_access() {
    let fx = Fixture::new();
    let path = fx.add_deployment("alpha");
    let alpha = fx.deployment("alpha");

    let err = alpha
        .open_content_file("../../etc/passwd", OpenMode::Read)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PathTraversal { .. }));

    let mut flag = alpha
        .open_content_file("flag.txt", OpenMode::Write)
        .await
        .unwrap();
    flag.write_all(b"flag{first}").await.unwrap();
    flag.flush().await.unwrap();
    drop(flag);

    let mut flag = alpha
        .open_content_file("./static/../flag.txt", OpenMode::Append)
        .await
        .unwrap();
    flag.write_all(b"\n").await.unwrap();
    flag.flush().await.unwrap();
    drop(flag);

    assert_eq!(
        std::fs::read_to_string(path.join("flag.txt")).unwrap(),
        "flag{first}\n"
    );

    let mut contents = String::new();
    alpha
        .open_content_file("flag.txt", OpenMode::Read)
        .await
        .unwrap()
        .read_to_string(&mut contents)
        .await
        .unwrap();
    assert_eq!(contents, "flag{first}\n");

    let nested = alpha
        .resolve_content_path("files/a/../b.zip")
        .unwrap();
    assert_eq!(nested, path.join("files/b.zip"));
}

#[tokio::test]
async fn test_config_errors_are_distinct() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.path("empty")).unwrap();
    fx.add_deployment_with("nometa", "services:\n  web:\n    image: nginx\n");
    fx.add_deployment_with("noname", "x-task-meta:\n  points: 10\n");

    let missing = fx.deployment("empty").get_config().await.unwrap_err();
    assert!(matches!(missing, EngineError::ConfigMissing(_)));

    let invalid = fx.deployment("nometa").get_config().await.unwrap_err();
    assert!(matches!(invalid, EngineError::ConfigInvalid(_)));

    let no_name = fx.deployment("noname").get_config().await.unwrap_err();
    assert_eq!(no_name.code(), "missingkey");
    assert_ne!(invalid.user_message(), no_name.user_message());

    fx.add_deployment("alpha");
    let meta = fx.deployment("alpha").get_config().await.unwrap();
    assert_eq!(meta.name, "alpha");
    assert_eq!(meta.points, Some(50));
}

#[tokio::test]
async fn test_service_network_address() {
    let fx = Fixture::new();
    fx.add_installed("alpha");
    let address = fx.deployment("alpha").service_network_address().await;
    tokio_test::assert_ok!(&address);
    assert_eq!(address.unwrap().as_deref(), Some("127.0.0.1"));

    // Backend kind without a registered provider
    let bare = DeploymentFactory::new(
        fx.factory.root().to_path_buf(),
        fx.backend.clone(),
        Arc::new(ProviderRegistry::new()),
        FsmSettings::default(),
    );
    assert_eq!(bare.get("alpha").unwrap().service_network_address().await.unwrap(), None);
}

#[tokio::test]
async fn test_factory_confines_names_to_root() {
    let fx = Fixture::new();
    fx.add_deployment("web/sqli");

    let deployment = fx.factory.get("./web/x/../sqli").unwrap();
    assert_eq!(deployment.name(), "web/sqli");
    assert_eq!(deployment.base_path(), fx.path("web/sqli"));

    for name in ["../outside", "", ".", "web/../..", "/etc"] {
        match fx.factory.get(name) {
            Err(EngineError::PathTraversal { path, .. }) => assert_eq!(path, name),
            Err(e) => panic!("{:?} gave {:?}", name, e),
            Ok(d) => panic!("{:?} resolved to {}", name, d.base_path().display()),
        }
    }
}
