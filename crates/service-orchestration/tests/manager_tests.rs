mod common;

use common::*;
use service_orchestration::{
    AdaptiveMode, ContainerConfig, DeploymentMode, EventKind, LifecycleEvent, ServiceDescriptor,
    ServiceState,
};
use std::time::Duration;

#[tokio::test]
async fn test_start_all_follows_dependency_order() {
    let h = harness();
    let events = h.manager.subscribe().await;

    // Registered out of order on purpose
    for d in [
        native_service("c", &["b"]),
        native_service("b", &["a"]),
        native_service("a", &[]),
    ] {
        assert!(h.manager.register_service(d).await.success);
    }

    let result = h.manager.start_all_services().await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(h.launcher.started(), vec!["a", "b", "c"]);

    let status = h.manager.get_services_status().await;
    assert!(status.values().all(|s| s.state == ServiceState::Running));
    assert!(status.values().all(|s| s.mode == Some(DeploymentMode::Native)));

    assert!(
        wait_for_event(&events, Duration::from_secs(1), |e| matches!(
            e,
            LifecycleEvent::AllServicesStarted
        ))
        .await
        .is_some()
    );

    assert!(h.manager.shutdown().await.success);
    assert_eq!(h.launcher.stopped(), vec!["c", "b", "a"]);
}

#[tokio::test]
async fn test_critical_failure_aborts_batch() {
    let h = harness();
    let failures = h.manager.subscribe_to([EventKind::StartupFailed]).await;

    h.manager.register_service(native_service("a", &[])).await;
    h.manager
        .register_service(native_service("b", &["a"]).critical(true))
        .await;
    h.manager.register_service(native_service("c", &["b"])).await;
    h.launcher.fail("b");

    let result = h.manager.start_all_services().await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("exec format error"));
    assert_eq!(h.launcher.started(), vec!["a", "b"]);

    let status = h.manager.get_services_status().await;
    assert_eq!(status["a"].state, ServiceState::Running);
    assert_eq!(status["b"].state, ServiceState::Error);
    assert_eq!(status["c"].state, ServiceState::Stopped);

    match failures.try_recv().unwrap() {
        LifecycleEvent::StartupFailed { service, .. } => assert_eq!(service, "b"),
        other => panic!("unexpected event {:?}", other),
    }

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_non_critical_failure_is_isolated() {
    let h = harness();
    h.manager.register_service(native_service("a", &[])).await;
    h.manager.register_service(native_service("b", &["a"])).await;
    h.manager.register_service(native_service("c", &["b"])).await;
    h.launcher.fail("b");

    let result = h.manager.start_all_services().await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(h.launcher.started(), vec!["a", "b", "c"]);

    let status = h.manager.get_services_status().await;
    assert_eq!(status["b"].state, ServiceState::Error);
    assert!(status["b"].last_error.as_deref().unwrap().contains("exec format error"));
    assert_eq!(status["c"].state, ServiceState::Running);

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_start_all_shares_one_batch() {
    let h = harness_with(FakeLauncher::with_delay(Duration::from_millis(20)), fast_settings());
    h.manager.register_service(native_service("a", &[])).await;
    h.manager.register_service(native_service("b", &["a"])).await;

    let (first, second) = futures::join!(
        h.manager.start_all_services(),
        h.manager.start_all_services()
    );
    assert!(first.success && second.success);
    assert_eq!(h.launcher.started(), vec!["a", "b"]);

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_register_rejects_duplicates_and_empty_names() {
    let h = harness();
    assert!(h.manager.register_service(native_service("a", &[])).await.success);
    assert!(!h.manager.register_service(native_service("a", &[])).await.success);
    assert!(!h.manager.register_service(ServiceDescriptor::new("")).await.success);
}

#[tokio::test]
async fn test_cycle_fails_start_all() {
    let h = harness();
    h.manager.register_service(native_service("a", &["b"])).await;
    h.manager.register_service(native_service("b", &["a"])).await;

    let result = h.manager.start_all_services().await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("cycle"));
    assert!(h.launcher.started().is_empty());
}

#[tokio::test]
async fn test_start_service_is_noop_when_running() {
    let h = harness();
    h.manager.register_service(native_service("a", &[])).await;

    assert!(h.manager.start_service("a").await.success);
    assert!(h.manager.start_service("a").await.success);
    assert_eq!(h.launcher.started(), vec!["a"]);

    assert!(!h.manager.start_service("ghost").await.success);
}

#[tokio::test]
async fn test_health_timeout_marks_error_and_cleans_up() {
    let h = harness();
    h.manager.register_service(native_service("a", &[])).await;
    h.launcher.set_unhealthy("a");

    let result = h.manager.start_service("a").await;
    assert!(!result.success);

    let status = h.manager.get_service_status("a").await.unwrap();
    assert_eq!(status.state, ServiceState::Error);
    let error = status.last_error.unwrap();
    assert!(error.contains("did not become healthy"), "{}", error);
    assert!(error.contains("connection refused"), "{}", error);
    assert_eq!(h.launcher.stopped(), vec!["a"]);
}

#[tokio::test]
async fn test_restart_backoff_cap_and_reset() {
    let mut settings = fast_settings();
    settings.restart_base_delay = Duration::from_millis(40);
    let h = harness_with(FakeLauncher::new(), settings);
    h.manager.register_service(native_service("a", &[])).await;
    assert!(h.manager.start_service("a").await.success);

    // Successful restart resets the counter
    assert!(h.manager.restart_service("a").await.success);
    assert_eq!(h.manager.get_service_status("a").await.unwrap().restart_attempts, 0);

    h.launcher.fail("a");
    for attempt in 1..=3 {
        assert!(!h.manager.restart_service("a").await.success);
        let status = h.manager.get_service_status("a").await.unwrap();
        assert_eq!(status.restart_attempts, attempt);
        assert_eq!(status.state, ServiceState::Error);
    }

    let exhausted = h.manager.restart_service("a").await;
    assert!(!exhausted.success);
    assert!(exhausted.error.unwrap().contains("exceeded 3 restart attempts"));

    // initial start, one good restart, three failed restarts, none for the fourth
    let times = h.launcher.start_times("a");
    assert_eq!(times.len(), 5);
    for (i, pair) in times[2..].windows(2).enumerate() {
        let expected = Duration::from_millis(40 * 2u64.pow(i as u32 + 1));
        assert!(
            pair[1] - pair[0] >= expected,
            "attempt {} came after {:?}, expected at least {:?}",
            i + 2,
            pair[1] - pair[0],
            expected
        );
    }

    h.launcher.heal("a");
    assert!(h.manager.start_service("a").await.success);
    let status = h.manager.get_service_status("a").await.unwrap();
    assert_eq!(status.state, ServiceState::Running);
    assert_eq!(status.restart_attempts, 0);
}

#[tokio::test]
async fn test_stop_during_restart_backoff_wins() {
    let mut settings = fast_settings();
    settings.restart_base_delay = Duration::from_millis(300);
    let h = harness_with(FakeLauncher::new(), settings);
    h.manager.register_service(native_service("a", &[])).await;
    assert!(h.manager.start_service("a").await.success);

    let manager = h.manager.clone();
    let restart = tokio::spawn(async move { manager.restart_service("a").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.manager.stop_service("a").await.success);

    assert!(restart.await.unwrap().success);
    let status = h.manager.get_service_status("a").await.unwrap();
    assert_eq!(status.state, ServiceState::Stopped);
    assert_eq!(h.launcher.started(), vec!["a"]);
}

#[tokio::test]
async fn test_mode_switch_during_restart_backoff_wins() {
    let mut settings = fast_settings();
    settings.restart_base_delay = Duration::from_millis(300);
    let h = harness_with(FakeLauncher::new(), settings);
    h.manager.register_service(native_service("a", &[])).await;
    assert!(h.manager.start_service("a").await.success);

    let manager = h.manager.clone();
    let restart = tokio::spawn(async move { manager.restart_service("a").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        h.manager
            .set_service_mode("a", DeploymentMode::Native, None)
            .await
            .success
    );

    assert!(restart.await.unwrap().success);
    let status = h.manager.get_service_status("a").await.unwrap();
    assert_eq!(status.state, ServiceState::Stopped);
    assert_eq!(status.restart_attempts, 0);
    assert_eq!(h.launcher.started(), vec!["a"]);
}

#[tokio::test]
async fn test_stop_during_launch_releases_new_instance() {
    let h = harness_with(FakeLauncher::with_delay(Duration::from_millis(200)), fast_settings());
    h.manager.register_service(native_service("a", &[])).await;

    let manager = h.manager.clone();
    let start = tokio::spawn(async move { manager.start_service("a").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.manager.stop_service("a").await.success);

    assert!(start.await.unwrap().success);
    let status = h.manager.get_service_status("a").await.unwrap();
    assert_eq!(status.state, ServiceState::Stopped);
    assert_eq!(h.launcher.started(), vec!["a"]);
    assert_eq!(h.launcher.stopped(), vec!["a"]);
}

#[tokio::test]
async fn test_mode_switch_clears_url_and_forces_stopped() {
    let h = harness();
    let events = h.manager.subscribe().await;
    h.manager
        .register_service(
            ServiceDescriptor::new("n8n").containerized(ContainerConfig::new("n8nio/n8n")),
        )
        .await;

    assert!(h.manager.start_service("n8n").await.success);
    let status = h.manager.get_service_status("n8n").await.unwrap();
    assert_eq!(status.mode, Some(DeploymentMode::Containerized));
    assert_eq!(status.url, None);
    assert_eq!(h.containers.running_names(), vec!["lifecycle-n8n"]);
    assert_eq!(*h.containers.pulls.lock().unwrap(), vec!["n8nio/n8n"]);

    let switched = h
        .manager
        .set_service_mode(
            "n8n",
            DeploymentMode::Manual,
            Some("http://10.0.0.2:5678".to_string()),
        )
        .await;
    assert!(switched.success, "{:?}", switched.error);
    let status = h.manager.get_service_status("n8n").await.unwrap();
    assert_eq!(status.state, ServiceState::Stopped);
    assert_eq!(status.mode, None);
    assert!(h.containers.running_names().is_empty());

    assert!(h.manager.start_service("n8n").await.success);
    let status = h.manager.get_service_status("n8n").await.unwrap();
    assert_eq!(status.mode, Some(DeploymentMode::Manual));
    assert_eq!(status.url.as_deref(), Some("http://10.0.0.2:5678"));

    assert!(
        h.manager
            .set_service_mode("n8n", DeploymentMode::Containerized, None)
            .await
            .success
    );
    let status = h.manager.get_service_status("n8n").await.unwrap();
    assert_eq!(status.state, ServiceState::Stopped);
    assert_eq!(status.url, None);

    assert!(h.manager.start_service("n8n").await.success);
    let status = h.manager.get_service_status("n8n").await.unwrap();
    assert_eq!(status.mode, Some(DeploymentMode::Containerized));
    assert_eq!(status.url, None);
    // The stopped container from the first run is replaced, the image is not pulled again
    assert_eq!(h.containers.pulls.lock().unwrap().len(), 1);

    let stopped = wait_for_event(&events, Duration::from_secs(1), |e| {
        matches!(e, LifecycleEvent::ServiceStopped { service } if service == "n8n")
    })
    .await;
    assert!(stopped.is_some());
}

#[tokio::test]
async fn test_pinned_service_rejects_mode() {
    let h = harness();
    h.manager
        .register_service(
            native_service("llama-engine", &[])
                .pinned_to([DeploymentMode::Native, DeploymentMode::Remote]),
        )
        .await;

    let result = h
        .manager
        .set_service_mode("llama-engine", DeploymentMode::Manual, Some("http://x".into()))
        .await;
    assert!(!result.success);
    assert_eq!(
        h.manager.resolve_mode("llama-engine").await.unwrap(),
        DeploymentMode::Native
    );
}

#[tokio::test]
async fn test_health_loop_restarts_managed_service() {
    let h = harness();
    let events = h.manager.subscribe().await;
    h.manager.register_service(native_service("a", &[])).await;
    assert!(h.manager.start_all_services().await.success);

    h.launcher.fail_next_probe("a");

    let unhealthy = wait_for_event(&events, Duration::from_secs(5), |e| {
        matches!(e, LifecycleEvent::ServiceUnhealthy { service, .. } if service == "a")
    })
    .await;
    assert!(unhealthy.is_some());

    let restarted = wait_for_event(&events, Duration::from_secs(5), |e| {
        matches!(e, LifecycleEvent::ServiceStarted { service, .. } if service == "a")
    })
    .await;
    assert!(restarted.is_some());
    assert_eq!(h.launcher.start_times("a").len(), 2);

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_health_loop_never_restarts_manual_service() {
    let h = harness();
    let events = h.manager.subscribe().await;
    h.manager
        .register_service(ServiceDescriptor::new("mcp").endpoint("http://10.0.0.3:8092"))
        .await;
    assert!(h.manager.start_all_services().await.success);
    assert_eq!(
        h.manager.get_service_status("mcp").await.unwrap().mode,
        Some(DeploymentMode::Manual)
    );

    h.probe.set_healthy(false);

    let errored = wait_for_event(&events, Duration::from_secs(5), |e| {
        matches!(
            e,
            LifecycleEvent::ServiceStateChanged { service, to: ServiceState::Error, .. }
                if service == "mcp"
        )
    })
    .await;
    assert!(errored.is_some());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let status = h.manager.get_service_status("mcp").await.unwrap();
    assert_eq!(status.state, ServiceState::Error);
    assert_eq!(status.restart_attempts, 0);
    assert!(h.launcher.started().is_empty());

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_stop_all_attempts_every_service() {
    let h = harness();
    h.manager.register_service(native_service("a", &[])).await;
    h.manager.register_service(native_service("b", &["a"])).await;
    assert!(h.manager.start_all_services().await.success);

    let events = h.manager.subscribe_to([EventKind::AllServicesStopped]).await;
    assert!(h.manager.stop_all_services().await.success);
    assert_eq!(h.launcher.stopped(), vec!["b", "a"]);
    assert_eq!(events.try_recv().unwrap(), LifecycleEvent::AllServicesStopped);

    let status = h.manager.get_services_status().await;
    assert!(status.values().all(|s| s.state == ServiceState::Stopped));
}

#[tokio::test]
async fn test_health_loop_follows_power_and_activity() {
    let mut settings = fast_settings();
    settings.health_check_interval = Duration::from_millis(50);
    settings.always_checked = vec!["llama-engine".to_string()];
    let h = harness_with(FakeLauncher::new(), settings);
    h.manager.register_service(native_service("llama-engine", &[])).await;
    h.manager.register_service(native_service("comfyui", &[])).await;
    assert!(h.manager.start_all_services().await.success);

    // Recently started services are polled at the base interval
    let polled = h.launcher.probe_count("comfyui");
    assert!(
        h.launcher
            .wait_for_probes("comfyui", polled + 2, Duration::from_secs(2))
            .await
    );

    h.manager.set_on_battery(true).await;
    h.clock.advance(Duration::from_secs(61 * 60));
    assert_eq!(h.manager.adaptive_mode().await, AdaptiveMode::Sleep);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // An hour on: the allow-listed engine is checked, comfyui is skipped
    let engine = h.launcher.probe_count("llama-engine");
    let comfyui = h.launcher.probe_count("comfyui");
    h.clock.advance(Duration::from_secs(61 * 60));
    assert!(
        h.launcher
            .wait_for_probes("llama-engine", engine + 1, Duration::from_secs(2))
            .await
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.launcher.probe_count("comfyui"), comfyui);

    // Using comfyui brings it back to the base interval
    h.manager.record_service_activity("comfyui").await;
    assert_eq!(h.manager.adaptive_mode().await, AdaptiveMode::Active);
    assert!(
        h.launcher
            .wait_for_probes("comfyui", comfyui + 3, Duration::from_secs(2))
            .await
    );

    let status = h.manager.get_services_status().await;
    assert!(status.values().all(|s| s.state == ServiceState::Running));
    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_resume_wakes_health_loop() {
    let mut settings = fast_settings();
    settings.health_check_interval = Duration::from_secs(5);
    let h = harness_with(FakeLauncher::new(), settings);
    h.manager.register_service(native_service("comfyui", &[])).await;
    assert!(h.manager.start_all_services().await.success);
    assert!(
        h.launcher
            .wait_for_probes("comfyui", 2, Duration::from_secs(1))
            .await
    );

    h.manager.set_on_battery(true).await;
    h.clock.advance(Duration::from_secs(61 * 60));
    let before = h.launcher.probe_count("comfyui");

    // Well inside the 5s base interval the loop would otherwise sleep through
    h.manager.notify_resume().await;
    assert!(
        h.launcher
            .wait_for_probes("comfyui", before + 1, Duration::from_secs(1))
            .await
    );

    h.manager.shutdown().await;
}
