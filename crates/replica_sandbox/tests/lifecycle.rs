//! End-to-end lifecycle against the mock provider.

use std::sync::Arc;
use std::time::Duration;

use replica_sandbox::{
    EnvironmentConfig, EnvironmentManager, EnvironmentState, ExecOutput, MockProvider,
    ProjectFile, Scaffold,
};

fn manager(provider: &MockProvider) -> EnvironmentManager {
    EnvironmentManager::new(
        Arc::new(provider.clone()),
        EnvironmentConfig::default().health(2, 0),
        Scaffold::builtin(),
    )
}

#[tokio::test]
async fn test_serving_environment_accepts_hot_uploads() {
    let provider = MockProvider::new().on_exec("localhost:3000", ExecOutput::new(0, "304"));
    let manager = manager(&provider);

    let env = manager.provision("clone-1", &[], |_| {}).await.unwrap();
    manager
        .upload("clone-1", "app/page.tsx", "export default function Page() {}")
        .await
        .unwrap();

    assert_eq!(
        provider.file(&env.handle, "/home/mock/project/app/page.tsx").as_deref(),
        Some("export default function Page() {}")
    );
}

#[tokio::test]
async fn test_logs_read_runtime_tail() {
    let provider = MockProvider::new()
        .on_exec("localhost:3000", ExecOutput::new(0, "200"))
        .on_exec("tail -n 50", ExecOutput::new(0, "Failed to compile\n./components/Nav.tsx"));
    let manager = manager(&provider);
    manager.provision("clone-1", &[], |_| {}).await.unwrap();

    let logs = manager.logs("clone-1", 50).await.unwrap();
    assert!(logs.contains("./components/Nav.tsx"));
}

#[tokio::test]
async fn test_teardown_during_provision_releases_pending_handle() {
    let provider = MockProvider::new().on_exec("localhost:3000", ExecOutput::new(1, "fail"));
    let manager = Arc::new(EnvironmentManager::new(
        Arc::new(provider.clone()),
        EnvironmentConfig::default().health(50, 1),
        Scaffold::builtin(),
    ));

    let task = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.provision("clone-1", &[], |_| {}).await })
    };

    // Let it get past create and into health probing
    for _ in 0..50 {
        if manager.state("clone-1") == EnvironmentState::Starting {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    task.abort();
    let _ = task.await;

    assert!(manager.teardown("clone-1").await);
    assert!(provider.live_handles().is_empty());
}

#[tokio::test]
async fn test_overlay_replaces_placeholder_page() {
    let provider = MockProvider::new().on_exec("localhost:3000", ExecOutput::new(0, "200"));
    let manager = manager(&provider);

    let env = manager
        .provision(
            "clone-2",
            &[ProjectFile::new("app/page.tsx", "generated")],
            |_| {},
        )
        .await
        .unwrap();

    assert_eq!(
        provider.file(&env.handle, "/home/mock/project/app/page.tsx").as_deref(),
        Some("generated")
    );
}
