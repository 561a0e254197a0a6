//! End-to-end flows against an in-process gateway with the local-disk
//! driver.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use velo::engine::remote::RemoteClient;
use velo_common::{NegotiateStatus, ProjectConfig, RemoteConfig, ACTION_DOWNLOAD, ACTION_UPLOAD};
use velod::http_api::{router, GatewayState};
use velod::storage::local::LocalDriver;

use crate::common::{run_task, task, TestWorkspace};

const TOKEN: &str = "shared-secret";

struct TestGateway {
    base_url: String,
    objects_root: PathBuf,
    _dir: tempfile::TempDir,
}

async fn spawn_gateway() -> TestGateway {
    let dir = tempfile::tempdir().expect("create gateway dir");
    let objects_root = dir.path().join("objects");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let base_url = format!("http://{}", listener.local_addr().expect("local addr"));

    let driver =
        LocalDriver::new(objects_root.clone(), base_url.clone()).expect("create driver");
    let state = GatewayState {
        driver: Arc::new(driver),
        auth_token: Some(TOKEN.to_string()),
        proxy_root: Some(objects_root.clone()),
    };

    let app = router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve gateway");
    });

    TestGateway {
        base_url,
        objects_root,
        _dir: dir,
    }
}

fn remote_config(ws: &TestWorkspace, gateway: &TestGateway) -> ProjectConfig {
    ws.manifest("packages/a", "a", &[]);
    ws.write_file("packages/a/src/main.c", "int main() { return 0; }\n");

    let mut pipeline = BTreeMap::new();
    pipeline.insert(
        "build".to_string(),
        task(
            "echo ran >> build.log && mkdir -p dist && echo X > dist/f",
            &["src/**"],
            &["dist"],
            &[],
        ),
    );
    ProjectConfig {
        version: 1,
        remote: RemoteConfig {
            enabled: true,
            url: gateway.base_url.clone(),
            token: TOKEN.to_string(),
        },
        packages: vec!["packages/*".to_string()],
        pipeline,
    }
}

#[tokio::test]
async fn test_miss_uploads_then_second_host_hits_remote() {
    let gateway = spawn_gateway().await;

    // Host 1: clean caches everywhere, so the task executes and pushes.
    let host1 = TestWorkspace::new();
    let config1 = remote_config(&host1, &gateway);
    let key = run_task(&host1, &config1, "build", None).await.unwrap();
    assert_eq!(host1.log_lines("packages/a/build.log"), 1);

    // The archive and its metadata sidecar landed in the object store.
    assert!(gateway.objects_root.join(key.as_str()).is_file());
    assert!(gateway
        .objects_root
        .join(format!("{}.meta.json", key.as_str()))
        .is_file());

    // Host 2: identical sources, empty local cache. The subprocess must
    // not launch; outputs come from the remote archive.
    let host2 = TestWorkspace::new();
    let config2 = remote_config(&host2, &gateway);
    let key2 = run_task(&host2, &config2, "build", None).await.unwrap();

    assert_eq!(key, key2);
    assert_eq!(host2.log_lines("packages/a/build.log"), 0);
    assert_eq!(host2.read_file("packages/a/dist/f"), "X\n");
    // The fetched archive was written through the local store too.
    assert_eq!(host2.stored_archives().len(), 1);
}

#[tokio::test]
async fn test_second_upload_negotiation_is_skipped() {
    let gateway = spawn_gateway().await;
    let client = RemoteClient::new(&gateway.base_url, TOKEN).unwrap();
    let key = "f".repeat(64);

    // First writer negotiates and transfers.
    let resp = client.negotiate(&key, ACTION_UPLOAD).await.unwrap().unwrap();
    assert_eq!(resp.status, NegotiateStatus::UploadNeeded);
    let url = resp.url.unwrap();

    let archive = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(archive.path(), b"first writer's archive").unwrap();
    client.upload(&url, archive.path()).await.unwrap();

    // The racing second writer is told to skip; no transfer happens.
    let resp = client.negotiate(&key, ACTION_UPLOAD).await.unwrap().unwrap();
    assert_eq!(resp.status, NegotiateStatus::Skipped);
    assert!(resp.url.is_none());

    // And downloads find the first writer's bytes.
    let resp = client
        .negotiate(&key, ACTION_DOWNLOAD)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resp.status, NegotiateStatus::Found);

    let dest = tempfile::NamedTempFile::new().unwrap();
    client
        .download(&resp.url.unwrap(), dest.path())
        .await
        .unwrap();
    assert_eq!(
        std::fs::read(dest.path()).unwrap(),
        b"first writer's archive"
    );
}

#[tokio::test]
async fn test_download_negotiation_miss_is_none() {
    let gateway = spawn_gateway().await;
    let client = RemoteClient::new(&gateway.base_url, TOKEN).unwrap();

    let missing = client
        .negotiate(&"0".repeat(64), ACTION_DOWNLOAD)
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_unreachable_remote_degrades_to_local_execution() {
    let ws = TestWorkspace::new();
    ws.manifest("packages/a", "a", &[]);
    ws.write_file("packages/a/src/main.c", "x\n");

    let mut pipeline = BTreeMap::new();
    pipeline.insert(
        "build".to_string(),
        task(
            "echo ran >> build.log && mkdir -p dist && echo X > dist/f",
            &["src/**"],
            &["dist"],
            &[],
        ),
    );
    let config = ProjectConfig {
        remote: RemoteConfig {
            enabled: true,
            // Nothing listens here; negotiation fails fast.
            url: "http://127.0.0.1:9".to_string(),
            token: String::new(),
        },
        packages: vec!["packages/*".to_string()],
        pipeline,
        ..ProjectConfig::default()
    };

    // The task still succeeds; remote failures are a degraded mode, not
    // an error.
    run_task(&ws, &config, "build", None).await.unwrap();
    assert_eq!(ws.read_file("packages/a/dist/f"), "X\n");
    assert_eq!(ws.log_lines("packages/a/build.log"), 1);
}

#[tokio::test]
async fn test_disabled_remote_never_contacts_the_gateway() {
    let gateway = spawn_gateway().await;

    let ws = TestWorkspace::new();
    let mut config = remote_config(&ws, &gateway);
    config.remote.enabled = false;

    let key = run_task(&ws, &config, "build", None).await.unwrap();
    assert!(!gateway.objects_root.join(key.as_str()).exists());
}
