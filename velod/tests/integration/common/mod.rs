use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use velod::http_api::{router, GatewayState};
use velod::storage::local::LocalDriver;

/// A gateway bound to an ephemeral port with a scratch object root.
pub struct TestGateway {
    pub base_url: String,
    pub objects_root: PathBuf,
    _dir: TempDir,
}

/// Spawn an in-process gateway backed by the local-disk driver.
pub async fn spawn_gateway(auth_token: Option<&str>) -> TestGateway {
    let dir = tempfile::tempdir().expect("create temp dir");
    let objects_root = dir.path().join("objects");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let base_url = format!("http://{}", listener.local_addr().expect("local addr"));

    let driver =
        LocalDriver::new(objects_root.clone(), base_url.clone()).expect("create local driver");
    let state = GatewayState {
        driver: Arc::new(driver),
        auth_token: auth_token.map(String::from),
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
