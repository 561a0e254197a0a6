use reqwest::StatusCode;
use serde_json::json;

use velo_common::{NegotiateResponse, NegotiateStatus};

use crate::common::spawn_gateway;

const KEY: &str = "0a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f9";

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn test_health_is_open() {
    let gw = spawn_gateway(Some("secret")).await;

    let resp = client()
        .get(format!("{}/health", gw.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "up");
}

#[tokio::test]
async fn test_missing_auth_header_is_401() {
    let gw = spawn_gateway(Some("secret")).await;

    let resp = client()
        .post(format!("{}/v1/negotiate", gw.base_url))
        .json(&json!({ "hash": KEY, "action": "upload" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_token_is_403() {
    let gw = spawn_gateway(Some("secret")).await;

    let resp = client()
        .post(format!("{}/v1/negotiate", gw.base_url))
        .bearer_auth("not-the-secret")
        .json(&json!({ "hash": KEY, "action": "upload" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_negotiate_rejects_bad_hash_and_action() {
    let gw = spawn_gateway(None).await;

    let resp = client()
        .post(format!("{}/v1/negotiate", gw.base_url))
        .json(&json!({ "hash": "../escape", "action": "upload" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client()
        .post(format!("{}/v1/negotiate", gw.base_url))
        .json(&json!({ "hash": KEY, "action": "delete" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_negotiation_misses_with_404() {
    let gw = spawn_gateway(None).await;

    let resp = client()
        .post(format!("{}/v1/negotiate", gw.base_url))
        .json(&json!({ "hash": KEY, "action": "download" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_then_download_round_trip() {
    let gw = spawn_gateway(Some("secret")).await;
    let payload = b"sealed archive bytes".to_vec();

    // Negotiate the upload.
    let resp = client()
        .post(format!("{}/v1/negotiate", gw.base_url))
        .bearer_auth("secret")
        .json(&json!({ "hash": KEY, "action": "upload" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let negotiated: NegotiateResponse = resp.json().await.unwrap();
    assert_eq!(negotiated.status, NegotiateStatus::UploadNeeded);
    let put_url = negotiated.url.expect("upload url");

    // Transfer to the vended URL. The proxy itself requires the token.
    let resp = client()
        .put(&put_url)
        .bearer_auth("secret")
        .body(payload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Second upload negotiation is skipped.
    let resp = client()
        .post(format!("{}/v1/negotiate", gw.base_url))
        .bearer_auth("secret")
        .json(&json!({ "hash": KEY, "action": "upload" }))
        .send()
        .await
        .unwrap();
    let negotiated: NegotiateResponse = resp.json().await.unwrap();
    assert_eq!(negotiated.status, NegotiateStatus::Skipped);
    assert!(negotiated.url.is_none());

    // Download negotiation finds it, and the vended URL serves the bytes.
    let resp = client()
        .post(format!("{}/v1/negotiate", gw.base_url))
        .bearer_auth("secret")
        .json(&json!({ "hash": KEY, "action": "download" }))
        .send()
        .await
        .unwrap();
    let negotiated: NegotiateResponse = resp.json().await.unwrap();
    assert_eq!(negotiated.status, NegotiateStatus::Found);

    let resp = client()
        .get(negotiated.url.expect("download url"))
        .bearer_auth("secret")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.bytes().await.unwrap().to_vec(), payload);
}

#[tokio::test]
async fn test_first_write_wins_on_direct_put() {
    let gw = spawn_gateway(None).await;
    let url = format!("{}/v1/proxy/blob/{}", gw.base_url, KEY);

    let resp = client().put(&url).body("first").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client().put(&url).body("second").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let stored = std::fs::read(gw.objects_root.join(KEY)).unwrap();
    assert_eq!(stored, b"first");
}

#[tokio::test]
async fn test_proxy_download_missing_is_404() {
    let gw = spawn_gateway(None).await;

    let resp = client()
        .get(format!("{}/v1/proxy/blob/{}", gw.base_url, KEY))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_proxy_rejects_traversal_keys() {
    let gw = spawn_gateway(None).await;

    // A dotted key that normalizes outside the root must never be
    // treated as an object name.
    let resp = client()
        .get(format!("{}/v1/proxy/blob/..%2Fescape", gw.base_url))
        .send()
        .await
        .unwrap();
    assert!(
        resp.status() == StatusCode::BAD_REQUEST || resp.status() == StatusCode::NOT_FOUND,
        "unexpected status {}",
        resp.status()
    );
}
