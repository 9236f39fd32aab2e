use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use burrow_common::Did;
use burrow_pds::config::Config;
use burrow_pds::http::router;
use burrow_pds::keys::generate_key;
use burrow_pds::{Pds, RepoStatus};
use bytes::Bytes;
use tower::ServiceExt;

async fn get(pds: &Pds, uri: &str) -> (StatusCode, axum::http::HeaderMap, Bytes) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router(pds.sync().clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body)
}

fn json(body: &Bytes) -> serde_json::Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn list_repos_and_latest_commit() {
    let dir = tempfile::tempdir().unwrap();
    let pds = Pds::in_memory(&Config::for_tests(dir.path())).unwrap();
    let did = Did::raw("did:plc:routed");
    let created = pds.create_repo(&did, &generate_key()).await.unwrap();

    let (status, _, body) = get(&pds, "/xrpc/com.atproto.sync.listRepos").await;
    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    assert!(body.get("cursor").is_none());
    assert_eq!(body["repos"][0]["did"], "did:plc:routed");
    assert_eq!(body["repos"][0]["head"], created.commit.cid.to_string());
    assert_eq!(body["repos"][0]["active"], true);

    let (status, _, body) = get(
        &pds,
        "/xrpc/com.atproto.sync.getLatestCommit?did=did:plc:routed",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["rev"], created.commit.rev.as_str());
}

#[tokio::test]
async fn errors_use_xrpc_shape() {
    let dir = tempfile::tempdir().unwrap();
    let pds = Pds::in_memory(&Config::for_tests(dir.path())).unwrap();
    let did = Did::raw("did:plc:hidden");
    pds.create_repo(&did, &generate_key()).await.unwrap();
    pds.set_status(&did, RepoStatus::Takendown).await.unwrap();

    let (status, _, body) = get(&pds, "/xrpc/com.atproto.sync.listBlobs?did=did:plc:hidden").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "RepoTakendown");

    let (status, _, body) = get(&pds, "/xrpc/com.atproto.sync.getRepoStatus?did=did:plc:hidden").await;
    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    assert_eq!(body["active"], false);
    assert_eq!(body["status"], "takendown");
    assert!(body.get("rev").is_none());

    let (status, _, body) = get(&pds, "/xrpc/com.atproto.sync.getRepo?did=did:plc:missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json(&body)["error"], "RepoNotFound");

    let (status, _, body) = get(&pds, "/xrpc/com.atproto.sync.listRepos?cursor=nonsense").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "InvalidRequest");

    let (status, _, body) = get(&pds, "/xrpc/com.atproto.sync.getLatestCommit").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json(&body)["message"].is_string());
}

#[tokio::test]
async fn get_blob_serves_bytes_with_headers() {
    let dir = tempfile::tempdir().unwrap();
    let pds = Pds::in_memory(&Config::for_tests(dir.path())).unwrap();
    let did = Did::raw("did:plc:pictures");
    pds.create_repo(&did, &generate_key()).await.unwrap();
    let blob = pds
        .blobs()
        .store(Bytes::from_static(b"\x89PNG fake"), "image/png", &did)
        .await
        .unwrap();

    let uri = format!(
        "/xrpc/com.atproto.sync.getBlob?did=did:plc:pictures&cid={}",
        blob.cid
    );
    let (status, headers, body) = get(&pds, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");
    assert_eq!(headers[header::CONTENT_LENGTH], "9");
    assert_eq!(&body[..], b"\x89PNG fake");
}

#[tokio::test]
async fn get_blob_redirects_to_cdn() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        blob_cdn_url: Some("https://cdn.example.com".parse().unwrap()),
        ..Config::for_tests(dir.path())
    };
    let pds = Pds::in_memory(&config).unwrap();
    let did = Did::raw("did:plc:cdn");
    pds.create_repo(&did, &generate_key()).await.unwrap();
    let blob = pds
        .blobs()
        .store(Bytes::from_static(b"abc"), "text/plain", &did)
        .await
        .unwrap();

    let uri = format!("/xrpc/com.atproto.sync.getBlob?did=did:plc:cdn&cid={}", blob.cid);
    let (status, headers, _) = get(&pds, &uri).await;
    assert!(status.is_redirection());
    assert_eq!(
        headers[header::LOCATION],
        format!("https://cdn.example.com/blobs/did:plc:cdn/{}", blob.cid).as_str()
    );
}

#[tokio::test]
async fn get_repo_exports_a_car() {
    let dir = tempfile::tempdir().unwrap();
    let pds = Pds::in_memory(&Config::for_tests(dir.path())).unwrap();
    let did = Did::raw("did:plc:exported");
    let created = pds.create_repo(&did, &generate_key()).await.unwrap();

    let (status, headers, body) = get(&pds, "/xrpc/com.atproto.sync.getRepo?did=did:plc:exported").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/vnd.ipld.car");
    let parsed = burrow_repo::car::parse_car_bytes(&body).await.unwrap();
    assert_eq!(parsed.root(), created.commit.cid);
}
