//! HTTP surface for the sync endpoints

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use burrow_common::Did;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::blobs::BlobResponse;
use crate::error::{PdsError, Result};
use crate::sync::{LatestCommit, ListBlobsOutput, ListReposOutput, RepoStatusOutput, SyncService};

const CAR_MIME: &str = "application/vnd.ipld.car";

/// Router with every sync endpoint under `/xrpc`
pub fn router(sync: SyncService) -> Router {
    Router::new()
        .route("/xrpc/_health", get(health))
        .route("/xrpc/com.atproto.sync.listRepos", get(list_repos))
        .route("/xrpc/com.atproto.sync.listBlobs", get(list_blobs))
        .route("/xrpc/com.atproto.sync.getBlob", get(get_blob))
        .route("/xrpc/com.atproto.sync.getLatestCommit", get(get_latest_commit))
        .route("/xrpc/com.atproto.sync.getRepoStatus", get(get_repo_status))
        .route("/xrpc/com.atproto.sync.getRepo", get(get_repo))
        .layer(TraceLayer::new_for_http())
        .with_state(sync)
}

/// Serve `app` on `listener` until `cancel` fires
pub async fn serve(listener: TcpListener, app: Router, cancel: CancellationToken) -> Result<()> {
    info!("HTTP server listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

fn parse_did(did: &str) -> Result<Did> {
    Did::new(did).map_err(|e| PdsError::input("InvalidRequest", e.to_string()))
}

#[derive(Debug, Deserialize)]
struct PageParams {
    limit: Option<usize>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoPageParams {
    did: String,
    limit: Option<usize>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoParams {
    did: String,
}

#[derive(Debug, Deserialize)]
struct BlobParams {
    did: String,
    cid: String,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }))
}

async fn list_repos(
    State(sync): State<SyncService>,
    query: std::result::Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<ListReposOutput>> {
    let Query(params) = query?;
    let out = sync
        .list_repositories(params.cursor.as_deref(), params.limit)
        .await?;
    Ok(Json(out))
}

async fn list_blobs(
    State(sync): State<SyncService>,
    query: std::result::Result<Query<RepoPageParams>, QueryRejection>,
) -> Result<Json<ListBlobsOutput>> {
    let Query(params) = query?;
    let did = parse_did(&params.did)?;
    let out = sync
        .list_blobs(&did, params.cursor.as_deref(), params.limit)
        .await?;
    Ok(Json(out))
}

async fn get_blob(
    State(sync): State<SyncService>,
    query: std::result::Result<Query<BlobParams>, QueryRejection>,
) -> Result<Response> {
    let Query(params) = query?;
    let did = parse_did(&params.did)?;
    let response = match sync.get_blob(&did, &params.cid).await? {
        BlobResponse::Bytes { data, mime, size } => (
            [
                (header::CONTENT_TYPE, mime),
                (header::CONTENT_LENGTH, size.to_string()),
                (header::X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
                (
                    header::CONTENT_SECURITY_POLICY,
                    "default-src 'none'; sandbox".to_string(),
                ),
            ],
            data,
        )
            .into_response(),
        BlobResponse::Redirect { url } => Redirect::temporary(url.as_str()).into_response(),
    };
    Ok(response)
}

async fn get_latest_commit(
    State(sync): State<SyncService>,
    query: std::result::Result<Query<RepoParams>, QueryRejection>,
) -> Result<Json<LatestCommit>> {
    let Query(params) = query?;
    let did = parse_did(&params.did)?;
    Ok(Json(sync.get_latest_commit(&did).await?))
}

async fn get_repo_status(
    State(sync): State<SyncService>,
    query: std::result::Result<Query<RepoParams>, QueryRejection>,
) -> Result<Json<RepoStatusOutput>> {
    let Query(params) = query?;
    let did = parse_did(&params.did)?;
    Ok(Json(sync.get_repo_status(&did).await?))
}

async fn get_repo(
    State(sync): State<SyncService>,
    query: std::result::Result<Query<RepoParams>, QueryRejection>,
) -> Result<Response> {
    let Query(params) = query?;
    let did = parse_did(&params.did)?;
    let car = sync.get_repo(&did).await?;
    Ok(([(header::CONTENT_TYPE, CAR_MIME)], car).into_response())
}
