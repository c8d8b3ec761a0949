use std::{future::Future, io};

use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    routing::post,
};
use reel_model::JobId;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::info;

use crate::{ApiError, UploadService};

/// HTTP front of an [`UploadService`].
///
/// Routes:
/// - `POST /upload?job_id=<id>` with the upload token in `Authorization`
pub struct UploadApi {
    service: UploadService,
}

impl UploadApi {
    pub fn new(service: UploadService) -> Self {
        Self { service }
    }

    pub fn router(self) -> Router {
        let limit = self.service.config().body_limit;
        Router::new()
            .route("/upload", post(upload))
            .layer(DefaultBodyLimit::max(limit))
            .with_state(self.service)
    }
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    job_id: Option<String>,
}

/// POST /upload
async fn upload(
    State(service): State<UploadService>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let raw = query.job_id.ok_or(ApiError::MissingJobId)?;
    let job_id: JobId = raw.parse().map_err(|_| ApiError::InvalidJobId(raw))?;
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(ApiError::MissingToken)?;

    service.upload(job_id, token, body).await?;
    Ok(StatusCode::OK)
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = ?listener.local_addr().ok(), "upload api listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
