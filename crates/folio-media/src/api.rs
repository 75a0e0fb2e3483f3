//! HTTP surface for asset delivery.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::delivery::AssetDelivery;
use crate::error::MediaError;

const X_CACHE: &str = "x-cache";

/// Builds the router: `GET /assets/:key` and `GET /health`.
pub fn router(delivery: Arc<AssetDelivery>) -> Router {
    Router::new()
        .route("/assets/:key", get(asset_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(delivery)
}

/// Serves `router` on `addr` until `shutdown` is cancelled.
pub async fn serve(addr: SocketAddr, router: Router, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "asset server listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("asset server stopped");
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn asset_handler(
    State(delivery): State<Arc<AssetDelivery>>,
    Path(key): Path<String>,
) -> Result<Response, MediaError> {
    let delivery = delivery.deliver(&key).await?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(delivery.content_type));
    headers.insert(
        X_CACHE,
        HeaderValue::from_static(delivery.cache_status.as_header()),
    );
    if let Some(directive) = delivery.cache_control {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(directive));
    }

    let body = Body::from_stream(ReaderStream::new(delivery.body));
    Ok((StatusCode::OK, headers, body).into_response())
}

impl IntoResponse for MediaError {
    fn into_response(self) -> Response {
        let (status, message) = if self.is_not_found() {
            (StatusCode::NOT_FOUND, self.to_string())
        } else if self.is_client_error() {
            (StatusCode::BAD_REQUEST, self.to_string())
        } else {
            error!(error = %self, "asset request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_id::{AssetId, VariantKey, VariantWidth};
    use crate::pipeline::{PipelineConfig, VariantPipeline};
    use crate::registry::AssetRegistry;
    use axum::http::Request;
    use bytes::Bytes;
    use folio_storage::{MemoryStore, StorageProvider};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn setup() -> (Arc<MemoryStore>, Arc<AssetRegistry>, Router) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(AssetRegistry::new(store.clone(), Uuid::NAMESPACE_DNS));
        let config = PipelineConfig {
            workers: 1,
            ..PipelineConfig::default()
        };
        let pipeline = Arc::new(VariantPipeline::start(
            &config,
            store.clone(),
            &CancellationToken::new(),
        ));
        let delivery = Arc::new(AssetDelivery::new(
            registry.clone(),
            pipeline,
            store.clone(),
            config.job_timeout(),
        ));
        (store, registry, router(delivery))
    }

    async fn send_get(router: Router, uri: &str) -> Response {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        router.oneshot(request).await.unwrap()
    }

    async fn body_bytes(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_store, _registry, router) = setup();
        let response = send_get(router, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_hit_headers() {
        let (store, _registry, router) = setup();
        let id = AssetId::derive(&Uuid::NAMESPACE_DNS, "photo.jpg");
        store
            .save(
                &VariantKey::new(id, VariantWidth::W800).storage_key(),
                Bytes::from_static(b"RIFFwebp"),
            )
            .await
            .unwrap();

        let response = send_get(router, &format!("/assets/{id}_800")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-cache"], "HIT");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/webp");
        assert_eq!(
            response.headers()[header::CACHE_CONTROL],
            "public, max-age=31536000, immutable"
        );
        assert_eq!(body_bytes(response).await, Bytes::from_static(b"RIFFwebp"));
    }

    #[tokio::test]
    async fn test_miss_headers() {
        let (store, registry, router) = setup();
        store
            .save("photo.gif", Bytes::from_static(b"GIF89a"))
            .await
            .unwrap();
        let id = registry.obfuscate("photo.gif").unwrap();

        let response = send_get(router, &format!("/assets/{id}_1200")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-cache"], "MISS");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/gif");
        assert!(response.headers().get(header::CACHE_CONTROL).is_none());
        assert_eq!(body_bytes(response).await, Bytes::from_static(b"GIF89a"));
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (_store, _registry, router) = setup();
        let id = AssetId::derive(&Uuid::NAMESPACE_DNS, "never-registered.jpg");

        let unsupported = send_get(router.clone(), &format!("/assets/{id}_640")).await;
        assert_eq!(unsupported.status(), StatusCode::NOT_FOUND);

        let unknown = send_get(router.clone(), &format!("/assets/{id}_800")).await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let malformed = send_get(router.clone(), "/assets/not-a-uuid_800").await;
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

        let shapeless = send_get(router, "/assets/justonepart").await;
        assert_eq!(shapeless.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_backend_failure_is_500() {
        let (store, registry, router) = setup();
        let id = registry.obfuscate("photo.jpg").unwrap();
        store.set_unavailable(true);

        let response = send_get(router, &format!("/assets/{id}_800")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["error"], "internal error");
    }
}
