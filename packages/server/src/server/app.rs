//! Application setup and router construction.

use std::sync::Arc;

use axum::{routing::get, Router};
use elc_composite::Gateway;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::server::routes::{health_handler, occs_handler};

/// Shared application state
#[derive(Clone)]
pub struct AxumAppState {
    pub gateway: Arc<Gateway>,
}

/// Build the Axum application router
pub fn build_app(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/occs/{op}", get(occs_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AxumAppState { gateway })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use bytes::Bytes;
    use elc_composite::http::{HttpReply, HttpSource};
    use elc_composite::GatewayOptions;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::util::ServiceExt;

    /// Answers every subquery with a canned body per upstream host.
    struct StubSource;

    #[async_trait]
    impl HttpSource for StubSource {
        async fn get(&self, url: &str) -> HttpReply {
            let body = if url.contains("pbdb.test") {
                r#"{"records": [{"occurrence_no": 1001, "max_ma": 2.5, "min_ma": 1.0}]}"#
            } else {
                r#"{"success": true, "data": [{"occid": 5501,
                    "age": {"ageolder": 12000, "ageyounger": 9000}}]}"#
            };
            HttpReply {
                status: 200,
                reason: "OK".to_string(),
                body: Box::pin(futures::stream::once(async move {
                    Ok(Bytes::from_static(body.as_bytes()))
                })),
            }
        }
    }

    fn app() -> Router {
        let gateway = Gateway::new(
            Arc::new(StubSource),
            GatewayOptions {
                pbdb_base_url: "http://pbdb.test/data1.2".to_string(),
                neotoma_base_url: "http://neotoma.test/v2.0".to_string(),
                timeout: Duration::from_secs(30),
                retries: 2,
            },
        );
        build_app(Arc::new(gateway))
    }

    async fn get_response(uri: &str) -> (StatusCode, String) {
        let response = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn list_json_returns_merged_records() {
        let (status, body) = get_response("/occs/list.json?base_name=Canis").await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["record_count"], 2);
        assert_eq!(parsed["records"][0]["occ_id"], "pbdb:occ:1001");
        assert_eq!(parsed["records"][1]["occ_id"], "neotoma:occ:5501");
    }

    #[tokio::test]
    async fn list_csv_renders_a_table() {
        let (status, body) = get_response("/occs/list.csv?base_name=Canis").await;
        assert_eq!(status, StatusCode::OK);
        let header = body.lines().next().unwrap();
        assert!(header.starts_with("occ_id,database,record_type"));
        assert_eq!(body.lines().count(), 3);
    }

    #[tokio::test]
    async fn missing_selector_is_a_400() {
        let (status, body) = get_response("/occs/list.json?vocab=pbdb").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("selector"));
    }

    #[tokio::test]
    async fn unknown_format_is_a_404() {
        let (status, _) = get_response("/occs/list.xml?base_name=Canis").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (status, body) = get_response("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("healthy"));
    }
}
