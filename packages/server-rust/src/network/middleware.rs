//! Transport-level layers wrapped around the whole axum router.
//!
//! Order, outermost first: request id, HTTP trace, compression, CORS,
//! body limit, timeout, request id propagation. Per-route concerns
//! (caller role, privilege, payload preparation) live in the route
//! pipelines, not here.

use axum::http::header::{HeaderName, CONTENT_TYPE};
use axum::http::{Method, StatusCode};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;
use crate::service::privilege::ACCESS_TOKEN_HEADER;

type HttpLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        TimeoutLayer,
        tower::layer::util::Stack<
            RequestBodyLimitLayer,
            tower::layer::util::Stack<
                CorsLayer,
                tower::layer::util::Stack<
                    CompressionLayer,
                    tower::layer::util::Stack<
                        TraceLayer<
                            tower_http::classify::SharedClassifier<
                                tower_http::classify::ServerErrorsAsFailures,
                            >,
                        >,
                        tower::layer::util::Stack<
                            SetRequestIdLayer<MakeRequestUuid>,
                            tower::layer::util::Identity,
                        >,
                    >,
                >,
            >,
        >,
    >,
>;

#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let x_request_id = HeaderName::from_static("x-request-id");

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(&config.cors_origins))
        .layer(RequestBodyLimitLayer::new(config.body_limit))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

/// Caller headers the route pipelines read, plus `content-type`.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| o.parse().ok()))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::PUT,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            HeaderName::from_static("token"),
            HeaderName::from_static(ACCESS_TOKEN_HEADER),
            HeaderName::from_static("role"),
            HeaderName::from_static("mode"),
            CONTENT_TYPE,
        ])
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    use super::*;

    fn app(config: &NetworkConfig) -> Router {
        Router::new()
            .route("/echo", post(|body: String| async move { body }))
            .layer(build_http_layers(config))
    }

    #[tokio::test]
    async fn responses_carry_a_request_id() {
        let resp = app(&NetworkConfig::default())
            .oneshot(Request::post("/echo").body(Body::from("hi")).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let config = NetworkConfig {
            body_limit: 4,
            ..NetworkConfig::default()
        };
        let resp = app(&config)
            .oneshot(Request::post("/echo").body(Body::from("too long")).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn preflight_allows_caller_headers() {
        let config = NetworkConfig {
            cors_origins: vec!["https://app.example.com".to_string()],
            ..NetworkConfig::default()
        };
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/echo")
            .header("origin", "https://app.example.com")
            .header("access-control-request-method", "PUT")
            .header("access-control-request-headers", "role")
            .body(Body::empty())
            .unwrap();
        let resp = app(&config).oneshot(req).await.unwrap();
        assert_eq!(
            resp.headers()["access-control-allow-origin"],
            "https://app.example.com"
        );
    }
}
