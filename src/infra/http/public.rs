use axum::{
    Json, Router,
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderName, HeaderValue, Method, header::CONTENT_TYPE},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::warn;

use crate::application::error::GatewayError;
use crate::application::listing::{Listing, ListingParams};
use crate::application::proxy::ProxyResponse;
use crate::config::CorsSettings;
use crate::infra::speedtest::SpeedReport;

use super::HttpState;
use super::error::ApiError;
use super::middleware::{log_responses, set_request_context};
use super::rate_limit::rate_limit;

pub const REGISTRY_HASH: &str = "registry";
pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-cache");

pub fn build_router(state: HttpState, cors: &CorsSettings) -> Router {
    let listings = Router::new()
        .route("/api/requests", get(list_requests).fallback(read_only))
        .route("/api/news", get(list_news).fallback(read_only))
        .route("/api/phones", get(list_phones).fallback(read_only))
        .route("/api/rescue_points", get(list_rescue_points).fallback(read_only))
        .route_layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit,
        ));

    Router::new()
        .route("/", get(index))
        .route("/api/registry/list", get(registry_list))
        .route("/api/speedtest", get(speedtest))
        .merge(listings)
        .with_state(state)
        .layer(cors_layer(cors))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

fn cors_layer(cors: &CorsSettings) -> CorsLayer {
    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

#[derive(Debug, Serialize)]
struct NodeStatus<'a> {
    message: &'static str,
    status: &'static str,
    name: &'a str,
}

async fn index(State(state): State<HttpState>) -> Response {
    Json(NodeStatus {
        message: "SOS.INFO.VN - Community Node",
        status: "running",
        name: &state.node_name,
    })
    .into_response()
}

async fn list_requests(
    State(state): State<HttpState>,
    params: Result<Query<ListingParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    serve_listing(&state, Listing::Requests, params?.0).await
}

async fn list_news(
    State(state): State<HttpState>,
    params: Result<Query<ListingParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    serve_listing(&state, Listing::News, params?.0).await
}

async fn list_phones(
    State(state): State<HttpState>,
    params: Result<Query<ListingParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    serve_listing(&state, Listing::Phones, params?.0).await
}

async fn list_rescue_points(
    State(state): State<HttpState>,
    params: Result<Query<ListingParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    serve_listing(&state, Listing::RescuePoints, params?.0).await
}

async fn read_only(method: Method) -> ApiError {
    GatewayError::UnsupportedMethod(method).into()
}

async fn serve_listing(
    state: &HttpState,
    listing: Listing,
    params: ListingParams,
) -> Result<Response, ApiError> {
    let request = listing.request(params)?;
    let response = state.proxy.serve(request).await?;
    Ok(proxied(response))
}

fn proxied(response: ProxyResponse) -> Response {
    let content_type = HeaderValue::from_str(&response.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/json"));
    (
        [
            (CONTENT_TYPE, content_type),
            (
                CACHE_STATUS_HEADER,
                HeaderValue::from_static(response.source.as_str()),
            ),
        ],
        response.body,
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct RegistryList {
    proxies: Vec<Value>,
}

/// Nodes known to the registry, as mirrored into the shared store.
async fn registry_list(State(state): State<HttpState>) -> Json<RegistryList> {
    let values = match state.store.hash_values(REGISTRY_HASH).await {
        Ok(values) => values,
        Err(err) => {
            warn!(
                target = "community_node::http::registry",
                error = %err,
                "failed to read registry hash"
            );
            Vec::new()
        }
    };

    let proxies = values
        .iter()
        .filter_map(|value| serde_json::from_str::<Value>(value).ok())
        .collect();

    Json(RegistryList { proxies })
}

async fn speedtest(State(state): State<HttpState>) -> Json<SpeedReport> {
    Json(state.speedtest.run().await)
}
