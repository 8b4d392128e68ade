mod handlers;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::middleware;
use axum::response::Response;
use axum::routing::{get, post};

const MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024; // 1 MB

use crate::metrics::Metrics;
use crate::middleware::rest_auth_middleware;
use crate::service::PolicyService;

pub use types::ErrorResponse;

pub struct AppState<P: PolicyService> {
    pub service: Arc<P>,
    pub metrics: Arc<Metrics>,
}

impl<P: PolicyService> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

async fn metrics_middleware<P: PolicyService>(
    State(state): State<AppState<P>>,
    request: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> Response {
    state.metrics.record_request();

    let response = next.run(request).await;

    if response.status().is_success() {
        state.metrics.record_success();
    } else {
        state.metrics.record_error();
    }

    response
}

pub fn create_router<P: PolicyService>(state: AppState<P>) -> Router {
    Router::new()
        .route("/v1/tokens/refresh", post(handlers::refresh_token::<P>))
        .route("/v1/identify", get(handlers::identify::<P>))
        .route("/v1/authorize", post(handlers::authorize::<P>))
        .route(
            "/v1/policies",
            post(handlers::add_policy::<P>)
                .put(handlers::update_policy::<P>)
                .delete(handlers::delete_policy::<P>)
                .get(handlers::list_policies::<P>),
        )
        .route(
            "/v1/channels/{id}/access/key",
            post(handlers::access_by_key::<P>),
        )
        .route(
            "/v1/channels/{id}/access/id",
            post(handlers::access_by_id::<P>),
        )
        .route("/v1/things/identify", post(handlers::identify_thing::<P>))
        .route(
            "/v1/groups",
            post(handlers::create_group::<P>).get(handlers::list_groups::<P>),
        )
        .route("/v1/groups/{id}/enable", post(handlers::enable_group::<P>))
        .route("/v1/groups/{id}/disable", post(handlers::disable_group::<P>))
        .route("/v1/clients", post(handlers::register_client::<P>))
        .route("/v1/clients/{id}/enable", post(handlers::enable_client::<P>))
        .route(
            "/v1/clients/{id}/disable",
            post(handlers::disable_client::<P>),
        )
        .route(
            "/v1/clients/{id}/memberships",
            get(handlers::list_memberships::<P>),
        )
        .route("/healthz", get(handlers::healthz))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_SIZE))
        .layer(middleware::from_fn(rest_auth_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware::<P>,
        ))
        .with_state(state)
}
