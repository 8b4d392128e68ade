use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Serialize;

use corral_core::entity::GroupQuery;
use corral_core::policy::{PolicyKey, PolicyQuery};

use crate::error::ApiError;
use crate::middleware::BearerToken;
use crate::service::PolicyService;

use super::AppState;
use super::types::*;

fn api_error_to_response(err: ApiError) -> Response {
    let status = match &err {
        ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
        ApiError::Authorization | ApiError::HigherPolicyRank => StatusCode::FORBIDDEN,
        ApiError::NotFound => StatusCode::NOT_FOUND,
        ApiError::Malformed(_) | ApiError::InvalidEntityType(_) => StatusCode::BAD_REQUEST,
        ApiError::Conflict(_) | ApiError::StatusAlreadyAssigned => StatusCode::CONFLICT,
        ApiError::Storage(_) | ApiError::Cache(_) => {
            tracing::error!(error = %err, "request failed on an internal error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, ApiError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

pub async fn refresh_token<P: PolicyService>(
    State(state): State<AppState<P>>,
    Extension(token): Extension<BearerToken>,
) -> Response {
    respond(StatusCode::CREATED, state.service.refresh(&token.0).await)
}

pub async fn identify<P: PolicyService>(
    State(state): State<AppState<P>>,
    Extension(token): Extension<BearerToken>,
) -> Response {
    let result = state
        .service
        .identify(&token.0)
        .await
        .map(|id| IdentifyResponse { id });
    respond(StatusCode::OK, result)
}

pub async fn authorize<P: PolicyService>(
    State(state): State<AppState<P>>,
    Extension(token): Extension<BearerToken>,
    Json(req): Json<AuthorizeRequest>,
) -> Response {
    let result = state
        .service
        .authorize(&token.0, &req.entity_type, &req.access_request())
        .await
        .map(|()| AuthorizeResponse { authorized: true });
    respond(StatusCode::OK, result)
}

pub async fn add_policy<P: PolicyService>(
    State(state): State<AppState<P>>,
    Extension(token): Extension<BearerToken>,
    Json(req): Json<PolicyRequest>,
) -> Response {
    respond(
        StatusCode::CREATED,
        state.service.add_policy(&token.0, req.into()).await,
    )
}

pub async fn update_policy<P: PolicyService>(
    State(state): State<AppState<P>>,
    Extension(token): Extension<BearerToken>,
    Json(req): Json<PolicyRequest>,
) -> Response {
    respond(
        StatusCode::OK,
        state.service.update_policy(&token.0, req.into()).await,
    )
}

pub async fn delete_policy<P: PolicyService>(
    State(state): State<AppState<P>>,
    Extension(token): Extension<BearerToken>,
    Json(req): Json<PolicyKeyRequest>,
) -> Response {
    let key = PolicyKey::from(req);
    match state.service.delete_policy(&token.0, &key).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => api_error_to_response(e),
    }
}

pub async fn list_policies<P: PolicyService>(
    State(state): State<AppState<P>>,
    Extension(token): Extension<BearerToken>,
    Query(query): Query<PolicyQuery>,
) -> Response {
    respond(
        StatusCode::OK,
        state.service.list_policies(&token.0, &query).await,
    )
}

pub async fn access_by_key<P: PolicyService>(
    State(state): State<AppState<P>>,
    Path(channel_id): Path<String>,
    Json(req): Json<ThingKeyRequest>,
) -> Response {
    let result = state
        .service
        .can_access_by_key(&channel_id, &req.key)
        .await
        .map(|thing_id| ThingResponse { thing_id });
    respond(StatusCode::OK, result)
}

pub async fn access_by_id<P: PolicyService>(
    State(state): State<AppState<P>>,
    Path(channel_id): Path<String>,
    Json(req): Json<ThingIdRequest>,
) -> Response {
    let result = state
        .service
        .can_access_by_id(&channel_id, &req.thing_id)
        .await
        .map(|()| ThingResponse {
            thing_id: req.thing_id.clone(),
        });
    respond(StatusCode::OK, result)
}

pub async fn identify_thing<P: PolicyService>(
    State(state): State<AppState<P>>,
    Json(req): Json<ThingKeyRequest>,
) -> Response {
    let result = state
        .service
        .identify_thing(&req.key)
        .await
        .map(|thing_id| ThingResponse { thing_id });
    respond(StatusCode::OK, result)
}

pub async fn create_group<P: PolicyService>(
    State(state): State<AppState<P>>,
    Extension(token): Extension<BearerToken>,
    Json(req): Json<CreateGroupRequest>,
) -> Response {
    respond(
        StatusCode::CREATED,
        state.service.create_group(&token.0, req.into()).await,
    )
}

pub async fn list_groups<P: PolicyService>(
    State(state): State<AppState<P>>,
    Extension(token): Extension<BearerToken>,
    Query(query): Query<GroupQuery>,
) -> Response {
    respond(
        StatusCode::OK,
        state.service.list_groups(&token.0, &query).await,
    )
}

pub async fn enable_group<P: PolicyService>(
    State(state): State<AppState<P>>,
    Extension(token): Extension<BearerToken>,
    Path(id): Path<String>,
) -> Response {
    respond(
        StatusCode::OK,
        state.service.enable_group(&token.0, &id).await,
    )
}

pub async fn disable_group<P: PolicyService>(
    State(state): State<AppState<P>>,
    Extension(token): Extension<BearerToken>,
    Path(id): Path<String>,
) -> Response {
    respond(
        StatusCode::OK,
        state.service.disable_group(&token.0, &id).await,
    )
}

pub async fn register_client<P: PolicyService>(
    State(state): State<AppState<P>>,
    Extension(token): Extension<BearerToken>,
    Json(req): Json<RegisterClientRequest>,
) -> Response {
    respond(
        StatusCode::CREATED,
        state.service.register_client(&token.0, req.into()).await,
    )
}

pub async fn enable_client<P: PolicyService>(
    State(state): State<AppState<P>>,
    Extension(token): Extension<BearerToken>,
    Path(id): Path<String>,
) -> Response {
    respond(
        StatusCode::OK,
        state.service.enable_client(&token.0, &id).await,
    )
}

pub async fn disable_client<P: PolicyService>(
    State(state): State<AppState<P>>,
    Extension(token): Extension<BearerToken>,
    Path(id): Path<String>,
) -> Response {
    respond(
        StatusCode::OK,
        state.service.disable_client(&token.0, &id).await,
    )
}

pub async fn list_memberships<P: PolicyService>(
    State(state): State<AppState<P>>,
    Extension(token): Extension<BearerToken>,
    Path(client_id): Path<String>,
    Query(query): Query<GroupQuery>,
) -> Response {
    respond(
        StatusCode::OK,
        state
            .service
            .list_memberships(&token.0, &client_id, &query)
            .await,
    )
}
