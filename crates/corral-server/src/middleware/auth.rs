use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::audit;

/// Raw bearer credential taken from the `Authorization` header.
///
/// Only the shape is checked here; the policy engine verifies the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken(pub String);

/// Connectivity checks are called by other services without a user token.
fn skip_auth(path: &str) -> bool {
    matches!(path, "/healthz" | "/metrics")
        || path.starts_with("/v1/channels/")
        || path.starts_with("/v1/things/")
}

pub fn bearer_token(header: Option<&str>) -> Result<&str, &'static str> {
    let header = header.ok_or("missing authorization header")?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or("invalid authorization format")?
        .trim();
    if token.is_empty() {
        return Err("empty bearer token");
    }
    Ok(token)
}

pub async fn rest_auth_middleware(mut request: Request<Body>, next: Next) -> Response {
    if skip_auth(request.uri().path()) {
        return next.run(request).await;
    }

    let header = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());

    match bearer_token(header) {
        Ok(token) => {
            let token = BearerToken(token.to_string());
            request.extensions_mut().insert(token);
            next.run(request).await
        }
        Err(reason) => {
            audit::audit_auth_failure(reason);
            error_json(StatusCode::UNAUTHORIZED, reason)
        }
    }
}

fn error_json(status: StatusCode, msg: &str) -> Response {
    let body = serde_json::json!({"error": msg});
    (status, axum::Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::middleware;
    use axum::routing::{get, post};
    use axum_test::TestServer;
    use serde_json::json;

    fn make_server() -> TestServer {
        let app = Router::new()
            .route(
                "/test",
                get(
                    |axum::Extension(token): axum::Extension<BearerToken>| async move {
                        axum::Json(json!({"token": token.0}))
                    },
                ),
            )
            .route(
                "/healthz",
                get(|| async { axum::Json(json!({"status": "ok"})) }),
            )
            .route(
                "/v1/things/identify",
                post(|| async { axum::Json(json!({"id": "t1"})) }),
            )
            .layer(middleware::from_fn(rest_auth_middleware));
        TestServer::new(app).unwrap()
    }

    #[test]
    fn bearer_token_requires_scheme() {
        assert_eq!(bearer_token(Some("Bearer abc")), Ok("abc"));
        assert_eq!(
            bearer_token(Some("Basic abc")),
            Err("invalid authorization format")
        );
        assert_eq!(bearer_token(Some("Bearer   ")), Err("empty bearer token"));
        assert_eq!(bearer_token(None), Err("missing authorization header"));
    }

    #[tokio::test]
    async fn token_is_injected_as_extension() {
        let server = make_server();
        let response = server
            .get("/test")
            .add_header(
                axum::http::header::AUTHORIZATION,
                axum::http::HeaderValue::from_static("Bearer abc.def.ghi"),
            )
            .await;

        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["token"], "abc.def.ghi");
    }

    #[tokio::test]
    async fn missing_auth_header_returns_401() {
        let server = make_server();
        let response = server.get("/test").await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = response.json();
        assert!(
            body["error"]
                .as_str()
                .unwrap()
                .contains("missing authorization")
        );
    }

    #[tokio::test]
    async fn healthz_skips_auth() {
        let server = make_server();
        server.get("/healthz").await.assert_status_ok();
    }

    #[tokio::test]
    async fn thing_routes_skip_auth() {
        let server = make_server();
        server.post("/v1/things/identify").await.assert_status_ok();
    }
}
