use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use parley_api::auth::{self, AppState};
use parley_api::error::ApiError;
use parley_api::middleware::require_auth;
use parley_api::{conversations, messages};
use parley_gateway::connection;

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/messages", post(messages::create_message))
        .route("/messages/bulk-delete", post(messages::bulk_delete_messages))
        .route("/messages/mark-read", post(messages::mark_read))
        .route("/messages/mark-unread", post(messages::mark_unread))
        .route("/messages/{message_id}/toggle", post(messages::toggle_message))
        .route("/messages/{message_id}/delete", post(messages::delete_message))
        .route("/conversations/{peer_id}/messages", get(conversations::get_conversation))
        .route("/conversations/{peer_id}/pins", get(conversations::get_pins))
        .route("/assistant/messages", get(conversations::get_assistant_thread))
        .route("/starred", get(conversations::get_starred))
        .route(
            "/admin/conversations/{a}/{b}/messages",
            get(conversations::get_moderation_view),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .route("/gateway", get(ws_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// With `?token=` the credential is checked before the upgrade and a bad one
/// is refused with 401. Without it the client must `identify` after connecting.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let principal = match query.token {
        Some(token) => match state.credentials.authenticate(&state.db, &token).await {
            Ok(principal) => Some(principal),
            Err(e) => {
                warn!("gateway upgrade refused: {}", e);
                return ApiError(e).into_response();
            }
        },
        None => None,
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();
    match principal {
        Some(principal) => ws.on_upgrade(move |socket| {
            connection::handle_connection_authenticated(socket, dispatcher, db, principal)
        }),
        None => {
            let credentials = state.credentials.clone();
            ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, db, credentials))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use chrono::Duration;
    use parley_api::auth::AppStateInner;
    use parley_core::credentials::Credentials;
    use parley_db::Database;
    use parley_gateway::Dispatcher;
    use tower::ServiceExt;

    fn app() -> Router {
        let db = Arc::new(Database::open_in_memory().unwrap());
        build_router(AppStateInner::new(
            db,
            Dispatcher::new(),
            Credentials::new("router-secret", Duration::hours(1)),
        ))
    }

    fn json_post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn protected_routes_need_a_current_credential() {
        let app = app();

        let response = app
            .clone()
            .oneshot(Request::get("/starred").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_json(response).await["error"].is_string());

        let response = app
            .clone()
            .oneshot(json_post(
                "/auth/register",
                r#"{"username":"alice","password":"correct horse"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let first = body_json(response).await["token"].as_str().unwrap().to_string();

        let authed = |token: &str| {
            Request::get("/starred")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap()
        };
        let response = app.clone().oneshot(authed(&first)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // A second login retires the first credential on REST too.
        let response = app
            .clone()
            .oneshot(json_post(
                "/auth/login",
                r#"{"username":"alice","password":"correct horse"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(authed(&first)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    fn gateway_request(token: &str) -> Request<Body> {
        Request::get(format!("/gateway?token={}", token))
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn gateway_refuses_superseded_and_garbage_credentials() {
        let app = app();
        let creds = r#"{"username":"alice","password":"correct horse"}"#;

        let response = app.clone().oneshot(json_post("/auth/register", creds)).await.unwrap();
        let first = body_json(response).await["token"].as_str().unwrap().to_string();
        let response = app.clone().oneshot(json_post("/auth/login", creds)).await.unwrap();
        let second = body_json(response).await["token"].as_str().unwrap().to_string();

        let response = app.clone().oneshot(gateway_request(&first)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_json(response).await["error"].is_string());

        let response = app.clone().oneshot(gateway_request("not.a.jwt")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // The current credential passes; the in-memory request has no
        // connection to upgrade, so the upgrade itself is what fails.
        let response = app.oneshot(gateway_request(&second)).await.unwrap();
        assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn create_message_over_http() {
        let app = app();
        let mut tokens = Vec::new();
        for name in ["alice", "bob"] {
            let body = format!(r#"{{"username":"{}","password":"correct horse"}}"#, name);
            let response = app.clone().oneshot(json_post("/auth/register", &body)).await.unwrap();
            tokens.push(body_json(response).await);
        }
        let alice_id = tokens[0]["userId"].as_str().unwrap().to_string();
        let bob_id = tokens[1]["userId"].as_str().unwrap().to_string();

        let body = format!(
            r#"{{"senderId":"{}","receiverId":"{}","content":"hi bob"}}"#,
            alice_id, bob_id
        );
        let mut request = json_post("/messages", &body);
        request.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {}", tokens[0]["token"].as_str().unwrap())
                .parse()
                .unwrap(),
        );
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["status"], "success");
        assert_eq!(json["message"]["content"], "hi bob");
        assert_eq!(json["message"]["isStarred"], false);

        // Bob's token cannot claim to be Alice.
        let mut request = json_post("/messages", &body);
        request.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {}", tokens[1]["token"].as_str().unwrap())
                .parse()
                .unwrap(),
        );
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
