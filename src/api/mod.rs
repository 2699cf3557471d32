// src/api/mod.rs

//! The rule-list HTTP API (spec §6): ping, list, and per-prefix
//! get/put/delete on `/v1/rules`.

use crate::core::dto::{Rule, RuleJson};
use crate::core::errors::AppError;
use crate::core::rulelist::RuleList;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router as AxumRouter;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

#[derive(Clone)]
struct ApiState {
    rulelist: Arc<RuleList>,
}

#[derive(Serialize)]
struct ErrorJson {
    err: String,
}

fn err_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorJson { err: message.into() })).into_response()
}

fn decode_prefix(encoded: &str) -> Result<crate::core::prefix::Prefix, Response> {
    let raw = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| err_response(StatusCode::BAD_REQUEST, format!("invalid base64url prefix: {e}")))?;
    let text = String::from_utf8(raw)
        .map_err(|e| err_response(StatusCode::BAD_REQUEST, format!("prefix is not valid utf-8: {e}")))?;
    text.parse()
        .map_err(|e| err_response(StatusCode::BAD_REQUEST, format!("invalid prefix '{text}': {e}")))
}

async fn ping() -> impl IntoResponse {
    #[derive(Serialize)]
    struct Pong {
        msg: &'static str,
    }
    Json(Pong { msg: "pong" })
}

async fn list_rules(State(state): State<ApiState>) -> Response {
    match state.rulelist.list_rules() {
        Ok(rules) => {
            let json: Vec<RuleJson> = rules.iter().map(RuleJson::from).collect();
            Json(json).into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to list rules");
            err_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn get_rule(State(state): State<ApiState>, Path(encoded): Path<String>) -> Response {
    let prefix = match decode_prefix(&encoded) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state.rulelist.get_rule(prefix) {
        Ok(Some(rule)) => Json(RuleJson::from(&rule)).into_response(),
        Ok(None) => err_response(StatusCode::NOT_FOUND, "rule not found"),
        Err(e) => {
            error!(error = %e, "failed to get rule");
            err_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn put_rule(State(state): State<ApiState>, Path(encoded): Path<String>, body: axum::body::Bytes) -> Response {
    let prefix = match decode_prefix(&encoded) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let json: RuleJson = match serde_json::from_slice(&body) {
        Ok(j) => j,
        Err(e) => return err_response(StatusCode::BAD_REQUEST, format!("invalid rule body: {e}")),
    };
    let rule: Rule = match json.try_into() {
        Ok(r) => r,
        Err(e) => return err_response(StatusCode::BAD_REQUEST, format!("invalid rule: {e}")),
    };
    if rule.prefix.masked() != prefix.masked() {
        return err_response(
            StatusCode::BAD_REQUEST,
            "path prefix does not match rule body prefix",
        );
    }
    match state.rulelist.put_rule(&rule) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!(error = %e, "failed to put rule");
            err_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn delete_rule(State(state): State<ApiState>, Path(encoded): Path<String>) -> Response {
    let prefix = match decode_prefix(&encoded) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state.rulelist.del_rule(prefix) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!(error = %e, "failed to delete rule");
            err_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn build_router(rulelist: Arc<RuleList>) -> AxumRouter {
    AxumRouter::new()
        .route("/v1/ping", get(ping))
        .route("/v1/rules", get(list_rules))
        .route("/v1/rules/{prefix}", get(get_rule).put(put_rule).delete(delete_rule))
        .with_state(ApiState { rulelist })
}

/// Binds and serves the HTTP API until `shutdown_rx` fires.
pub async fn run(listen_addr: &str, rulelist: Arc<RuleList>, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), AppError> {
    let app = build_router(rulelist);
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|e| AppError::SourceAdapterFailed(format!("failed to bind API listener on {listen_addr}: {e}")))?;
    info!(addr = %listen_addr, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("HTTP API shutting down");
        })
        .await
        .map_err(|e| AppError::SourceAdapterFailed(format!("API server failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    fn test_rulelist() -> Arc<RuleList> {
        let db = sled::Config::new().temporary(true).open().unwrap();
        Arc::new(RuleList::new(db))
    }

    #[tokio::test]
    async fn ping_returns_pong() {
        let app = build_router(test_rulelist());
        let resp = app
            .oneshot(HttpRequest::get("/v1/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn put_then_get_then_delete_round_trips() {
        let rulelist = test_rulelist();
        let app = build_router(rulelist);
        let encoded = URL_SAFE_NO_PAD.encode("10.0.0.0/24");
        let body = r#"{"prefix":"10.0.0.0/24","banned":true,"rate_limit":"0B","blame":"manual","expires_at":"2030-01-01T00:00:00Z"}"#;

        let put_resp = app
            .clone()
            .oneshot(
                HttpRequest::put(format!("/v1/rules/{encoded}"))
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(put_resp.status(), StatusCode::NO_CONTENT);

        let get_resp = app
            .clone()
            .oneshot(HttpRequest::get(format!("/v1/rules/{encoded}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(get_resp.status(), StatusCode::OK);

        let del_resp = app
            .clone()
            .oneshot(
                HttpRequest::delete(format!("/v1/rules/{encoded}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(del_resp.status(), StatusCode::NO_CONTENT);

        let missing_resp = app
            .oneshot(HttpRequest::get(format!("/v1/rules/{encoded}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing_resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_base64_prefix_is_400() {
        let app = build_router(test_rulelist());
        let resp = app
            .oneshot(HttpRequest::get("/v1/rules/not-base64!!").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
