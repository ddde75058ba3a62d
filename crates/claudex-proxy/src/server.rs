//! Actix Web HTTP server.
//!
//! One catch-all handler serves every host the client was redirected from:
//! - `POST /v1/messages` (+ `/count_tokens`): translated and relayed upstream
//! - auth and account calls: canned answers from [`crate::mock`]
//! - `GET /health`
//! - anything else: `{"status":"ok"}`

use crate::{
    config::ProxyConfig,
    error::{ProxyError, ServeError},
    mock,
    relay::Relay,
    router::{Classification, Router},
    translation::{estimate_tokens, to_chat_request, RequestOptions},
    types::{MessagesRequest, TokenCountRequest, TokenCountResponse},
};
use actix_cors::Cors;
use actix_web::{http::header, web, App, HttpRequest, HttpResponse, HttpServer, ResponseError};
use anyhow::{Context, Result};
use claudex_auth::CredentialManager;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Largest inbound body accepted; long agent conversations run to megabytes.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

pub struct AppState {
    pub config: ProxyConfig,
    pub router: Router,
    pub credentials: Arc<CredentialManager>,
    pub relay: Relay,
}

impl AppState {
    pub fn new(config: ProxyConfig, credentials: Arc<CredentialManager>, relay: Relay) -> Self {
        Self {
            config,
            router: Router::default(),
            credentials,
            relay,
        }
    }
}

pub async fn serve(config: ProxyConfig) -> Result<()> {
    let credentials = Arc::new(
        CredentialManager::new(config.auth.clone())
            .context("failed to initialise credential manager")?,
    );
    if credentials.get_valid_access_token().await.is_none() {
        return Err(ServeError::NotAuthenticated.into());
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
        .build()
        .context("failed to build reqwest client")?;
    let relay = Relay::new(client, config.upstream_url.clone());

    let addr = config.bind_addr();
    let upstream_url = config.upstream_url.clone();
    let state = web::Data::new(AppState::new(config, credentials, relay));

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(MAX_BODY_BYTES))
            .wrap(Cors::permissive())
            .default_service(web::to(dispatch))
    })
    .bind(&addr)
    .map_err(|source| ServeError::Bind {
        addr: addr.clone(),
        source,
    })?;

    info!(addr = %addr, upstream = %upstream_url, "claudex listening");
    server.run().await.context("server error")?;

    Ok(())
}

/// Catch-all handler: classify, then answer.
pub async fn dispatch(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let host = req.connection_info().host().to_string();
    let classification = state.router.classify(req.method(), &host, req.path());
    debug!(method = %req.method(), %host, path = %req.path(), ?classification, "routing decision");

    match classification {
        Classification::ChatCompletion => handle_chat(&state, &req, &body)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, kind = e.error_type(), "chat request rejected");
                e.error_response()
            }),
        Classification::AuthMock => mock::respond(&req, &state.config.key_prefix),
        Classification::HealthCheck => HttpResponse::Ok().body("OK"),
        Classification::Passthrough => HttpResponse::Ok().json(json!({"status": "ok"})),
    }
}

async fn handle_chat(
    state: &AppState,
    req: &HttpRequest,
    body: &[u8],
) -> Result<HttpResponse, ProxyError> {
    check_inbound_key(req, &state.config.key_prefix)?;

    if req.path().ends_with("/count_tokens") {
        return count_tokens(state, body);
    }

    let request: MessagesRequest = serde_json::from_slice(body)
        .map_err(|e| ProxyError::InvalidRequest(format!("invalid request body: {}", e)))?;

    let token = state.credentials.get_valid_access_token().await.ok_or_else(|| {
        ProxyError::Authentication(
            "no valid upstream credential; run `claudex login`".to_string(),
        )
    })?;

    let chat = to_chat_request(&request, request_options(&state.config));
    info!(
        source_model = %request.model,
        target_model = %chat.model,
        stream = chat.stream,
        "relaying chat request"
    );

    let upstream = state.relay.send(&token, &chat).await?;

    if chat.stream {
        return Ok(HttpResponse::Ok()
            .content_type("text/event-stream")
            .insert_header((header::CACHE_CONTROL, "no-cache"))
            .streaming(state.relay.stream(upstream, request.model)));
    }

    let response = state.relay.complete(upstream, &request.model).await?;
    Ok(HttpResponse::Ok().json(response))
}

fn count_tokens(state: &AppState, body: &[u8]) -> Result<HttpResponse, ProxyError> {
    let req: TokenCountRequest = serde_json::from_slice(body)
        .map_err(|e| ProxyError::InvalidRequest(format!("invalid request body: {}", e)))?;

    let as_messages = MessagesRequest {
        model: req.model,
        messages: req.messages,
        system: req.system,
        max_tokens: None,
        stream: None,
        temperature: None,
        top_p: None,
        top_k: None,
        stop_sequences: None,
        tools: req.tools,
        metadata: None,
    };
    let chat = to_chat_request(&as_messages, request_options(&state.config));

    Ok(HttpResponse::Ok().json(TokenCountResponse {
        input_tokens: estimate_tokens(&chat),
    }))
}

fn request_options(config: &ProxyConfig) -> RequestOptions<'_> {
    RequestOptions {
        models: &config.models,
        instructions: config.instructions.as_deref(),
    }
}

/// The inbound key comes from `x-api-key` or `Authorization: Bearer`.
fn inbound_key(req: &HttpRequest) -> Option<&str> {
    let headers = req.headers();
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
        .map(str::trim)
}

fn check_inbound_key(req: &HttpRequest, prefix: &str) -> Result<(), ProxyError> {
    match inbound_key(req) {
        Some(key) if key.starts_with(prefix) => Ok(()),
        Some(_) => Err(ProxyError::Authentication("invalid x-api-key".to_string())),
        None => Err(ProxyError::Authentication(
            "missing x-api-key or Authorization header".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn key_from_either_header() {
        let req = TestRequest::default()
            .insert_header(("x-api-key", "sk-ant-abc"))
            .to_http_request();
        assert_eq!(inbound_key(&req), Some("sk-ant-abc"));

        let req = TestRequest::default()
            .insert_header(("authorization", "Bearer sk-ant-def"))
            .to_http_request();
        assert_eq!(inbound_key(&req), Some("sk-ant-def"));

        let req = TestRequest::default()
            .insert_header(("authorization", "Basic Zm9vOmJhcg=="))
            .to_http_request();
        assert_eq!(inbound_key(&req), None);
    }

    #[test]
    fn prefix_is_literal() {
        let ok = TestRequest::default()
            .insert_header(("x-api-key", "sk-ant-anything"))
            .to_http_request();
        assert!(check_inbound_key(&ok, "sk-ant-").is_ok());

        let wrong = TestRequest::default()
            .insert_header(("x-api-key", "sk-proj-123"))
            .to_http_request();
        assert!(matches!(
            check_inbound_key(&wrong, "sk-ant-"),
            Err(ProxyError::Authentication(_))
        ));

        let missing = TestRequest::default().to_http_request();
        assert!(check_inbound_key(&missing, "sk-ant-").is_err());
    }
}
