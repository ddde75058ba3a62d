//! Canned responses for intercepted account and auth traffic.
//!
//! The client believes it is talking to the source vendor, so its login,
//! profile and key-validation calls land here. Every answer describes an
//! authenticated session; nothing is checked.

use actix_web::{http::header, HttpRequest, HttpResponse};
use serde_json::{json, Value};
use url::form_urlencoded;

pub const MOCK_AUTH_CODE: &str = "claudex-mock-code";
const DEFAULT_REDIRECT_URI: &str = "http://localhost:54545/callback";
const ACCOUNT_UUID: &str = "00000000-0000-4000-8000-000000000001";
const ORGANIZATION_UUID: &str = "00000000-0000-4000-8000-000000000002";
const EMAIL: &str = "user@claudex.local";

pub fn respond(req: &HttpRequest, key_prefix: &str) -> HttpResponse {
    let path = req.path();

    if path.ends_with("/oauth/authorize") {
        return authorize_redirect(req.query_string());
    }

    let body = if path.ends_with("/oauth/token") {
        json!({
            "access_token": format!("{key_prefix}claudex-access"),
            "refresh_token": "claudex-refresh",
            "expires_in": 31_536_000,
            "token_type": "Bearer",
            "scope": "user:inference user:profile",
            "account": account(),
            "organization": organization(),
        })
    } else {
        match path {
            "/api/oauth/profile" => json!({
                "account": account(),
                "organization": organization(),
            }),
            "/api/auth/session" => json!({
                "authenticated": true,
                "user": account(),
            }),
            "/api/oauth/claude_cli/create_api_key" => json!({
                "raw_key": format!("{key_prefix}claudex-key"),
            }),
            "/api/oauth/claude_cli/roles" => json!({
                "organization_role": "admin",
                "workspace_role": null,
            }),
            "/v1/api_key/validate" | "/api/account/validate_key" => json!({"valid": true}),
            _ => json!({"status": "ok", "authenticated": true}),
        }
    };

    HttpResponse::Ok().json(body)
}

fn account() -> Value {
    json!({
        "uuid": ACCOUNT_UUID,
        "email": EMAIL,
        "email_address": EMAIL,
        "display_name": "Claudex User",
    })
}

fn organization() -> Value {
    json!({
        "uuid": ORGANIZATION_UUID,
        "name": "Claudex",
    })
}

fn authorize_redirect(query: &str) -> HttpResponse {
    let mut redirect_uri = None;
    let mut state = None;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "redirect_uri" => redirect_uri = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }

    let redirect_uri = redirect_uri.unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
    let mut params = form_urlencoded::Serializer::new(String::new());
    params.append_pair("code", MOCK_AUTH_CODE);
    if let Some(state) = &state {
        params.append_pair("state", state);
    }
    let separator = if redirect_uri.contains('?') { '&' } else { '?' };
    let location = format!("{redirect_uri}{separator}{}", params.finish());

    HttpResponse::Found()
        .insert_header((header::LOCATION, location))
        .finish()
}
