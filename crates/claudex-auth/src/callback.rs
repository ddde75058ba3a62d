//! Local listener for the OAuth redirect.
//!
//! Binds `127.0.0.1:<port>`, accepts the first request on the callback path,
//! and hands its query parameters to whoever is waiting. Must be started from
//! inside an actix runtime (`#[actix_web::main]` / `#[actix_web::test]`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_web::{dev::ServerHandle, web, App, HttpResponse, HttpServer};
use tokio::sync::oneshot;

use crate::{AuthError, Result};

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

type PendingCallback = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

pub struct CallbackListener {
    port: u16,
    handle: ServerHandle,
    receiver: Option<oneshot::Receiver<CallbackParams>>,
}

impl CallbackListener {
    pub fn bind(port: u16, path: &str) -> Result<Self> {
        let (tx, rx) = oneshot::channel();
        let pending: PendingCallback = Arc::new(Mutex::new(Some(tx)));
        let route = path.to_string();

        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(pending.clone()))
                .route(&route, web::get().to(handle_callback))
        })
        .workers(1)
        .disable_signals()
        .shutdown_timeout(1)
        .bind(("127.0.0.1", port))
        .map_err(|e| AuthError::Listener(format!("failed to bind 127.0.0.1:{}: {}", port, e)))?;

        let bound_port = server.addrs().first().map(|a| a.port()).unwrap_or(port);
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        tracing::debug!(port = bound_port, "OAuth callback listener started");

        Ok(Self {
            port: bound_port,
            handle,
            receiver: Some(rx),
        })
    }

    /// Port actually bound (differs from the requested one when that was `0`).
    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn wait(&mut self, timeout: Duration) -> Result<CallbackParams> {
        let rx = self.receiver.take().ok_or(AuthError::CallbackCancelled)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(params)) => Ok(params),
            Ok(Err(_)) => Err(AuthError::CallbackCancelled),
            Err(_) => Err(AuthError::CallbackTimeout(timeout.as_secs())),
        }
    }

    pub async fn shutdown(self) {
        self.handle.stop(true).await;
        tracing::debug!(port = self.port, "OAuth callback listener stopped");
    }
}

async fn handle_callback(
    query: web::Query<HashMap<String, String>>,
    data: web::Data<PendingCallback>,
) -> HttpResponse {
    let mut query = query.into_inner();
    let params = CallbackParams {
        code: query.remove("code"),
        state: query.remove("state"),
        error: query.remove("error"),
        error_description: query.remove("error_description"),
    };
    let failed = params.error.is_some() || params.code.is_none();

    let sender = data.lock().ok().and_then(|mut slot| slot.take());
    if let Some(tx) = sender {
        let _ = tx.send(params);
    }

    let page = if failed { FAILURE_HTML } else { SUCCESS_HTML };
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(page)
}

const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Claudex - Signed in</title></head>
<body style="font-family: sans-serif; text-align: center; padding: 50px;">
    <h1>Signed in</h1>
    <p>You can close this window and return to the terminal.</p>
</body>
</html>"#;

const FAILURE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Claudex - Sign-in failed</title></head>
<body style="font-family: sans-serif; text-align: center; padding: 50px;">
    <h1>Sign-in failed</h1>
    <p>Return to the terminal for details.</p>
</body>
</html>"#;
