//! Citadel log receiver.
//!
//! Mutually-authenticated server that ingests signed log batches from
//! fleet nodes, chains them per client for tamper evidence, and serves
//! integrity reports:
//!
//! - `POST /upload` — raw batch body, detached RSA-PSS signature in the
//!   `X-Log-Signature` header, client identity from the mTLS certificate CN
//! - `GET /integrity?client_id=<id>` — the client's chain summary

mod chain;
mod config;
mod error;
mod keys;
mod tls;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use clap::Parser;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::chain::{ChainStore, IntegrityReport};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::keys::ClientKeys;
use citadel_transparency::TransparencyLog;

/// Client identity extracted from the mTLS peer certificate, injected per
/// connection.
#[derive(Debug, Clone)]
struct ClientIdentity(Option<String>);

/// Per-client async locks serializing upload transactions.
#[derive(Debug, Default)]
struct ClientLocks {
    inner: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ClientLocks {
    fn for_client(&self, client_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .lock()
            .entry(client_id.to_string())
            .or_default()
            .clone()
    }
}

#[derive(Debug)]
struct AppState {
    chains: Arc<ChainStore>,
    keys: ClientKeys,
    transparency: tokio::sync::Mutex<TransparencyLog>,
    locks: ClientLocks,
    max_log_size: u64,
}

/// Request outcomes as observable HTTP responses.
#[derive(Debug)]
enum AppError {
    Unauthenticated,
    BadSignature,
    TamperSuspected(String),
    Malformed(String),
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: &'static str,
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (code, status, message) = match self {
            AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "client certificate required".to_string(),
            ),
            AppError::BadSignature => (
                StatusCode::FORBIDDEN,
                "bad_signature",
                "signature verification failed".to_string(),
            ),
            AppError::TamperSuspected(reason) => {
                (StatusCode::CONFLICT, "tamper_suspected", reason)
            }
            AppError::Malformed(reason) => (StatusCode::BAD_REQUEST, "malformed", reason),
            AppError::Internal(reason) => {
                error!(reason, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "internal server error".to_string(),
                )
            }
        };
        (code, Json(ErrorResponse { status, error: message })).into_response()
    }
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    status: &'static str,
    filename: String,
    log_hash: String,
}

async fn handle_upload(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<ClientIdentity>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>, AppError> {
    let client_id = identity.0.ok_or(AppError::Unauthenticated)?;

    if body.len() as u64 > state.max_log_size {
        return Err(AppError::Malformed(format!(
            "batch of {} bytes exceeds limit {}",
            body.len(),
            state.max_log_size
        )));
    }

    let signature_hex = headers
        .get("x-log-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Malformed("missing log signature".to_string()))?;
    let signature = hex::decode(signature_hex)
        .map_err(|_| AppError::Malformed("invalid signature format".to_string()))?;

    if !state.keys.verify_batch(&client_id, &body, &signature) {
        return Err(AppError::BadSignature);
    }

    // Serialize the transaction per client; other clients proceed.
    let lock = state.locks.for_client(&client_id);
    let _guard = lock.lock().await;

    let chains = state.chains.clone();
    let batch = body.clone();
    let ingest_client = client_id.clone();
    let result = tokio::task::spawn_blocking(move || {
        chains.ingest(&ingest_client, &batch, Utc::now())
    })
    .await
    .map_err(|err| AppError::Internal(err.to_string()))?;

    match result {
        Ok(record) => Ok(Json(UploadResponse {
            status: "accepted",
            filename: record.filename,
            log_hash: record.log_hash,
        })),
        Err(ServerError::TamperSuspected { client_id, reason }) => {
            // A suspected tamper is a security event; record it before
            // answering the client.
            let mut log = state.transparency.lock().await;
            if let Err(err) = log.record_security_event(
                "log_tampering",
                "critical",
                &format!("tamper suspected for {client_id}: {reason}"),
                std::slice::from_ref(&client_id),
            ) {
                error!(%err, "failed to record security event");
            }
            Err(AppError::TamperSuspected(reason))
        }
        Err(err) => Err(AppError::Internal(err.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct IntegrityQuery {
    client_id: Option<String>,
}

async fn handle_integrity(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IntegrityQuery>,
) -> Result<Json<IntegrityReport>, AppError> {
    let client_id = query
        .client_id
        .ok_or_else(|| AppError::Malformed("missing client_id parameter".to_string()))?;
    Ok(Json(state.chains.report(&client_id)))
}

fn build_router(state: Arc<AppState>, max_log_size: u64) -> Router {
    // Leave headroom above the limit so the handler can answer oversized
    // bodies with 400 instead of the framework's 413.
    let body_limit = usize::try_from(max_log_size).unwrap_or(usize::MAX).saturating_add(1024);
    Router::new()
        .route("/upload", post(handle_upload))
        .route("/integrity", get(handle_integrity))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Parser)]
#[command(name = "citadel-log-server", version, about = "Tamper-evident log receiver")]
struct Args {
    /// Path to the server configuration file.
    #[arg(long, default_value = "/etc/citadel/log-server/config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        error!("{err}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), ServerError> {
    let config = ServerConfig::load(&args.config)?;

    let keys = ClientKeys::load(&config.client_keys_dir)?;
    info!(clients = keys.len(), "verification keys loaded");

    let state = Arc::new(AppState {
        chains: Arc::new(ChainStore::open(&config.storage_path)?),
        keys,
        transparency: tokio::sync::Mutex::new(TransparencyLog::open(
            &config.transparency_log_dir,
        )?),
        locks: ClientLocks::default(),
        max_log_size: config.max_log_size,
    });

    let router = build_router(state, config.max_log_size);
    let acceptor = TlsAcceptor::from(tls::build_tls_config(
        &config.cert_file,
        &config.key_file,
        &config.ca_file,
    )?);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(host = %config.host, port = config.port, "secure log server started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let router = router.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(%peer, %err, "tls handshake failed");
                    return;
                }
            };

            let identity = {
                let (_, connection) = tls_stream.get_ref();
                connection
                    .peer_certificates()
                    .and_then(tls::peer_common_name)
            };

            let service = TowerToHyperService::new(router.layer(Extension(ClientIdentity(identity))));
            if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(tls_stream), service)
                .await
            {
                debug!(%peer, %err, "connection closed with error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_status_codes() {
        let cases: Vec<(AppError, StatusCode)> = vec![
            (AppError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (AppError::BadSignature, StatusCode::FORBIDDEN),
            (
                AppError::TamperSuspected("ts regression".to_string()),
                StatusCode::CONFLICT,
            ),
            (
                AppError::Malformed("bad hex".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::Internal("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, want) in cases {
            assert_eq!(err.into_response().status(), want);
        }
    }

    #[test]
    fn test_client_locks_are_shared_per_client() {
        let locks = ClientLocks::default();
        let a1 = locks.for_client("a");
        let a2 = locks.for_client("a");
        let b = locks.for_client("b");
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }
}
