use crate::AppState;
use crate::error::err_response;
use crate::signer::SignatureError;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use serde::Deserialize;
use tracing::{error, warn};

pub async fn log_request_errors(req: Request, next: Next) -> Response {
    // Path only: query strings carry tokens
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    let response = next.run(req).await;
    let status = response.status();
    if status.is_client_error() {
        // 4xx error
        warn!(
            method = %method,
            path = %path,
            status = %status,
            "Client error"
        );
    } else if status.is_server_error() {
        // 5xx error
        error!(
            method = %method,
            path = %path,
            status = %status,
            "Server error"
        );
    }

    response
}

/// Query parameters of a signed audio URL
#[derive(Debug, Clone, Deserialize)]
pub struct SignedQuery {
    pub token: Option<String>,
    pub expires: Option<String>,
}

/// Verified expiry of the current request's signed URL
#[derive(Debug, Clone, Copy)]
pub struct VerifiedUrl {
    pub expires_unix: i64,
}

/// Middleware rejecting audio requests whose token does not verify
pub async fn signed_url_middleware(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    query: Result<Query<SignedQuery>, QueryRejection>,
    mut req: Request,
    next: Next,
) -> Response {
    if state.issuer.library().parse_filename(&filename).is_err() {
        warn!(%filename, "Invalid audio filename");
        return err_response(StatusCode::BAD_REQUEST, "Invalid filename");
    }

    let Ok(Query(SignedQuery {
        token: Some(token),
        expires: Some(expires),
    })) = query
    else {
        return err_response(StatusCode::BAD_REQUEST, "token and expires are required");
    };

    // Canonical decimal only
    let Some(expires_unix) = expires
        .parse::<i64>()
        .ok()
        .filter(|unix| unix.to_string() == expires)
    else {
        return err_response(StatusCode::BAD_REQUEST, "Invalid expires");
    };

    if let Err(err) = state
        .issuer
        .check_signed_url(&filename, &token, expires_unix)
    {
        warn!(%filename, expires_unix, error = %err, "Rejected signed URL");
        let message = match err {
            SignatureError::Malformed => "Invalid token format",
            _ => "Invalid or expired token",
        };
        return err_response(err.to_err_code(), message);
    }

    req.extensions_mut().insert(VerifiedUrl { expires_unix });
    next.run(req).await
}
