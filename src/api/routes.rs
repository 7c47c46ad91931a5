use crate::api::middleware::VerifiedUrl;
use crate::error::{InvalidRequest, IssueError, err_response};
use crate::session::{ClientInfo, SessionContext};
use crate::AppState;
use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Extension, Path as AxumPath, Query};
use axum::http::{HeaderMap, HeaderValue, Response, StatusCode, header};
use axum::response::{IntoResponse, Json};
use mime_guess::from_path;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioUrlQuery {
    pub track_id: Option<String>,
}

/// `GET /get-audio-url?track_id=<id>`
pub async fn get_audio_url(
    Extension(state): Extension<AppState>,
    session: SessionContext,
    client: ClientInfo,
    query: Result<Query<AudioUrlQuery>, QueryRejection>,
) -> Response<Body> {
    let result = match query {
        Ok(Query(query)) => {
            state
                .issuer
                .issue_signed_url(query.track_id.as_deref(), &session, &client)
                .await
        }
        Err(rejection) => {
            debug!(%rejection, "Unparseable query string");
            Err(IssueError::from(InvalidRequest::MalformedResourceId))
        }
    };

    let mut res = match result {
        Ok(signed) => (StatusCode::OK, Json(signed)).into_response(),
        Err(error) => error.into_response(),
    };

    let headers = res.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if let Some(cookie) = session.set_cookie() {
        headers.append(header::SET_COOKIE, cookie);
    }
    res
}

/// Any method other than GET on the issuance route
pub async fn method_not_allowed() -> Response<Body> {
    let mut res = IssueError::from(InvalidRequest::MethodNotAllowed).into_response();
    res.headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static("GET"));
    res
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// `GET /audio/{filename}?token=..&expires=..`, behind `signed_url_middleware`
pub async fn serve_audio(
    Extension(state): Extension<AppState>,
    Extension(verified): Extension<VerifiedUrl>,
    AxumPath(filename): AxumPath<String>,
    headers: HeaderMap,
) -> Response<Body> {
    let library = state.issuer.library();
    let id = match library.parse_filename(&filename) {
        Ok(id) => id,
        Err(error) => return IssueError::from(error).into_response(),
    };

    let resolved = match library.resolve(&id).await {
        Ok(resolved) => resolved,
        Err(error) => return IssueError::from(error).into_response(),
    };
    let size = resolved.len;

    let Ok(range) = parse_range(&headers, size) else {
        let mut res = err_response(StatusCode::RANGE_NOT_SATISFIABLE, "Range not satisfiable");
        if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
            res.headers_mut().insert(header::CONTENT_RANGE, value);
        }
        return res;
    };
    let (status, start, len) = match range {
        Some((start, end)) => (StatusCode::PARTIAL_CONTENT, start, end - start + 1),
        None => (StatusCode::OK, 0, size),
    };

    let mut fh = match tokio::fs::File::open(&resolved.path).await {
        Ok(fh) => fh,
        Err(err) => return IssueError::Internal(err).into_response(),
    };
    if let Err(err) = fh.seek(std::io::SeekFrom::Start(start)).await {
        return IssueError::Internal(err).into_response();
    }
    debug!(%filename, start, len, "Serving audio");

    let mut res = Response::new(Body::from_stream(ReaderStream::new(fh.take(len))));
    *res.status_mut() = status;

    let max_age = (verified.expires_unix - state.issuer.clock().unix()).max(0);
    let content_type = from_path(&resolved.filename).first_or_octet_stream();
    let headers = res.headers_mut();
    let mut put = |name: header::HeaderName, value: String| match HeaderValue::from_str(&value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(err) => error!(%name, ?err, "Invalid header value"),
    };
    put(header::CONTENT_TYPE, content_type.to_string());
    put(header::ACCEPT_RANGES, "bytes".to_string());
    put(header::CACHE_CONTROL, format!("private, max-age={max_age}"));
    put(header::CONTENT_LENGTH, len.to_string());
    if status == StatusCode::PARTIAL_CONTENT {
        put(
            header::CONTENT_RANGE,
            format!("bytes {start}-{}/{size}", start + len - 1),
        );
    }
    res
}

#[derive(Debug, PartialEq, Eq)]
struct Unsatisfiable;

/// Parse a single `bytes=` range into inclusive offsets.
///
/// `Ok(None)` means serve the whole file; malformed or multi-range headers
/// are ignored rather than rejected.
fn parse_range(headers: &HeaderMap, size: u64) -> Result<Option<(u64, u64)>, Unsatisfiable> {
    let Some(spec) = headers
        .get(header::RANGE)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().strip_prefix("bytes="))
    else {
        return Ok(None);
    };
    if spec.contains(',') {
        return Ok(None);
    }
    let Some((start, end)) = spec.split_once('-') else {
        return Ok(None);
    };
    let (start, end) = (start.trim(), end.trim());

    let last = size.checked_sub(1).ok_or(Unsatisfiable)?;
    let (start, end) = if start.is_empty() {
        // Suffix range: the last N bytes
        let Ok(suffix) = end.parse::<u64>() else {
            return Ok(None);
        };
        if suffix == 0 {
            return Err(Unsatisfiable);
        }
        (size.saturating_sub(suffix), last)
    } else {
        let Ok(start) = start.parse::<u64>() else {
            return Ok(None);
        };
        let end = if end.is_empty() {
            last
        } else {
            match end.parse::<u64>() {
                Ok(end) => end.min(last),
                Err(_) => return Ok(None),
            }
        };
        (start, end)
    };

    if start > end {
        return Err(Unsatisfiable);
    }
    Ok(Some((start, end)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(value: &str, size: u64) -> Result<Option<(u64, u64)>, Unsatisfiable> {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_str(value).unwrap());
        parse_range(&headers, size)
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range(&HeaderMap::new(), 100), Ok(None));
        assert_eq!(range("bytes=0-9", 100), Ok(Some((0, 9))));
        assert_eq!(range("bytes=90-", 100), Ok(Some((90, 99))));
        assert_eq!(range("bytes=90-500", 100), Ok(Some((90, 99))));
        assert_eq!(range("bytes=-10", 100), Ok(Some((90, 99))));
        assert_eq!(range("bytes=-500", 100), Ok(Some((0, 99))));
    }

    #[test]
    fn test_parse_range_unsatisfiable() {
        assert_eq!(range("bytes=100-", 100), Err(Unsatisfiable));
        assert_eq!(range("bytes=50-10", 100), Err(Unsatisfiable));
        assert_eq!(range("bytes=-0", 100), Err(Unsatisfiable));
        assert_eq!(range("bytes=0-", 0), Err(Unsatisfiable));
    }

    #[test]
    fn test_parse_range_ignores_garbage() {
        assert_eq!(range("items=0-9", 100), Ok(None));
        assert_eq!(range("bytes=abc", 100), Ok(None));
        assert_eq!(range("bytes=x-9", 100), Ok(None));
        assert_eq!(range("bytes=0-1,5-6", 100), Ok(None));
    }
}
