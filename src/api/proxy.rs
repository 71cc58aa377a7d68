//! Proxy endpoint: every request on the proxy listener goes through the
//! request router.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header::CONTENT_LENGTH, Method, StatusCode, Uri},
    response::Response,
};
use reqwest::Url;

use crate::errors::{AppError, FetchError};
use crate::fetch::{is_hop_by_hop, FetchRequest};
use crate::router::Routed;
use crate::ProxyState;

/// Header telling the client whether the response came from cache or network.
pub const SOURCE_HEADER: &str = "x-pinmap-source";

/// Largest request body the proxy buffers.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Fallback handler for the proxy listener.
pub async fn forward(
    State(state): State<ProxyState>,
    request: Request,
) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();
    let url = resolve_url(&state.router.policy().app_origin, &parts.method, &parts.uri)?;

    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::BadRequest(format!("Unreadable request body: {}", e)))?;

    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let fetch = FetchRequest {
        method: parts.method.as_str().to_string(),
        url,
        headers,
        body: body.to_vec(),
    };

    match state.router.handle(fetch).await {
        Ok(routed) => {
            tracing::debug!(
                uri = %parts.uri,
                class = ?routed.class,
                source = routed.source.as_str(),
                status = routed.response.status,
                "Proxy request served"
            );
            into_http_response(routed)
        }
        Err(err) => {
            tracing::warn!(uri = %parts.uri, error = %err, "Proxy request failed");
            Err(err.into())
        }
    }
}

/// Origin-form URIs resolve against the app origin; absolute-form URIs are
/// taken as they are. Tunnels and authority-form targets are refused.
pub fn resolve_url(app_origin: &Url, method: &Method, uri: &Uri) -> Result<Url, AppError> {
    if *method == Method::CONNECT {
        return Err(AppError::BadRequest(format!(
            "CONNECT {} is not supported by the caching proxy",
            uri
        )));
    }

    if uri.scheme().is_some() {
        return Url::parse(&uri.to_string())
            .map_err(|e| FetchError::InvalidUrl(e.to_string()).into());
    }

    let path = match uri.path_and_query() {
        Some(path) if uri.authority().is_none() && path.as_str().starts_with('/') => path.as_str(),
        _ => {
            return Err(AppError::BadRequest(format!(
                "Request target {:?} has no path",
                uri.to_string()
            )))
        }
    };
    app_origin
        .join(path.trim_start_matches('/'))
        .map_err(|e| FetchError::InvalidUrl(e.to_string()).into())
}

fn into_http_response(routed: Routed) -> Result<Response, AppError> {
    let status = StatusCode::from_u16(routed.response.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut builder = Response::builder().status(status);
    for (name, value) in &routed.response.headers {
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case(CONTENT_LENGTH.as_str()) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder = builder.header(SOURCE_HEADER, routed.source.as_str());

    builder
        .body(Body::from(routed.response.body))
        .map_err(|e| AppError::Internal(format!("Failed to build proxy response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("http://127.0.0.1:5173/").unwrap()
    }

    #[test]
    fn test_origin_form_resolves_against_app_origin() {
        let uri: Uri = "/index.html".parse().unwrap();
        assert_eq!(
            resolve_url(&origin(), &Method::GET, &uri).unwrap().as_str(),
            "http://127.0.0.1:5173/index.html"
        );

        let root: Uri = "/".parse().unwrap();
        assert_eq!(resolve_url(&origin(), &Method::GET, &root).unwrap(), origin());
    }

    #[test]
    fn test_origin_form_keeps_query_and_origin_subpath() {
        let base = Url::parse("http://host.test/pinmap/").unwrap();
        let uri: Uri = "/app.js?v=3".parse().unwrap();
        assert_eq!(
            resolve_url(&base, &Method::GET, &uri).unwrap().as_str(),
            "http://host.test/pinmap/app.js?v=3"
        );
    }

    #[test]
    fn test_absolute_form_is_used_as_is() {
        let uri: Uri = "https://a.tile.openstreetmap.org/5/17/10.png".parse().unwrap();
        assert_eq!(
            resolve_url(&origin(), &Method::GET, &uri).unwrap().as_str(),
            "https://a.tile.openstreetmap.org/5/17/10.png"
        );
    }

    #[test]
    fn test_tunnels_are_refused() {
        let target: Uri = "tile.openstreetmap.org:443".parse().unwrap();
        let err = resolve_url(&origin(), &Method::CONNECT, &target).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn test_authority_form_is_not_resolved_against_app_origin() {
        let target: Uri = "tile.openstreetmap.org:443".parse().unwrap();
        let err = resolve_url(&origin(), &Method::GET, &target).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let asterisk: Uri = "*".parse().unwrap();
        let err = resolve_url(&origin(), &Method::OPTIONS, &asterisk).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
