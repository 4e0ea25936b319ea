//! The HTTP request that asks to become a cable connection.
//!
//! [`process`] decides whether the upgrade may proceed: the request must be
//! a `GET` WebSocket upgrade and its `Origin` must be allowed, unless
//! forgery protection is disabled. Refused requests get a plain-text 404.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::Query;
use axum::http::header::{CONTENT_TYPE, ORIGIN, UPGRADE};
use axum::http::request::Parts;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, info};

use crate::config::ServerConfig;

/// Header carrying an upstream request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// What a connection knows about the request that opened it.
#[derive(Clone, Debug, Default)]
pub struct HandshakeRequest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Whether this is a WebSocket upgrade.
    pub websocket: bool,
    /// `Origin` header, if any.
    pub origin: Option<String>,
    /// Request id, taken from `x-request-id` or generated.
    pub request_id: String,
    /// Peer address, when known.
    pub remote_ip: Option<String>,
    /// Decoded query string.
    pub query: HashMap<String, String>,
}

impl HandshakeRequest {
    /// Extract the handshake view from request parts.
    pub fn from_parts(parts: &Parts, remote: Option<SocketAddr>) -> Self {
        let header = |name| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(ToOwned::to_owned)
        };
        let websocket = parts.method == Method::GET
            && header(UPGRADE).is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
        let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default();

        Self {
            method: parts.method.to_string(),
            path: parts.uri.path().to_owned(),
            websocket,
            origin: header(ORIGIN),
            request_id: parts
                .headers
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map_or_else(|| uuid::Uuid::now_v7().to_string(), ToOwned::to_owned),
            remote_ip: remote.map(|addr| addr.ip().to_string()),
            query,
        }
    }

    /// Query parameter by name.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    fn ip(&self) -> &str {
        self.remote_ip.as_deref().unwrap_or("unknown")
    }

    fn websocket_tag(&self) -> &'static str {
        if self.websocket { " [WebSocket]" } else { "" }
    }

    /// `Started GET "/cable" [WebSocket] for 127.0.0.1 at ...`
    pub fn started_message(&self) -> String {
        format!(
            "Started {} \"{}\"{} for {} at {}",
            self.method,
            self.path,
            self.websocket_tag(),
            self.ip(),
            chrono::Utc::now()
        )
    }

    /// `Finished "/cable" [WebSocket] for 127.0.0.1 at ...`
    pub fn finished_message(&self) -> String {
        format!(
            "Finished \"{}\"{} for {} at {}",
            self.path,
            self.websocket_tag(),
            self.ip(),
            chrono::Utc::now()
        )
    }
}

/// Outcome of [`process`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeResponse {
    /// Proceed with the WebSocket handshake.
    Accept,
    /// Refuse with a 404.
    Reject,
}

impl IntoResponse for HandshakeResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Accept => StatusCode::SWITCHING_PROTOCOLS.into_response(),
            Self::Reject => (
                StatusCode::NOT_FOUND,
                [(CONTENT_TYPE, "text/plain")],
                "Page not found",
            )
                .into_response(),
        }
    }
}

/// Decide whether `request` may become a connection.
pub fn process(config: &ServerConfig, request: &HandshakeRequest) -> HandshakeResponse {
    if request.websocket && allow_request_origin(config, request) {
        HandshakeResponse::Accept
    } else {
        if !request.websocket {
            error!(
                method = %request.method,
                path = %request.path,
                "Failed to upgrade to WebSocket"
            );
        }
        info!("{}", request.finished_message());
        HandshakeResponse::Reject
    }
}

fn allow_request_origin(config: &ServerConfig, request: &HandshakeRequest) -> bool {
    if config.disable_request_forgery_protection {
        return true;
    }
    let origin = request.origin.as_deref().unwrap_or_default();
    if config.allowed_request_origins.iter().any(|o| o == origin) {
        true
    } else {
        error!("Request origin not allowed: {origin}");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    fn upgrade_request(origin: Option<&str>) -> HandshakeRequest {
        let mut builder = Request::builder()
            .method("GET")
            .uri("/cable?user=lifo")
            .header("upgrade", "websocket");
        if let Some(o) = origin {
            builder = builder.header("origin", o);
        }
        HandshakeRequest::from_parts(&parts(builder), Some("127.0.0.1:4000".parse().unwrap()))
    }

    fn config_with_origins(origins: &[&str]) -> ServerConfig {
        ServerConfig {
            allowed_request_origins: origins.iter().map(|s| (*s).to_owned()).collect(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn extracts_request_details() {
        let req = upgrade_request(Some("http://rubyonrails.com"));
        assert!(req.websocket);
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/cable");
        assert_eq!(req.origin.as_deref(), Some("http://rubyonrails.com"));
        assert_eq!(req.remote_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(req.query_param("user"), Some("lifo"));
        assert!(!req.request_id.is_empty());
    }

    #[test]
    fn request_id_header_is_kept() {
        let p = parts(
            Request::builder()
                .uri("/cable")
                .header("x-request-id", "req-42"),
        );
        assert_eq!(HandshakeRequest::from_parts(&p, None).request_id, "req-42");
    }

    #[test]
    fn non_upgrade_is_not_websocket() {
        let p = parts(Request::builder().method("GET").uri("/cable"));
        assert!(!HandshakeRequest::from_parts(&p, None).websocket);
    }

    #[test]
    fn post_upgrade_is_not_websocket() {
        let p = parts(
            Request::builder()
                .method("POST")
                .uri("/cable")
                .header("upgrade", "websocket"),
        );
        assert!(!HandshakeRequest::from_parts(&p, None).websocket);
    }

    #[test]
    fn allowed_origin_is_accepted() {
        let config = config_with_origins(&["http://rubyonrails.com"]);
        let req = upgrade_request(Some("http://rubyonrails.com"));
        assert_eq!(process(&config, &req), HandshakeResponse::Accept);
    }

    #[test]
    fn disallowed_origin_is_rejected() {
        let config = config_with_origins(&["http://rubyonrails.com"]);
        let req = upgrade_request(Some("http://hax.com"));
        assert_eq!(process(&config, &req), HandshakeResponse::Reject);
    }

    #[test]
    fn missing_origin_is_rejected() {
        let config = config_with_origins(&["http://rubyonrails.com"]);
        assert_eq!(process(&config, &upgrade_request(None)), HandshakeResponse::Reject);
    }

    #[test]
    fn disabled_protection_accepts_any_origin() {
        let config = ServerConfig {
            disable_request_forgery_protection: true,
            ..ServerConfig::default()
        };
        let req = upgrade_request(Some("http://hax.com"));
        assert_eq!(process(&config, &req), HandshakeResponse::Accept);
    }

    #[test]
    fn non_websocket_is_rejected_even_without_protection() {
        let config = ServerConfig {
            disable_request_forgery_protection: true,
            ..ServerConfig::default()
        };
        let req = HandshakeRequest::from_parts(&parts(Request::builder().uri("/cable")), None);
        assert_eq!(process(&config, &req), HandshakeResponse::Reject);
    }

    #[tokio::test]
    async fn reject_renders_plain_404() {
        let resp = HandshakeResponse::Reject.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers()[CONTENT_TYPE], "text/plain");
        let body = axum::body::to_bytes(resp.into_body(), 1_000).await.unwrap();
        assert_eq!(&body[..], b"Page not found");
    }

    #[test]
    fn log_messages_mention_websocket() {
        let req = upgrade_request(None);
        assert!(req.started_message().starts_with("Started GET \"/cable\" [WebSocket] for 127.0.0.1"));
        assert!(req.finished_message().starts_with("Finished \"/cable\" [WebSocket] for 127.0.0.1"));
    }
}
