//! axum/tower integration.
//!
//! `GatekeeperLayer` wraps a router: every request is checked by the rate
//! limiter, rejected requests are answered directly, admitted ones reach the
//! inner service, and once the final status is known one log record is queued
//! for the audit logger.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::future::BoxFuture;
use serde_json::json;
use tower::{Layer, Service};

use crate::application::audit::AuditLogger;
use crate::application::limiter::RateLimiter;
use crate::application::reset::ResetHook;
use crate::domain::client::ClientId;
use crate::domain::decision::GateDecision;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Work out which client a request is attributed to.
///
/// The peer address is used unless `trust_forwarded_for` is set and the first
/// `X-Forwarded-For` entry parses as an IP. IPv4-mapped IPv6 addresses are
/// reported in their IPv4 form so one client has one identifier.
pub fn extract_client_id(
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> ClientId {
    let forwarded = trust_forwarded_for
        .then(|| headers.get(FORWARDED_FOR))
        .flatten()
        .and_then(|value| value.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());

    match forwarded.or_else(|| remote_addr.map(|addr| addr.ip())) {
        Some(ip) => ClientId::from(ip.to_canonical()),
        None => ClientId::unknown(),
    }
}

/// Response sent for a rejected request.
pub fn rejection_response(decision: &GateDecision) -> Option<Response> {
    let (status, message) = match decision {
        GateDecision::Exempt | GateDecision::Allow { .. } => return None,
        GateDecision::Blocked => (StatusCode::FORBIDDEN, "IP Blocked"),
        GateDecision::TooManyRequests { .. } => (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests"),
        GateDecision::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable"),
    };
    Some((status, Json(json!({ "error": message }))).into_response())
}

#[derive(Debug)]
struct GateState {
    limiter: RateLimiter,
    audit: AuditLogger,
    trust_forwarded_for: bool,
}

/// Gatekeeping layer for Tower.
#[derive(Debug, Clone)]
pub struct GatekeeperLayer {
    state: Arc<GateState>,
}

impl GatekeeperLayer {
    /// Create a new gatekeeping layer.
    pub fn new(limiter: RateLimiter, audit: AuditLogger, trust_forwarded_for: bool) -> Self {
        Self {
            state: Arc::new(GateState {
                limiter,
                audit,
                trust_forwarded_for,
            }),
        }
    }
}

impl<S> Layer<S> for GatekeeperLayer {
    type Service = GatekeeperService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GatekeeperService {
            inner,
            state: self.state.clone(),
        }
    }
}

/// Gatekeeping service.
#[derive(Debug, Clone)]
pub struct GatekeeperService<S> {
    inner: S,
    state: Arc<GateState>,
}

impl<S> Service<Request<Body>> for GatekeeperService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let state = self.state.clone();
        // Take the service that was driven to readiness, leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let remote_addr = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0);
            let client =
                extract_client_id(request.headers(), remote_addr, state.trust_forwarded_for);
            let method = request.method().to_string();
            let path = request.uri().path().to_string();
            let endpoint = request
                .uri()
                .path_and_query()
                .map_or_else(|| request.uri().path().to_string(), |pq| pq.to_string());

            let decision = state.limiter.check(&client, &path).await;
            let response = match rejection_response(&decision) {
                Some(rejection) => rejection,
                None => inner.call(request).await?,
            };

            state
                .audit
                .observe(&client, &method, &endpoint, response.status().as_u16());
            Ok(response)
        })
    }
}

/// Router serving the reset hook on `path` for GET and POST.
///
/// Merge it into the application router; the path must also be exempt from the
/// gate, which `GatekeeperConfig` guarantees for its configured reset path.
pub fn reset_router(hook: Arc<ResetHook>, path: &str) -> Router {
    Router::new()
        .route(path, get(reset_handler).post(reset_handler))
        .with_state(hook)
}

async fn reset_handler(State(hook): State<Arc<ResetHook>>) -> Response {
    match hook.reset_all().await {
        Ok(()) => (StatusCode::OK, "Counters and bans cleared").into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error clearing store: {e}"),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn addr(ip: IpAddr) -> Option<SocketAddr> {
        Some(SocketAddr::new(ip, 40_000))
    }

    #[test]
    fn test_peer_address_is_default_identity() {
        let headers = HeaderMap::new();
        let client = extract_client_id(&headers, addr(IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9))), false);
        assert_eq!(client.as_str(), "9.9.9.9");
    }

    #[test]
    fn test_forwarded_for_only_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR,
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        let peer = addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));

        assert_eq!(extract_client_id(&headers, peer, false).as_str(), "10.0.0.1");
        assert_eq!(extract_client_id(&headers, peer, true).as_str(), "203.0.113.7");
    }

    #[test]
    fn test_malformed_forwarded_for_falls_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static("not-an-ip"));
        let peer = addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));

        assert_eq!(extract_client_id(&headers, peer, true).as_str(), "10.0.0.2");
    }

    #[test]
    fn test_mapped_ipv6_is_canonicalized() {
        let mapped = Ipv4Addr::new(192, 0, 2, 1).to_ipv6_mapped();
        let client = extract_client_id(&HeaderMap::new(), addr(IpAddr::V6(mapped)), false);
        assert_eq!(client.as_str(), "192.0.2.1");

        let v6 = extract_client_id(&HeaderMap::new(), addr(IpAddr::V6(Ipv6Addr::LOCALHOST)), false);
        assert_eq!(v6.as_str(), "::1");
    }

    #[test]
    fn test_missing_address_is_unknown() {
        assert_eq!(
            extract_client_id(&HeaderMap::new(), None, true),
            ClientId::unknown()
        );
    }

    #[test]
    fn test_rejection_statuses() {
        assert!(rejection_response(&GateDecision::Exempt).is_none());
        assert!(rejection_response(&GateDecision::Allow { count: Some(1) }).is_none());
        for decision in [
            GateDecision::Blocked,
            GateDecision::TooManyRequests { count: 4 },
            GateDecision::Unavailable,
        ] {
            let response = rejection_response(&decision).unwrap();
            assert_eq!(
                Some(response.status().as_u16()),
                decision.rejection_status()
            );
        }
    }
}
