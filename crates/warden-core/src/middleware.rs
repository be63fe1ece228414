//! Guard Middleware
//!
//! Axum layer that runs every request through [`Warden::check_request`]
//! before it reaches a handler. Rejections short-circuit with the
//! responses from [`crate::reject`]; admitted responses get the
//! `X-RateLimit-*` headers stamped on.

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::USER_AGENT;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use crate::prelude::*;
use crate::reject::{apply_rate_headers, GuardReject};
use crate::warden::{RequestContext, RequestVerdict, Warden};

/// Authenticated principal, inserted by an upstream auth layer. When
/// present, the per-user rate limit applies on top of the per-IP one.
#[derive(Clone, Debug)]
pub struct GuardPrincipal(pub Box<str>);

/// Configuration
#[derive(Clone, Debug)]
pub struct GuardMiddlewareConfig {
	/// Honor `X-Forwarded-For` / `X-Real-IP`. Enable only behind a
	/// proxy that overwrites them; otherwise clients pick their own IP.
	pub trust_forwarded_headers: bool,
	/// Header carrying the numeric tenant id.
	pub tenant_header: Box<str>,
	/// Tenant used when the header is absent or unparseable.
	pub default_tenant: TnId,
}

impl Default for GuardMiddlewareConfig {
	fn default() -> Self {
		Self {
			trust_forwarded_headers: false,
			tenant_header: "x-tenant-id".into(),
			default_tenant: TnId(1),
		}
	}
}

/// State handed to [`guard_middleware`] via `from_fn_with_state`.
#[derive(Clone, Debug)]
pub struct GuardState {
	pub warden: Arc<Warden>,
	pub config: GuardMiddlewareConfig,
}

/// The admission gate. Attach with
/// `axum::middleware::from_fn_with_state(state, guard_middleware)`.
pub async fn guard_middleware(
	State(state): State<GuardState>,
	req: Request,
	next: Next,
) -> Response {
	let ip = client_ip(&req, state.config.trust_forwarded_headers)
		.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
	let tn_id = resolve_tenant(&req, &state.config);

	let endpoint = req.uri().path().to_string();
	let method = req.method().as_str().to_string();
	let user_agent = req
		.headers()
		.get(USER_AGENT)
		.and_then(|v| v.to_str().ok())
		.map(str::to_string);
	let principal = req.extensions().get::<GuardPrincipal>().cloned();

	let ctx = RequestContext {
		ip,
		endpoint: &endpoint,
		method: &method,
		user_agent: user_agent.as_deref(),
		user_id: principal.as_ref().map(|p| &*p.0),
	};

	match state.warden.check_request(tn_id, &ctx).await {
		RequestVerdict::Allowed { decision } => {
			let mut response = next.run(req).await;
			if let Some(decision) = decision {
				apply_rate_headers(&mut response, &decision);
			}
			response
		}
		RequestVerdict::Blocked { block } => GuardReject::Blocked {
			reason: block.reason,
			expires_at: block.expires_at,
		}
		.into_response(),
		RequestVerdict::RateLimited { decision } => {
			GuardReject::RateLimited { decision }.into_response()
		}
	}
}

/// Client IP resolution: forwarded headers (when trusted) first, then
/// the socket peer address.
fn client_ip(req: &Request<Body>, trust_forwarded: bool) -> Option<IpAddr> {
	if trust_forwarded {
		let forwarded = req
			.headers()
			.get("x-forwarded-for")
			.and_then(|v| v.to_str().ok())
			.and_then(|v| v.split(',').next())
			.and_then(|v| v.trim().parse().ok());
		if forwarded.is_some() {
			return forwarded;
		}

		let real_ip = req
			.headers()
			.get("x-real-ip")
			.and_then(|v| v.to_str().ok())
			.and_then(|v| v.trim().parse().ok());
		if real_ip.is_some() {
			return real_ip;
		}
	}

	req.extensions().get::<ConnectInfo<SocketAddr>>().map(|ci| ci.0.ip())
}

fn resolve_tenant(req: &Request<Body>, config: &GuardMiddlewareConfig) -> TnId {
	req.headers()
		.get(&*config.tenant_header)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.trim().parse::<u32>().ok())
		.map(TnId)
		.unwrap_or(config.default_tenant)
}


// vim: ts=4
