//! Guard Rejection Responses
//!
//! HTTP shapes for the two ways the guard turns a request away: rate
//! limiting (429 with standard rate-limit headers) and IP blocks (403
//! with the reason and, for temporary blocks, the expiry).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::limiter::RateLimitDecision;
use crate::prelude::*;

/// A request the guard refused to admit.
#[derive(Clone, Debug)]
pub enum GuardReject {
	RateLimited { decision: RateLimitDecision },
	Blocked { reason: Box<str>, expires_at: Option<Timestamp> },
}

impl std::fmt::Display for GuardReject {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			GuardReject::RateLimited { decision } => {
				write!(
					f,
					"Rate limited, retry after {}s",
					decision.retry_after.unwrap_or_default()
				)
			}
			GuardReject::Blocked { reason, expires_at } => match expires_at {
				Some(at) => write!(f, "IP blocked until {}: {}", at.iso(), reason),
				None => write!(f, "IP blocked permanently: {}", reason),
			},
		}
	}
}

impl std::error::Error for GuardReject {}

impl IntoResponse for GuardReject {
	fn into_response(self) -> Response {
		match self {
			GuardReject::RateLimited { decision } => {
				let body = serde_json::json!({
					"error": {
						"code": "E-RATE-LIMITED",
						"message": "Too many requests. Please slow down.",
						"details": {
							"limit": decision.limit,
							"retryAfter": decision.retry_after,
							"resetAt": decision.reset_at.iso()
						}
					}
				});

				let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
				if let Some(retry) = decision.retry_after {
					if let Ok(val) = retry.to_string().parse() {
						response.headers_mut().insert("Retry-After", val);
					}
				}
				apply_rate_headers(&mut response, &decision);

				response
			}
			GuardReject::Blocked { reason, expires_at } => {
				let body = serde_json::json!({
					"error": {
						"code": "E-IP-BLOCKED",
						"message": "Access blocked due to policy violations.",
						"details": {
							"reason": reason,
							"unblockAt": expires_at.map(|at| at.iso())
						}
					}
				});
				(StatusCode::FORBIDDEN, Json(body)).into_response()
			}
		}
	}
}

/// Standard `X-RateLimit-*` headers, set on admitted responses as well
/// so well-behaved clients can pace themselves.
pub fn apply_rate_headers(response: &mut Response, decision: &RateLimitDecision) {
	let headers = response.headers_mut();
	if let Ok(val) = decision.limit.to_string().parse() {
		headers.insert("X-RateLimit-Limit", val);
	}
	if let Ok(val) = decision.remaining.to_string().parse() {
		headers.insert("X-RateLimit-Remaining", val);
	}
	if let Ok(val) = decision.reset_at.iso().parse() {
		headers.insert("X-RateLimit-Reset", val);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn denied() -> RateLimitDecision {
		RateLimitDecision {
			allowed: false,
			limit: 5,
			remaining: 0,
			reset_at: Timestamp(1_700_000_060),
			retry_after: Some(12),
		}
	}

	#[test]
	fn test_rate_limited_response() {
		let response = GuardReject::RateLimited { decision: denied() }.into_response();
		assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

		let headers = response.headers();
		assert_eq!(headers.get("Retry-After").unwrap(), "12");
		assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "5");
		assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "0");
		assert_eq!(headers.get("X-RateLimit-Reset").unwrap(), "2023-11-14T22:14:20Z");
	}

	#[test]
	fn test_blocked_response() {
		let reject = GuardReject::Blocked {
			reason: "Brute force".into(),
			expires_at: Some(Timestamp(1_700_003_600)),
		};
		let response = reject.into_response();
		assert_eq!(response.status(), StatusCode::FORBIDDEN);
	}

	#[test]
	fn test_headers_applied_to_allowed_response() {
		let decision = RateLimitDecision {
			allowed: true,
			limit: 120,
			remaining: 119,
			reset_at: Timestamp(1_700_000_060),
			retry_after: None,
		};
		let mut response = StatusCode::OK.into_response();
		apply_rate_headers(&mut response, &decision);
		assert_eq!(response.headers().get("X-RateLimit-Remaining").unwrap(), "119");
	}
}

// vim: ts=4
