//! Guard Admin API
//!
//! Tenant-scoped management endpoints: configuration, blocks, whitelist,
//! violations, statistics, limit resets, on-demand DDoS analysis and
//! activity introspection. Mount under a path prefix of your choosing,
//! behind your own authorization:
//!
//! ```ignore
//! let app = Router::new()
//!     .nest("/api/guard", admin_routes().with_state(warden.clone()));
//! ```

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::net::IpAddr;
use std::sync::Arc;

use warden_types::guard_adapter::{
	BlockedIp, GuardConfig, IdentityKind, LimitType, ListViolationsOptions, UpdateGuardConfig,
	Violation, WhitelistEntry,
};

use crate::blocklist::BlockOutcome;
use crate::ddos::DdosAssessment;
use crate::prelude::*;
use crate::tracker::IpActivity;
use crate::warden::{GuardStats, Warden};

/// Response envelope for the admin API.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
	pub data: T,
	pub pagination: Option<Pagination>,
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
	pub offset: u32,
	pub limit: u32,
	/// Items in this page.
	pub count: usize,
}

impl<T> ApiResponse<T> {
	pub fn new(data: T) -> Self {
		Self { data, pagination: None }
	}

	pub fn with_pagination(data: T, offset: u32, limit: u32, count: usize) -> Self {
		Self { data, pagination: Some(Pagination { offset, limit, count }) }
	}
}

/// All admin routes, relative to the mount point.
pub fn admin_routes() -> Router<Arc<Warden>> {
	Router::new()
		.route("/{tn_id}/config", get(get_config).put(put_config))
		.route("/{tn_id}/blocks", get(list_blocks).post(create_block))
		.route("/{tn_id}/blocks/{ip}", delete(remove_block))
		.route("/{tn_id}/whitelist", get(list_whitelist).post(create_whitelist))
		.route("/{tn_id}/whitelist/{ip}", delete(remove_whitelist))
		.route("/{tn_id}/violations", get(list_violations))
		.route("/{tn_id}/stats", get(get_stats))
		.route("/{tn_id}/limits/reset", post(reset_limits))
		.route("/{tn_id}/ddos/check", post(check_ddos))
		.route("/{tn_id}/activity/top", get(top_activity))
}

// Request / response shapes //
//***************************//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBlockRequest {
	pub ip: IpAddr,
	pub reason: String,
	/// Seconds; omit for a permanent block.
	pub duration: Option<u32>,
	pub blocked_by: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockResult {
	pub outcome: &'static str,
	pub violation_count: Option<u32>,
	#[serde(serialize_with = "warden_types::types::serialize_timestamp_iso_opt")]
	pub expires_at: Option<Timestamp>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWhitelistRequest {
	pub ip: IpAddr,
	pub description: Option<String>,
	pub added_by: Option<String>,
	/// Epoch seconds; omit for a permanent entry.
	pub expires_at: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct Removed {
	pub removed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetLimitsRequest {
	pub identifier: String,
	pub kind: IdentityKind,
	pub endpoint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResetResult {
	pub removed: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationsQuery {
	pub limit_type: Option<LimitType>,
	pub ip: Option<IpAddr>,
	/// Epoch seconds.
	pub since: Option<i64>,
	pub limit: Option<u32>,
	pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct TopActivityQuery {
	/// Trailing window in seconds.
	pub window: Option<u32>,
	pub limit: Option<usize>,
}

// Handlers //
//**********//

#[axum::debug_handler]
async fn get_config(
	State(warden): State<Arc<Warden>>,
	Path(tn_id): Path<u32>,
) -> WdResult<(StatusCode, Json<ApiResponse<GuardConfig>>)> {
	let config = warden.config(TnId(tn_id)).await?;
	Ok((StatusCode::OK, Json(ApiResponse::new(config))))
}

#[axum::debug_handler]
async fn put_config(
	State(warden): State<Arc<Warden>>,
	Path(tn_id): Path<u32>,
	Json(update): Json<UpdateGuardConfig>,
) -> WdResult<(StatusCode, Json<ApiResponse<GuardConfig>>)> {
	let config = warden.update_config(TnId(tn_id), &update).await?;
	Ok((StatusCode::OK, Json(ApiResponse::new(config))))
}

#[axum::debug_handler]
async fn list_blocks(
	State(warden): State<Arc<Warden>>,
	Path(tn_id): Path<u32>,
) -> WdResult<(StatusCode, Json<ApiResponse<Vec<BlockedIp>>>)> {
	let blocks = warden.list_blocked(TnId(tn_id)).await?;
	Ok((StatusCode::OK, Json(ApiResponse::new(blocks))))
}

#[axum::debug_handler]
async fn create_block(
	State(warden): State<Arc<Warden>>,
	Path(tn_id): Path<u32>,
	Json(req): Json<CreateBlockRequest>,
) -> WdResult<(StatusCode, Json<ApiResponse<BlockResult>>)> {
	let blocked_by = req.blocked_by.as_deref().unwrap_or("admin");
	let outcome = warden
		.block_ip(TnId(tn_id), req.ip, &req.reason, req.duration, blocked_by)
		.await?;

	let (status, result) = match outcome {
		BlockOutcome::Created { expires_at } => (
			StatusCode::CREATED,
			BlockResult { outcome: "created", violation_count: None, expires_at },
		),
		BlockOutcome::Escalated { violation_count } => (
			StatusCode::OK,
			BlockResult {
				outcome: "escalated",
				violation_count: Some(violation_count),
				expires_at: None,
			},
		),
		BlockOutcome::Whitelisted => (
			StatusCode::OK,
			BlockResult { outcome: "whitelisted", violation_count: None, expires_at: None },
		),
	};
	Ok((status, Json(ApiResponse::new(result))))
}

#[axum::debug_handler]
async fn remove_block(
	State(warden): State<Arc<Warden>>,
	Path((tn_id, ip)): Path<(u32, String)>,
) -> WdResult<(StatusCode, Json<ApiResponse<Removed>>)> {
	let ip = parse_ip(&ip)?;
	let removed = warden.unblock_ip(TnId(tn_id), ip).await?;
	Ok((StatusCode::OK, Json(ApiResponse::new(Removed { removed }))))
}

#[axum::debug_handler]
async fn list_whitelist(
	State(warden): State<Arc<Warden>>,
	Path(tn_id): Path<u32>,
) -> WdResult<(StatusCode, Json<ApiResponse<Vec<WhitelistEntry>>>)> {
	let entries = warden.list_whitelisted(TnId(tn_id)).await?;
	Ok((StatusCode::OK, Json(ApiResponse::new(entries))))
}

#[axum::debug_handler]
async fn create_whitelist(
	State(warden): State<Arc<Warden>>,
	Path(tn_id): Path<u32>,
	Json(req): Json<CreateWhitelistRequest>,
) -> WdResult<(StatusCode, Json<ApiResponse<WhitelistEntry>>)> {
	let entry = warden
		.add_to_whitelist(
			TnId(tn_id),
			req.ip,
			req.description.as_deref(),
			req.added_by.as_deref().unwrap_or("admin"),
			req.expires_at.map(Timestamp),
		)
		.await?;
	Ok((StatusCode::CREATED, Json(ApiResponse::new(entry))))
}

#[axum::debug_handler]
async fn remove_whitelist(
	State(warden): State<Arc<Warden>>,
	Path((tn_id, ip)): Path<(u32, String)>,
) -> WdResult<(StatusCode, Json<ApiResponse<Removed>>)> {
	let ip = parse_ip(&ip)?;
	let removed = warden.remove_from_whitelist(TnId(tn_id), ip).await?;
	Ok((StatusCode::OK, Json(ApiResponse::new(Removed { removed }))))
}

#[axum::debug_handler]
async fn list_violations(
	State(warden): State<Arc<Warden>>,
	Path(tn_id): Path<u32>,
	Query(query): Query<ViolationsQuery>,
) -> WdResult<(StatusCode, Json<ApiResponse<Vec<Violation>>>)> {
	let opts = ListViolationsOptions {
		limit_type: query.limit_type,
		ip: query.ip,
		since: query.since.map(Timestamp),
		limit: query.limit,
		offset: query.offset,
	};
	let violations = warden.list_violations(TnId(tn_id), &opts).await?;

	let count = violations.len();
	let response = ApiResponse::with_pagination(
		violations,
		query.offset.unwrap_or(0),
		query.limit.unwrap_or(100),
		count,
	);
	Ok((StatusCode::OK, Json(response)))
}

#[axum::debug_handler]
async fn get_stats(
	State(warden): State<Arc<Warden>>,
	Path(tn_id): Path<u32>,
) -> WdResult<(StatusCode, Json<ApiResponse<GuardStats>>)> {
	let stats = warden.stats(TnId(tn_id)).await?;
	Ok((StatusCode::OK, Json(ApiResponse::new(stats))))
}

#[axum::debug_handler]
async fn reset_limits(
	State(warden): State<Arc<Warden>>,
	Path(tn_id): Path<u32>,
	Json(req): Json<ResetLimitsRequest>,
) -> WdResult<(StatusCode, Json<ApiResponse<ResetResult>>)> {
	let removed = warden
		.reset_limits(TnId(tn_id), &req.identifier, req.kind, req.endpoint.as_deref())
		.await?;
	Ok((StatusCode::OK, Json(ApiResponse::new(ResetResult { removed }))))
}

#[axum::debug_handler]
async fn check_ddos(
	State(warden): State<Arc<Warden>>,
	Path(tn_id): Path<u32>,
) -> WdResult<(StatusCode, Json<ApiResponse<DdosAssessment>>)> {
	let assessment = warden.check_ddos(TnId(tn_id)).await?;
	Ok((StatusCode::OK, Json(ApiResponse::new(assessment))))
}

#[axum::debug_handler]
async fn top_activity(
	State(warden): State<Arc<Warden>>,
	Path(_tn_id): Path<u32>,
	Query(query): Query<TopActivityQuery>,
) -> WdResult<(StatusCode, Json<ApiResponse<Vec<IpActivity>>>)> {
	let top = warden.top_ips(query.limit.unwrap_or(20), query.window.unwrap_or(60));
	Ok((StatusCode::OK, Json(ApiResponse::new(top))))
}

fn parse_ip(raw: &str) -> WdResult<IpAddr> {
	raw.parse()
		.map_err(|_| Error::ValidationError(format!("invalid IP address: {}", raw)))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::limiter::CheckOptions;
	use crate::memory::MemoryGuardAdapter;
	use axum::body::Body;
	use axum::http::{header, Request};
	use http_body_util::BodyExt;
	use serde_json::{json, Value};
	use tower::ServiceExt;
	use warden_types::guard_adapter::GuardAdapter;

	async fn app() -> (Router, Arc<Warden>) {
		let adapter = Arc::new(MemoryGuardAdapter::new());
		adapter.create_config(TnId(1), &GuardConfig::default()).await.unwrap();
		let warden = Arc::new(Warden::new(adapter));
		warden.init().await.unwrap();
		(admin_routes().with_state(warden.clone()), warden)
	}

	fn get_req(uri: &str) -> Request<Body> {
		Request::builder().uri(uri).body(Body::empty()).unwrap()
	}

	fn json_req(method: &str, uri: &str, body: Value) -> Request<Body> {
		Request::builder()
			.method(method)
			.uri(uri)
			.header(header::CONTENT_TYPE, "application/json")
			.body(Body::from(body.to_string()))
			.unwrap()
	}

	async fn body_json(response: axum::response::Response) -> Value {
		let bytes = response.into_body().collect().await.unwrap().to_bytes();
		serde_json::from_slice(&bytes).unwrap()
	}

	#[tokio::test]
	async fn test_get_config_returns_defaults() {
		let (app, _) = app().await;

		let response = app.oneshot(get_req("/1/config")).await.unwrap();
		assert_eq!(response.status(), StatusCode::OK);

		let body = body_json(response).await;
		assert_eq!(body["data"]["ipLimit"], 100);
		assert_eq!(body["data"]["enabled"], true);
	}

	#[tokio::test]
	async fn test_put_config_applies_partial_update() {
		let (app, _) = app().await;

		let response = app
			.clone()
			.oneshot(json_req("PUT", "/1/config", json!({"ipLimit": 7})))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(body_json(response).await["data"]["ipLimit"], 7);

		let response = app.oneshot(get_req("/1/config")).await.unwrap();
		let body = body_json(response).await;
		assert_eq!(body["data"]["ipLimit"], 7);
		assert_eq!(body["data"]["userLimit"], 300);
	}

	#[tokio::test]
	async fn test_zero_window_update_is_rejected() {
		let (app, _) = app().await;

		let response = app
			.oneshot(json_req("PUT", "/1/config", json!({"ipWindow": 0})))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn test_block_lifecycle() {
		let (app, _) = app().await;

		let response = app
			.clone()
			.oneshot(json_req(
				"POST",
				"/1/blocks",
				json!({"ip": "9.9.9.9", "reason": "abuse", "duration": 3600}),
			))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::CREATED);
		let body = body_json(response).await;
		assert_eq!(body["data"]["outcome"], "created");

		// second block escalates
		let response = app
			.clone()
			.oneshot(json_req("POST", "/1/blocks", json!({"ip": "9.9.9.9", "reason": "again"})))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		let body = body_json(response).await;
		assert_eq!(body["data"]["outcome"], "escalated");
		assert_eq!(body["data"]["violationCount"], 2);

		let response = app.clone().oneshot(get_req("/1/blocks")).await.unwrap();
		let body = body_json(response).await;
		assert_eq!(body["data"].as_array().unwrap().len(), 1);

		let response = app
			.clone()
			.oneshot(
				Request::builder()
					.method("DELETE")
					.uri("/1/blocks/9.9.9.9")
					.body(Body::empty())
					.unwrap(),
			)
			.await
			.unwrap();
		assert_eq!(body_json(response).await["data"]["removed"], true);

		let response = app.oneshot(get_req("/1/blocks")).await.unwrap();
		assert!(body_json(response).await["data"].as_array().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_whitelisted_ip_reports_whitelisted_outcome() {
		let (app, _) = app().await;

		let response = app
			.clone()
			.oneshot(json_req("POST", "/1/whitelist", json!({"ip": "8.8.8.8"})))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::CREATED);

		let response = app
			.oneshot(json_req("POST", "/1/blocks", json!({"ip": "8.8.8.8", "reason": "nope"})))
			.await
			.unwrap();
		assert_eq!(body_json(response).await["data"]["outcome"], "whitelisted");
	}

	#[tokio::test]
	async fn test_reset_limits_removes_buckets() {
		let (app, warden) = app().await;
		warden.check_rate_limit(TnId(1), "1.2.3.4", IdentityKind::Ip, CheckOptions::default()).await;

		let response = app
			.oneshot(json_req(
				"POST",
				"/1/limits/reset",
				json!({"identifier": "1.2.3.4", "kind": "ip"}),
			))
			.await
			.unwrap();
		assert_eq!(body_json(response).await["data"]["removed"], 1);
	}

	#[tokio::test]
	async fn test_violations_list_is_paginated() {
		let (app, warden) = app().await;
		// trip a 1-token limit to record a violation
		warden
			.update_config(
				TnId(1),
				&UpdateGuardConfig {
					ip_limit: Some(1),
					burst_allowance: Some(0),
					..UpdateGuardConfig::default()
				},
			)
			.await
			.unwrap();
		warden.check_rate_limit(TnId(1), "1.2.3.4", IdentityKind::Ip, CheckOptions::default()).await;
		warden.check_rate_limit(TnId(1), "1.2.3.4", IdentityKind::Ip, CheckOptions::default()).await;

		let response = app.oneshot(get_req("/1/violations?limitType=rate")).await.unwrap();
		let body = body_json(response).await;
		assert_eq!(body["data"].as_array().unwrap().len(), 1);
		assert_eq!(body["pagination"]["count"], 1);
		assert_eq!(body["data"][0]["limitType"], "rate");
	}

	#[tokio::test]
	async fn test_ddos_check_on_quiet_tenant() {
		let (app, _) = app().await;

		let response = app
			.oneshot(json_req("POST", "/1/ddos/check", json!({})))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		let body = body_json(response).await;
		assert_eq!(body["data"]["underAttack"], false);
	}

	#[tokio::test]
	async fn test_top_activity_reflects_tracking() {
		let (app, warden) = app().await;
		let ctx = crate::warden::RequestContext {
			ip: "1.2.3.4".parse().unwrap(),
			endpoint: "/x",
			method: "GET",
			user_agent: None,
			user_id: None,
		};
		warden.check_request(TnId(1), &ctx).await;

		let response = app.oneshot(get_req("/1/activity/top?window=60&limit=5")).await.unwrap();
		let body = body_json(response).await;
		assert_eq!(body["data"][0]["ip"], "1.2.3.4");
		assert_eq!(body["data"][0]["requests"], 1);
	}
}

// vim: ts=4
