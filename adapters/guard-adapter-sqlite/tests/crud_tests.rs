//! Guard adapter CRUD operation tests
//!
//! Exercises every table group against a throwaway on-disk database:
//! configuration, buckets, blocks, whitelist, and violations.

use std::net::IpAddr;
use tempfile::TempDir;

use warden::guard_adapter::{
	BlockType, BlockedIp, GuardAdapter, GuardConfig, IdentityKind, LimitType,
	ListViolationsOptions, RateBucket, UpdateGuardConfig, Violation, WhitelistEntry,
};
use warden::types::{Timestamp, TnId};
use warden_guard_adapter_sqlite::GuardAdapterSqlite;

const T1: TnId = TnId(1);

async fn create_test_adapter() -> (GuardAdapterSqlite, TempDir) {
	let temp_dir = TempDir::new().expect("Failed to create temp directory");

	let adapter = GuardAdapterSqlite::new(temp_dir.path().join("guard.db"))
		.await
		.expect("Failed to create adapter");

	(adapter, temp_dir)
}

fn bucket(identifier: &str, endpoint: Option<&str>, window_start: i64) -> RateBucket {
	RateBucket {
		tn_id: T1,
		identifier: identifier.into(),
		kind: IdentityKind::Ip,
		endpoint: endpoint.map(Into::into),
		tokens_remaining: 42,
		last_refill: window_start * 1000,
		requests_count: 7,
		window_start: Timestamp(window_start),
	}
}

fn block(ip: &str, expires_at: Option<i64>) -> BlockedIp {
	BlockedIp {
		tn_id: T1,
		ip: ip.parse().expect("bad test IP"),
		reason: "Too many failed login attempts".into(),
		block_type: BlockType::BruteForce,
		blocked_at: Timestamp(1_700_000_000),
		expires_at: expires_at.map(Timestamp),
		blocked_by: "system".into(),
		auto_blocked: true,
		violation_count: 1,
	}
}

fn violation(at: i64, limit_type: LimitType, ip: &str) -> Violation {
	Violation {
		tn_id: T1,
		identifier: ip.into(),
		kind: IdentityKind::Ip,
		ip: Some(ip.parse().expect("bad test IP")),
		endpoint: Some("/api/login".into()),
		method: Some("POST".into()),
		limit_type,
		current_rate: 12.5,
		limit_rate: 5.0,
		created_at: Timestamp(at),
		action_taken: "auto_blocked".into(),
	}
}

// Configuration //
//***************//

#[tokio::test]
async fn test_create_and_read_config() {
	let (adapter, _temp) = create_test_adapter().await;

	assert!(adapter.read_config(T1).await.is_err(), "missing tenant should not read");

	let config = GuardConfig { ip_limit: 50, ..GuardConfig::default() };
	adapter.create_config(T1, &config).await.expect("Should create config");

	let read = adapter.read_config(T1).await.expect("Should read config back");
	assert_eq!(read.ip_limit, 50);
	assert_eq!(read.ddos_threshold, config.ddos_threshold);

	// creating again keeps the existing row
	adapter.create_config(T1, &GuardConfig::default()).await.expect("Should be a no-op");
	assert_eq!(adapter.read_config(T1).await.expect("Should read config").ip_limit, 50);
}

#[tokio::test]
async fn test_update_config_is_partial() {
	let (adapter, _temp) = create_test_adapter().await;
	adapter.create_config(T1, &GuardConfig::default()).await.expect("Should create config");

	let update = UpdateGuardConfig {
		enabled: Some(false),
		brute_force_attempts: Some(3),
		..UpdateGuardConfig::default()
	};
	let updated = adapter.update_config(T1, &update).await.expect("Should update config");

	assert!(!updated.enabled);
	assert_eq!(updated.brute_force_attempts, 3);
	assert_eq!(updated.ip_limit, GuardConfig::default().ip_limit);

	let read = adapter.read_config(T1).await.expect("Should read config");
	assert!(!read.enabled);
}

#[tokio::test]
async fn test_list_tenants_is_sorted() {
	let (adapter, _temp) = create_test_adapter().await;
	for id in [3u32, 1, 2] {
		adapter
			.create_config(TnId(id), &GuardConfig::default())
			.await
			.expect("Should create config");
	}

	let tenants = adapter.list_tenants().await.expect("Should list tenants");
	assert_eq!(tenants, vec![TnId(1), TnId(2), TnId(3)]);
}

// Rate-limit buckets //
//********************//

#[tokio::test]
async fn test_bucket_round_trip_with_and_without_endpoint() {
	let (adapter, _temp) = create_test_adapter().await;

	adapter.put_bucket(&bucket("1.2.3.4", None, 100)).await.expect("Should put bucket");
	adapter
		.put_bucket(&bucket("1.2.3.4", Some("/api/login"), 100))
		.await
		.expect("Should put bucket");

	let plain = adapter
		.read_bucket(T1, "1.2.3.4", IdentityKind::Ip, None)
		.await
		.expect("Should read identity-wide bucket");
	assert_eq!(plain.endpoint, None);
	assert_eq!(plain.tokens_remaining, 42);
	assert_eq!(plain.window_start, Timestamp(100));

	let scoped = adapter
		.read_bucket(T1, "1.2.3.4", IdentityKind::Ip, Some("/api/login"))
		.await
		.expect("Should read endpoint bucket");
	assert_eq!(scoped.endpoint.as_deref(), Some("/api/login"));

	// replace keeps the identity unique
	let drained = RateBucket { tokens_remaining: 0, ..bucket("1.2.3.4", None, 160) };
	adapter.put_bucket(&drained).await.expect("Should replace bucket");
	let read = adapter
		.read_bucket(T1, "1.2.3.4", IdentityKind::Ip, None)
		.await
		.expect("Should read bucket");
	assert_eq!(read.tokens_remaining, 0);
	assert_eq!(read.window_start, Timestamp(160));
}

#[tokio::test]
async fn test_delete_buckets_scopes_by_endpoint() {
	let (adapter, _temp) = create_test_adapter().await;
	for endpoint in [None, Some("/api/a"), Some("/api/b")] {
		adapter.put_bucket(&bucket("1.2.3.4", endpoint, 100)).await.expect("Should put bucket");
	}

	let removed = adapter
		.delete_buckets(T1, "1.2.3.4", IdentityKind::Ip, Some("/api/a"))
		.await
		.expect("Should delete one bucket");
	assert_eq!(removed, 1);

	let removed = adapter
		.delete_buckets(T1, "1.2.3.4", IdentityKind::Ip, None)
		.await
		.expect("Should delete the rest");
	assert_eq!(removed, 2);

	assert!(adapter.read_bucket(T1, "1.2.3.4", IdentityKind::Ip, None).await.is_err());
}

#[tokio::test]
async fn test_bucket_stats_group_by_kind() {
	let (adapter, _temp) = create_test_adapter().await;

	adapter.put_bucket(&bucket("1.2.3.4", None, 100)).await.expect("Should put bucket");
	adapter.put_bucket(&bucket("5.6.7.8", None, 100)).await.expect("Should put bucket");
	adapter
		.put_bucket(&RateBucket {
			kind: IdentityKind::User,
			..bucket("alice", None, 100)
		})
		.await
		.expect("Should put bucket");

	let stats = adapter.bucket_stats(T1, None).await.expect("Should aggregate");
	assert_eq!(stats.len(), 2);
	let ip_stats = stats
		.iter()
		.find(|s| s.kind == IdentityKind::Ip)
		.expect("Should have an ip group");
	assert_eq!(ip_stats.identities, 2);
	assert_eq!(ip_stats.total_requests, 14);
	assert!((ip_stats.avg_tokens_remaining - 42.0).abs() < f64::EPSILON);

	let only_users = adapter
		.bucket_stats(T1, Some(IdentityKind::User))
		.await
		.expect("Should filter by kind");
	assert_eq!(only_users.len(), 1);
	assert_eq!(only_users[0].identities, 1);
}

#[tokio::test]
async fn test_cleanup_buckets_uses_window_start() {
	let (adapter, _temp) = create_test_adapter().await;
	adapter.put_bucket(&bucket("1.2.3.4", None, 100)).await.expect("Should put bucket");
	adapter.put_bucket(&bucket("5.6.7.8", None, 500)).await.expect("Should put bucket");

	let removed = adapter.cleanup_buckets(T1, Timestamp(200)).await.expect("Should clean up");
	assert_eq!(removed, 1);
	assert!(adapter.read_bucket(T1, "5.6.7.8", IdentityKind::Ip, None).await.is_ok());
}

// Blocked IPs //
//*************//

#[tokio::test]
async fn test_upsert_block_escalates_violation_count() {
	let (adapter, _temp) = create_test_adapter().await;
	let b = block("10.0.0.1", Some(1_700_003_600));

	let first = adapter.upsert_block(&b).await.expect("Should insert block");
	assert!(first.created);
	assert_eq!(first.violation_count, 1);

	let again = adapter
		.upsert_block(&BlockedIp { expires_at: Some(Timestamp(1_700_007_200)), ..b })
		.await
		.expect("Should escalate block");
	assert!(!again.created);
	assert_eq!(again.violation_count, 2);

	let blocks = adapter.list_blocks(T1).await.expect("Should list blocks");
	assert_eq!(blocks.len(), 1);
	assert_eq!(blocks[0].violation_count, 2);
	assert_eq!(blocks[0].expires_at, Some(Timestamp(1_700_007_200)));
	assert_eq!(blocks[0].block_type, BlockType::BruteForce);
}

#[tokio::test]
async fn test_list_active_blocks_skips_expired() {
	let (adapter, _temp) = create_test_adapter().await;
	adapter.upsert_block(&block("10.0.0.1", Some(1_700_000_100))).await.expect("Should insert");
	adapter.upsert_block(&block("10.0.0.2", None)).await.expect("Should insert");

	let active = adapter
		.list_active_blocks(Timestamp(1_700_000_100))
		.await
		.expect("Should list active blocks");
	assert_eq!(active.len(), 1);
	assert_eq!(active[0].ip, "10.0.0.2".parse::<IpAddr>().expect("bad test IP"));

	// expired rows still show in the tenant listing
	assert_eq!(adapter.list_blocks(T1).await.expect("Should list blocks").len(), 2);
}

#[tokio::test]
async fn test_delete_block_reports_presence() {
	let (adapter, _temp) = create_test_adapter().await;
	adapter.upsert_block(&block("10.0.0.1", None)).await.expect("Should insert");

	let ip: IpAddr = "10.0.0.1".parse().expect("bad test IP");
	assert!(adapter.delete_block(T1, ip).await.expect("Should delete block"));
	assert!(!adapter.delete_block(T1, ip).await.expect("Should be a no-op"));
}

// Whitelist //
//***********//

#[tokio::test]
async fn test_whitelist_round_trip() {
	let (adapter, _temp) = create_test_adapter().await;
	let entry = WhitelistEntry {
		tn_id: T1,
		ip: "192.168.1.10".parse().expect("bad test IP"),
		description: Some("Office network".into()),
		added_by: "admin".into(),
		added_at: Timestamp(1_700_000_000),
		expires_at: Some(Timestamp(1_700_000_100)),
	};
	adapter.put_whitelist(&entry).await.expect("Should add whitelist entry");

	let listed = adapter.list_whitelist(T1).await.expect("Should list whitelist");
	assert_eq!(listed.len(), 1);
	assert_eq!(listed[0].description.as_deref(), Some("Office network"));

	// expired entries drop out of the active listing
	let active = adapter
		.list_active_whitelist(Timestamp(1_700_000_100))
		.await
		.expect("Should list active whitelist");
	assert!(active.is_empty());

	assert!(adapter.delete_whitelist(T1, entry.ip).await.expect("Should delete entry"));
	assert!(adapter.list_whitelist(T1).await.expect("Should list whitelist").is_empty());
}

// Violations //
//************//

#[tokio::test]
async fn test_list_violations_filters() {
	let (adapter, _temp) = create_test_adapter().await;
	adapter
		.insert_violation(&violation(1_700_000_100, LimitType::Rate, "1.2.3.4"))
		.await
		.expect("Should insert violation");
	adapter
		.insert_violation(&violation(1_700_000_200, LimitType::BruteForce, "1.2.3.4"))
		.await
		.expect("Should insert violation");
	adapter
		.insert_violation(&violation(1_700_000_300, LimitType::Rate, "5.6.7.8"))
		.await
		.expect("Should insert violation");

	let all = adapter
		.list_violations(T1, &ListViolationsOptions::default())
		.await
		.expect("Should list violations");
	assert_eq!(all.len(), 3);
	// newest first
	assert_eq!(all[0].created_at, Timestamp(1_700_000_300));
	assert_eq!(all[0].limit_type, LimitType::Rate);
	assert_eq!(all[0].endpoint.as_deref(), Some("/api/login"));

	let opts = ListViolationsOptions {
		limit_type: Some(LimitType::BruteForce),
		..ListViolationsOptions::default()
	};
	let brute = adapter.list_violations(T1, &opts).await.expect("Should filter by type");
	assert_eq!(brute.len(), 1);
	assert_eq!(brute[0].action_taken.as_ref(), "auto_blocked");

	let opts = ListViolationsOptions {
		ip: Some("1.2.3.4".parse().expect("bad test IP")),
		since: Some(Timestamp(1_700_000_150)),
		..ListViolationsOptions::default()
	};
	let scoped = adapter.list_violations(T1, &opts).await.expect("Should filter by ip and time");
	assert_eq!(scoped.len(), 1);
	assert_eq!(scoped[0].created_at, Timestamp(1_700_000_200));

	let opts = ListViolationsOptions { limit: Some(1), offset: Some(1), ..Default::default() };
	let page = adapter.list_violations(T1, &opts).await.expect("Should paginate");
	assert_eq!(page.len(), 1);
	assert_eq!(page[0].created_at, Timestamp(1_700_000_200));
}

// Housekeeping //
//**************//

#[tokio::test]
async fn test_delete_expired_counts_per_table() {
	let (adapter, _temp) = create_test_adapter().await;
	adapter.upsert_block(&block("10.0.0.1", Some(1_700_000_100))).await.expect("Should insert");
	adapter.upsert_block(&block("10.0.0.2", None)).await.expect("Should insert");
	adapter
		.put_whitelist(&WhitelistEntry {
			tn_id: T1,
			ip: "192.168.1.10".parse().expect("bad test IP"),
			description: None,
			added_by: "admin".into(),
			added_at: Timestamp(1_700_000_000),
			expires_at: Some(Timestamp(1_700_000_050)),
		})
		.await
		.expect("Should add whitelist entry");

	let counts = adapter.delete_expired(Timestamp(1_700_000_200)).await.expect("Should sweep");
	assert_eq!(counts.blocked, 1);
	assert_eq!(counts.whitelist, 1);

	// the permanent block survives the sweep
	let blocks = adapter.list_blocks(T1).await.expect("Should list blocks");
	assert_eq!(blocks.len(), 1);
	assert_eq!(blocks[0].expires_at, None);
}

// vim: ts=4
