//! Minimal server wiring the whole guard stack end to end: sqlite
//! adapter, [`Warden`], admission middleware, admin API, and the
//! background sweeper.
//!
//! Environment:
//! - `DB_DIR`        directory for the database (default `./data`)
//! - `LISTEN`        listen address (default `127.0.0.1:8080`)
//! - `TENANT_HEADER` header carrying the tenant id (default `x-tenant-id`)
//!
//! Log output follows `RUST_LOG`, e.g. `RUST_LOG=info,warden_core=debug`.

use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::{env, path};

use warden_core::admin::admin_routes;
use warden_core::prelude::*;
use warden_core::{
	guard_middleware, GuardMiddlewareConfig, GuardState, Sweeper, SweeperConfig, Warden,
};
use warden_guard_adapter_sqlite::GuardAdapterSqlite;

pub struct Config {
	pub db_dir: path::PathBuf,
	pub listen: String,
	pub tenant_header: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> WdResult<()> {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_target(false)
		.init();

	let config = Config {
		db_dir: path::PathBuf::from(env::var("DB_DIR").unwrap_or_else(|_| "./data".into())),
		listen: env::var("LISTEN").unwrap_or_else(|_| "127.0.0.1:8080".into()),
		tenant_header: env::var("TENANT_HEADER").unwrap_or_else(|_| "x-tenant-id".into()),
	};

	tokio::fs::create_dir_all(&config.db_dir).await.map_err(|err| {
		Error::Internal(format!("cannot create {}: {}", config.db_dir.display(), err).into())
	})?;

	let adapter = Arc::new(GuardAdapterSqlite::new(config.db_dir.join("guard.db")).await?);
	let warden = Arc::new(Warden::new(adapter));
	warden.init().await?;

	let guard_state = GuardState {
		warden: warden.clone(),
		config: GuardMiddlewareConfig {
			tenant_header: config.tenant_header.into(),
			..GuardMiddlewareConfig::default()
		},
	};

	// Admin routes are mounted outside the guard layer; put your own
	// authorization in front of them.
	let app = Router::new()
		.route("/api/things", get(list_things))
		.layer(axum::middleware::from_fn_with_state(guard_state, guard_middleware))
		.nest("/api/guard", admin_routes().with_state(warden.clone()));

	let _sweeper = Sweeper::spawn(warden, SweeperConfig::default());

	let listener = tokio::net::TcpListener::bind(&config.listen)
		.await
		.map_err(|err| Error::ServiceUnavailable(format!("cannot bind {}: {}", config.listen, err)))?;
	info!("Listening on {}", config.listen);

	axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
		.with_graceful_shutdown(shutdown_signal())
		.await
		.map_err(|err| Error::Internal(format!("server error: {}", err).into()))?;

	Ok(())
}

async fn list_things() -> &'static str {
	"guarded resource\n"
}

async fn shutdown_signal() {
	let _ = tokio::signal::ctrl_c().await;
	info!("Shutting down");
}

// vim: ts=4
