//! HTTP server for the orders API.
//!
//! Builds the axum router, binds the listener and runs until the process is
//! asked to stop, then drains in-flight requests for at most the configured
//! shutdown timeout.

use crate::apis::order;
use axum::{routing::get, Router};
use orders_config::ApiConfig;
use orders_core::OrderService;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	/// Order operations.
	pub service: OrderService,
	/// API settings, for page size limits.
	pub api: Arc<ApiConfig>,
}

/// Builds the router with every orders endpoint.
pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/orders", get(order::list_orders).post(order::create_order))
		.route(
			"/orders/{id}",
			get(order::get_order)
				.put(order::update_order)
				.delete(order::delete_order),
		)
		.route("/health", get(order::health))
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive()),
		)
		.with_state(state)
}

/// Serves the API until Ctrl+C, then shuts down gracefully.
pub async fn start_server(
	api_config: ApiConfig,
	service: OrderService,
) -> Result<(), Box<dyn std::error::Error>> {
	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let shutdown_timeout = Duration::from_secs(api_config.shutdown_timeout_seconds);
	let app = router(AppState {
		service,
		api: Arc::new(api_config),
	});

	let listener = TcpListener::bind(&bind_address).await?;
	tracing::info!("Orders API server starting on {}", bind_address);

	let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
	let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
		let _ = stop_rx.await;
	});
	let mut server = tokio::spawn(serve.into_future());

	tokio::select! {
		result = &mut server => {
			// The server stopped on its own, before any signal.
			result??;
			return Ok(());
		}
		_ = shutdown_signal() => {}
	}

	tracing::info!(
		timeout_seconds = shutdown_timeout.as_secs(),
		"Shutting down, draining in-flight requests"
	);
	let _ = stop_tx.send(());

	match tokio::time::timeout(shutdown_timeout, &mut server).await {
		Ok(result) => result??,
		Err(_) => {
			tracing::warn!("Shutdown timeout elapsed, dropping remaining connections");
			server.abort();
		},
	}

	Ok(())
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		tracing::error!(error = %e, "Failed to listen for shutdown signal");
		std::future::pending::<()>().await;
	}
}
