//! Orders API handlers.
//!
//! Thin adapters between HTTP and [`orders_core::OrderService`]: decode the
//! request, call the service, and map failures onto status codes. Domain
//! failures become 4xx responses; anything else is logged and reported as an
//! opaque 500.

use crate::server::AppState;
use axum::{
	extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
	http::StatusCode,
	response::Json,
};
use orders_core::{OrderServiceError, RepositoryError};
use orders_types::{
	APIError, CreateOrderRequest, HealthResponse, ListOrdersQuery, ListOrdersResponse, OrderId,
	OrderResponse, StatusUpdate, TransitionError, UpdateOrderRequest,
};
use thiserror::Error;

/// Errors that can occur while serving an orders request.
#[derive(Debug, Error)]
pub enum OrderApiError {
	#[error("Invalid order id: {0}")]
	InvalidId(String),
	#[error("Invalid cursor: {0}")]
	InvalidCursor(String),
	#[error("Invalid page size: {0}")]
	InvalidPageSize(String),
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
	#[error(transparent)]
	Service(#[from] OrderServiceError),
}

impl OrderApiError {
	/// Whether the failure was caused by the request rather than the server.
	fn is_client_error(&self) -> bool {
		match self {
			OrderApiError::Service(OrderServiceError::Repository(e)) => e.is_not_found(),
			_ => true,
		}
	}
}

impl From<OrderApiError> for APIError {
	fn from(err: OrderApiError) -> Self {
		let message = err.to_string();
		match err {
			OrderApiError::InvalidId(_) => APIError::bad_request("INVALID_ORDER_ID", message),
			OrderApiError::InvalidCursor(_) => APIError::bad_request("INVALID_CURSOR", message),
			OrderApiError::InvalidPageSize(_) => {
				APIError::bad_request("INVALID_PAGE_SIZE", message)
			},
			OrderApiError::InvalidRequest(_) => APIError::bad_request("INVALID_REQUEST", message),
			OrderApiError::Service(OrderServiceError::Transition(
				TransitionError::UnknownStatus(_),
			)) => APIError::BadRequest {
				error_type: "INVALID_STATUS".to_string(),
				message,
				details: Some(serde_json::json!({
					"allowed": StatusUpdate::ALL.map(|status| status.as_str()),
				})),
			},
			OrderApiError::Service(OrderServiceError::Transition(_)) => {
				APIError::bad_request("INVALID_TRANSITION", message)
			},
			OrderApiError::Service(OrderServiceError::Repository(RepositoryError::NotFound {
				..
			})) => APIError::NotFound {
				error_type: "ORDER_NOT_FOUND".to_string(),
				message: "Order not found".to_string(),
			},
			// Backend details stay in the logs.
			OrderApiError::Service(OrderServiceError::Repository(_)) => {
				APIError::InternalServerError {
					error_type: "INTERNAL_ERROR".to_string(),
					message: "Internal server error".to_string(),
				}
			},
		}
	}
}

/// Logs a failed request and converts it into its HTTP response.
fn reject(operation: &str, err: OrderApiError) -> APIError {
	if err.is_client_error() {
		tracing::warn!(operation, error = %err, "Order request rejected");
	} else {
		tracing::error!(operation, error = %err, "Order request failed");
	}
	APIError::from(err)
}

/// Parses plain decimal digits. `u64::from_str` alone would also take a sign.
fn parse_decimal(raw: &str) -> Option<u64> {
	if !raw.starts_with(|c: char| c.is_ascii_digit()) {
		return None;
	}
	raw.parse().ok()
}

fn parse_order_id(raw: &str) -> Result<OrderId, OrderApiError> {
	parse_decimal(raw)
		.map(OrderId)
		.ok_or_else(|| OrderApiError::InvalidId(format!("'{}' is not an unsigned integer", raw)))
}

/// Empty or missing cursor starts a new scan.
fn parse_cursor(raw: Option<&str>) -> Result<u64, OrderApiError> {
	match raw {
		None | Some("") => Ok(0),
		Some(value) => parse_decimal(value).ok_or_else(|| {
			OrderApiError::InvalidCursor(format!("'{}' is not an unsigned integer", value))
		}),
	}
}

fn parse_page_size(raw: Option<&str>, default: u64, max: u64) -> Result<u64, OrderApiError> {
	let size = match raw {
		None | Some("") => return Ok(default),
		Some(value) => parse_decimal(value).ok_or_else(|| {
			OrderApiError::InvalidPageSize(format!("'{}' is not an unsigned integer", value))
		})?,
	};
	if size == 0 || size > max {
		return Err(OrderApiError::InvalidPageSize(format!(
			"must be between 1 and {}",
			max
		)));
	}
	Ok(size)
}

/// Handles POST /orders.
pub async fn create_order(
	State(state): State<AppState>,
	payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), APIError> {
	let Json(request) = payload
		.map_err(|e| reject("create", OrderApiError::InvalidRequest(e.body_text())))?;

	let order = state
		.service
		.create(request.customer_id, request.line_items)
		.await
		.map_err(|e| reject("create", e.into()))?;
	Ok((StatusCode::CREATED, Json(order.into())))
}

/// Handles GET /orders.
pub async fn list_orders(
	State(state): State<AppState>,
	query: Result<Query<ListOrdersQuery>, QueryRejection>,
) -> Result<Json<ListOrdersResponse>, APIError> {
	let Query(query) =
		query.map_err(|e| reject("list", OrderApiError::InvalidRequest(e.body_text())))?;

	let cursor = parse_cursor(query.cursor.as_deref()).map_err(|e| reject("list", e))?;
	let size = parse_page_size(
		query.size.as_deref(),
		state.api.default_page_size,
		state.api.max_page_size,
	)
	.map_err(|e| reject("list", e))?;

	let page = state
		.service
		.list(cursor, size)
		.await
		.map_err(|e| reject("list", e.into()))?;
	Ok(Json(ListOrdersResponse {
		items: page.orders.into_iter().map(OrderResponse::from).collect(),
		next: page.cursor,
	}))
}

/// Handles GET /orders/{id}.
pub async fn get_order(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<OrderResponse>, APIError> {
	let id = parse_order_id(&id).map_err(|e| reject("get", e))?;
	let order = state
		.service
		.get(id)
		.await
		.map_err(|e| reject("get", e.into()))?;
	Ok(Json(order.into()))
}

/// Handles PUT /orders/{id}.
pub async fn update_order(
	State(state): State<AppState>,
	Path(id): Path<String>,
	payload: Result<Json<UpdateOrderRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, APIError> {
	let id = parse_order_id(&id).map_err(|e| reject("update", e))?;
	let Json(request) = payload
		.map_err(|e| reject("update", OrderApiError::InvalidRequest(e.body_text())))?;
	let update: StatusUpdate = request
		.status
		.parse()
		.map_err(|e: TransitionError| reject("update", OrderServiceError::from(e).into()))?;

	let order = state
		.service
		.update_status(id, update)
		.await
		.map_err(|e| reject("update", e.into()))?;
	Ok(Json(order.into()))
}

/// Handles DELETE /orders/{id}.
pub async fn delete_order(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<StatusCode, APIError> {
	let id = parse_order_id(&id).map_err(|e| reject("delete", e))?;
	state
		.service
		.delete(id)
		.await
		.map_err(|e| reject("delete", e.into()))?;
	Ok(StatusCode::NO_CONTENT)
}

/// Handles GET /health.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, APIError> {
	match state.service.health().await {
		Ok(()) => Ok(Json(HealthResponse {
			status: "ok".to_string(),
		})),
		Err(e) => {
			tracing::warn!(error = %e, "Health check failed");
			Err(APIError::ServiceUnavailable {
				error_type: "BACKEND_UNAVAILABLE".to_string(),
				message: "Storage backend is not reachable".to_string(),
			})
		},
	}
}
