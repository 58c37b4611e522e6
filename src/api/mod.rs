//! HTTP control plane
//!
//! Inbound JSON operations for makers and resolvers, plus health,
//! readiness, and stats. Every operation fails fast with a typed status;
//! partial state never leaks to the caller.

use crate::chain::ChainGateway;
use crate::config::ApiConfig;
use crate::error::{ChainError, CoordinatorError, CoordinatorResult};
use crate::lifecycle::LifecycleController;
use crate::model::{Order, Secret, SwapIntent};
use crate::store::OrderStore;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use ethers::types::{Address, Signature, H256, U256};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<LifecycleController>,
    pub store: Arc<dyn OrderStore>,
    pub gateway: Arc<dyn ChainGateway>,
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> CoordinatorResult<()> {
    let app = Router::new()
        .route("/swaps", post(create_swap).get(active_orders))
        .route("/swaps/:id", get(order_status))
        .route("/swaps/:id/commit", post(commit_resolver))
        .route("/swaps/:id/escrows", post(escrows_ready))
        .route("/swaps/:id/settlement", post(notify_settlement))
        .route("/swaps/:id/rescue", post(rescue_order))
        .route("/swaps/:id/price", get(auction_price))
        .route("/swaps/:id/secret", get(order_secret))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/stats", get(get_stats))
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CoordinatorError::Internal(format!("api bind failed: {e}")))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| CoordinatorError::Internal(format!("api server failed: {e}")))?;

    Ok(())
}

// Error mapping

struct ApiError(CoordinatorError);

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoordinatorError::Malformed(_) | CoordinatorError::HashMismatch => {
                StatusCode::BAD_REQUEST
            }
            CoordinatorError::BadSignature { .. } => StatusCode::UNAUTHORIZED,
            CoordinatorError::NotCommittedResolver { .. } => StatusCode::FORBIDDEN,
            CoordinatorError::OrderNotFound { .. } => StatusCode::NOT_FOUND,
            CoordinatorError::AllowanceTooLow { .. }
            | CoordinatorError::DuplicateOrder { .. }
            | CoordinatorError::WrongStatus { .. }
            | CoordinatorError::SecretNotRevealed { .. } => StatusCode::CONFLICT,
            CoordinatorError::PriceOutOfBand { .. }
            | CoordinatorError::MarketBelowMinimum { .. }
            | CoordinatorError::EscrowUnderfunded { .. }
            | CoordinatorError::NoMarketPrice { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CoordinatorError::Chain(ChainError::UnknownChain { .. }) => StatusCode::BAD_REQUEST,
            CoordinatorError::Chain(ChainError::InsufficientAllowance { .. }) => {
                StatusCode::CONFLICT
            }
            CoordinatorError::Chain(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn parse_order_id(raw: &str) -> Result<H256, ApiError> {
    H256::from_str(raw)
        .map_err(|_| CoordinatorError::Malformed(format!("invalid order id `{raw}`")).into())
}

fn parse_signature(raw: &str) -> Result<Signature, ApiError> {
    Signature::from_str(raw.strip_prefix("0x").unwrap_or(raw))
        .map_err(|_| CoordinatorError::Malformed("invalid signature encoding".into()).into())
}

// Request / response types

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSwapRequest {
    intent: SwapIntent,
    signature: String,
    preimage: Secret,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSwapResponse {
    order_id: H256,
    market_price: U256,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitRequest {
    resolver: Address,
    accepted_price: U256,
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    success: bool,
    current_price: U256,
    expected_dst_amount: U256,
    commitment_deadline: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EscrowsReadyRequest {
    resolver: Address,
    src_escrow: Address,
    dst_escrow: Address,
    src_deposit_tx: H256,
    dst_deposit_tx: H256,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotifySettlementRequest {
    resolver: Address,
    dst_token_amount: U256,
    dst_tx_hash: H256,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RescueRequest {
    resolver: Address,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RescueResponse {
    success: bool,
    original_resolver: Address,
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Deserialize)]
struct SecretQuery {
    resolver: Address,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SecretResponse {
    reveal_tx_hash: Option<H256>,
    revealed_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuctionPriceResponse {
    current_price: U256,
    maker_amount: U256,
    taker_amount: U256,
    time_remaining_secs: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveOrderView {
    current_price: U256,
    order: Order,
}

// Handlers

async fn create_swap(
    State(state): State<AppState>,
    Json(req): Json<CreateSwapRequest>,
) -> Result<Json<CreateSwapResponse>, ApiError> {
    let signature = parse_signature(&req.signature)?;
    let admitted = state
        .controller
        .admit(req.intent, signature, req.preimage)
        .await?;

    Ok(Json(CreateSwapResponse {
        order_id: admitted.order_id,
        market_price: admitted.market_price,
        expires_at: admitted.expires_at,
    }))
}

async fn commit_resolver(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CommitRequest>,
) -> Result<Json<CommitResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let now = req.timestamp.unwrap_or_else(Utc::now);
    let receipt = state
        .controller
        .commit(order_id, req.resolver, req.accepted_price, now)
        .await?;

    Ok(Json(CommitResponse {
        success: true,
        current_price: receipt.current_price,
        expected_dst_amount: receipt.taker_amount,
        commitment_deadline: receipt.commitment_deadline,
    }))
}

async fn escrows_ready(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<EscrowsReadyRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    state
        .controller
        .escrows_ready(
            order_id,
            req.resolver,
            req.src_escrow,
            req.dst_escrow,
            req.src_deposit_tx,
            req.dst_deposit_tx,
        )
        .await?;

    Ok(Json(SuccessResponse { success: true }))
}

async fn notify_settlement(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<NotifySettlementRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    state
        .controller
        .notify_settlement(order_id, req.resolver, req.dst_token_amount, req.dst_tx_hash)
        .await?;

    Ok(Json(SuccessResponse { success: true }))
}

async fn rescue_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RescueRequest>,
) -> Result<Json<RescueResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let rescued = state.controller.rescue(order_id, req.resolver).await?;

    Ok(Json(RescueResponse {
        success: true,
        original_resolver: rescued.original_resolver,
    }))
}

async fn order_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .store
        .get(order_id)
        .await?
        .ok_or(CoordinatorError::OrderNotFound { order_id })?;
    Ok(Json(order))
}

async fn auction_price(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AuctionPriceResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let quote = state.controller.auction_quote(order_id).await?;

    Ok(Json(AuctionPriceResponse {
        current_price: quote.current_price,
        maker_amount: quote.maker_amount,
        taker_amount: quote.taker_amount,
        time_remaining_secs: quote.time_remaining_secs,
    }))
}

async fn active_orders(
    State(state): State<AppState>,
) -> Result<Json<Vec<ActiveOrderView>>, ApiError> {
    let orders = state.controller.broadcastable_orders().await?;
    Ok(Json(
        orders
            .into_iter()
            .map(|(order, current_price)| ActiveOrderView {
                current_price,
                order,
            })
            .collect(),
    ))
}

async fn order_secret(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SecretQuery>,
) -> Result<Json<SecretResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let info = state
        .controller
        .order_secret(order_id, query.resolver)
        .await?;

    Ok(Json(SecretResponse {
        reveal_tx_hash: info.reveal_tx_hash,
        revealed_at: info.revealed_at,
    }))
}

// Health and monitoring (same surface the rest of the fleet scrapes)

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
    chains: bool,
    details: Vec<ChainHealth>,
}

async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.store.health_check().await.is_ok();

    let chain_health = state.gateway.health_check().await;
    let chains_ok = chain_health.iter().all(|(_, healthy)| *healthy);

    let body = ReadinessResponse {
        ready: db_ok && chains_ok,
        database: db_ok,
        chains: chains_ok,
        details: chain_health
            .into_iter()
            .map(|(id, h)| ChainHealth {
                chain_id: id,
                healthy: h,
            })
            .collect(),
    };

    let status = if body.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<crate::model::OrderStats>, ApiError> {
    Ok(Json(state.store.stats().await?))
}
