//! Order placement, lookup, search, statistics and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{MemberId, Money, OrderId, ProductId};
use domain::{
    CancelOrder, MemberOrderStats, Order, OrderSearch, OrderStatus, Page, PageRequest, PlaceOrder,
    ShopStore, StatsFilter,
};
use lock::LockService;
use saga::{OrderPaymentInfo, PaymentGateway};
use serde::{Deserialize, Serialize};

use super::{AppState, parse_id};
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct PlaceOrderRequest {
    pub member_id: String,
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct CancelOrderRequest {
    pub member_id: String,
}

/// Query string of `GET /orders/{id}`.
#[derive(Deserialize)]
pub struct OrderOwnerQuery {
    pub member_id: String,
}

/// Query string of `GET /orders/search`. Dates are RFC 3339.
#[derive(Deserialize)]
pub struct SearchOrdersQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub year: Option<i32>,
    pub status: Option<OrderStatus>,
    pub min_amount: Option<i64>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

impl From<SearchOrdersQuery> for OrderSearch {
    fn from(query: SearchOrdersQuery) -> Self {
        OrderSearch {
            from: query.from,
            to: query.to,
            year: query.year,
            status: query.status,
            min_amount: query.min_amount.map(Money::new),
            page: PageRequest::new(query.page, query.size),
        }
    }
}

/// Query string of `GET /orders/stats`.
#[derive(Deserialize)]
pub struct OrderStatsQuery {
    pub min_amount: Option<i64>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub order_number: String,
    pub order_name: String,
    pub member_id: String,
    pub status: String,
    pub payment_key: Option<String>,
    pub lines: Vec<OrderLineResponse>,
    pub total_amount: i64,
    pub total_quantity: u32,
    pub ordered_at: String,
}

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub product_id: String,
    pub product_name: String,
    pub order_price: i64,
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct MemberOrderStatsResponse {
    pub member_id: String,
    pub email: String,
    pub order_count: u64,
    pub total_amount: i64,
    pub average_amount: f64,
    pub last_ordered_at: String,
}

impl From<MemberOrderStats> for MemberOrderStatsResponse {
    fn from(stats: MemberOrderStats) -> Self {
        Self {
            member_id: stats.member_id.to_string(),
            email: stats.email,
            order_count: stats.order_count,
            total_amount: stats.total_amount.amount(),
            average_amount: stats.average_amount,
            last_ordered_at: stats.last_ordered_at.to_rfc3339(),
        }
    }
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            order_number: order.order_number().to_string(),
            order_name: order.order_name().to_string(),
            member_id: order.member_id().to_string(),
            status: order.status().as_str().to_string(),
            payment_key: order.payment_key().map(String::from),
            lines: order
                .lines()
                .iter()
                .map(|line| OrderLineResponse {
                    product_id: line.product_id.to_string(),
                    product_name: line.product_name.clone(),
                    order_price: line.order_price.amount(),
                    quantity: line.quantity,
                })
                .collect(),
            total_amount: order.total_amount().amount(),
            total_quantity: order.total_quantity(),
            ordered_at: order.ordered_at().to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /orders: place an order for one product under its lock.
///
/// Gives up waiting for the lock after the configured request timeout.
#[tracing::instrument(skip(state, req), fields(product_id = %req.product_id, quantity = req.quantity))]
pub async fn place<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError>
where
    S: ShopStore + 'static,
    L: LockService + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let member_id: MemberId = parse_id("member", &req.member_id)?;
    let product_id: ProductId = parse_id("product", &req.product_id)?;

    let deadline = tokio::time::sleep(state.request_timeout);
    let order = state
        .orders
        .place_order_or_cancel(PlaceOrder::new(member_id, product_id, req.quantity), deadline)
        .await?;

    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders/{id}?member_id=: one of the member's orders with its lines.
#[tracing::instrument(skip(state, query))]
pub async fn get<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Path(id): Path<String>,
    Query(query): Query<OrderOwnerQuery>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: ShopStore + 'static,
    L: LockService + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let order_id: OrderId = parse_id("order", &id)?;
    let member_id: MemberId = parse_id("member", &query.member_id)?;
    let order = state
        .orders
        .orders()
        .get_order_for_member(member_id, order_id)
        .await?;

    Ok(Json(OrderResponse::from(&order)))
}

/// GET /orders/search: orders in a period, optionally narrowed by status
/// and minimum total. Defaults to the last six months.
#[tracing::instrument(skip(state, query))]
pub async fn search<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Query(query): Query<SearchOrdersQuery>,
) -> Result<Json<Page<OrderResponse>>, ApiError>
where
    S: ShopStore + 'static,
    L: LockService + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let page = state
        .orders
        .orders()
        .search_orders(&OrderSearch::from(query))
        .await?;

    Ok(Json(page.map(|order| OrderResponse::from(&order))))
}

/// GET /orders/stats: order count, total, average and latest order per
/// member whose orders add up to at least `min_amount`.
#[tracing::instrument(skip(state, query))]
pub async fn stats<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Query(query): Query<OrderStatsQuery>,
) -> Result<Json<Page<MemberOrderStatsResponse>>, ApiError>
where
    S: ShopStore + 'static,
    L: LockService + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let filter = StatsFilter::new(
        query.min_amount.map(Money::new),
        PageRequest::new(query.page, query.size),
    );
    let page = state.orders.orders().order_statistics(filter).await?;

    Ok(Json(page.map(MemberOrderStatsResponse::from)))
}

/// POST /orders/{id}/cancel: the owning member cancels the order and its
/// stock is returned.
#[tracing::instrument(skip(state, req))]
pub async fn cancel<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Path(id): Path<String>,
    Json(req): Json<CancelOrderRequest>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: ShopStore + 'static,
    L: LockService + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let order_id: OrderId = parse_id("order", &id)?;
    let member_id: MemberId = parse_id("member", &req.member_id)?;

    let order = state
        .orders
        .orders()
        .cancel_order(CancelOrder::new(member_id, order_id))
        .await?;

    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/payment: start checkout; returns what the payment
/// widget needs.
#[tracing::instrument(skip(state))]
pub async fn prepare_payment<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderPaymentInfo>, ApiError>
where
    S: ShopStore + 'static,
    L: LockService + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let order_id: OrderId = parse_id("order", &id)?;
    let info = state.payments.prepare_payment(order_id).await?;

    Ok(Json(info))
}
