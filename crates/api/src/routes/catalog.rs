//! Member and product registration, plus product lookup.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{Money, ProductId};
use domain::{Member, OrderError, Product, ShopStore};
use lock::LockService;
use saga::PaymentGateway;
use serde::{Deserialize, Serialize};

use super::{AppState, parse_id};
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct RegisterMemberRequest {
    pub email: String,
    pub name: String,
}

#[derive(Deserialize)]
pub struct RegisterProductRequest {
    pub name: String,
    pub price: i64,
    pub stock_quantity: u32,
    #[serde(default)]
    pub description: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct MemberResponse {
    pub id: String,
    pub email: String,
    pub name: String,
}

impl From<&Member> for MemberResponse {
    fn from(member: &Member) -> Self {
        Self {
            id: member.id.to_string(),
            email: member.email.clone(),
            name: member.name.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub price: i64,
    pub stock_quantity: u32,
    pub sell_status: domain::SellStatus,
    pub description: String,
}

impl From<&Product> for ProductResponse {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id.to_string(),
            name: product.name.clone(),
            price: product.price.amount(),
            stock_quantity: product.stock_quantity,
            sell_status: product.sell_status(),
            description: product.description.clone(),
        }
    }
}

// -- Handlers --

/// POST /members: register a member.
#[tracing::instrument(skip(state, req))]
pub async fn register_member<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Json(req): Json<RegisterMemberRequest>,
) -> Result<(StatusCode, Json<MemberResponse>), ApiError>
where
    S: ShopStore + 'static,
    L: LockService + Clone + 'static,
    G: PaymentGateway + 'static,
{
    if req.email.trim().is_empty() {
        return Err(ApiError::BadRequest("email must not be empty".to_string()));
    }

    let member = Member::new(req.email.trim(), req.name);
    state.store().save_member(&member).await?;
    tracing::info!(member_id = %member.id, "member registered");

    Ok((StatusCode::CREATED, Json(MemberResponse::from(&member))))
}

/// POST /products: add a product with its opening stock.
#[tracing::instrument(skip(state, req))]
pub async fn register_product<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Json(req): Json<RegisterProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), ApiError>
where
    S: ShopStore + 'static,
    L: LockService + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let price = Money::new(req.price);
    if !price.is_positive() {
        return Err(ApiError::BadRequest("price must be greater than 0".to_string()));
    }

    let product =
        Product::new(req.name, price, req.stock_quantity).with_description(req.description);
    state.store().save_product(&product).await?;
    tracing::info!(product_id = %product.id, stock = product.stock_quantity, "product registered");

    Ok((StatusCode::CREATED, Json(ProductResponse::from(&product))))
}

/// GET /products/{id}: current price and stock of a product.
#[tracing::instrument(skip(state))]
pub async fn get_product<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, ApiError>
where
    S: ShopStore + 'static,
    L: LockService + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let product_id: ProductId = parse_id("product", &id)?;
    let product = state
        .store()
        .find_product(product_id)
        .await?
        .ok_or(OrderError::ProductNotFound(product_id))?;

    Ok(Json(ProductResponse::from(&product)))
}
