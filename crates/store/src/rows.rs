//! Row decoding and error mapping.

use common::{MemberId, Money, OrderId, PaymentId, ProductId};
use domain::{
    Member, MemberOrderStats, Order, OrderLine, OrderRecord, OrderStatus, Payment, PaymentStatus,
    Product, StoreError,
};
use sqlx::{Row, postgres::PgRow};
use uuid::Uuid;

pub(crate) fn database(e: sqlx::Error) -> StoreError {
    StoreError::Database(Box::new(e))
}

fn corrupt(message: String) -> StoreError {
    StoreError::Database(message.into())
}

fn quantity(value: i64, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| corrupt(format!("{column} out of range: {value}")))
}

pub(crate) fn count(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| corrupt(format!("negative count: {value}")))
}

/// A LIMIT or OFFSET value as Postgres takes it.
pub(crate) fn page_bound(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| corrupt(format!("page bound out of range: {value}")))
}

pub(crate) fn member(row: PgRow) -> Result<Member, StoreError> {
    Ok(Member {
        id: MemberId::from_uuid(row.try_get::<Uuid, _>("id").map_err(database)?),
        email: row.try_get("email").map_err(database)?,
        name: row.try_get("name").map_err(database)?,
    })
}

pub(crate) fn product(row: PgRow) -> Result<Product, StoreError> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get::<Uuid, _>("id").map_err(database)?),
        name: row.try_get("name").map_err(database)?,
        price: Money::new(row.try_get("price").map_err(database)?),
        stock_quantity: quantity(
            row.try_get("stock_quantity").map_err(database)?,
            "stock_quantity",
        )?,
        description: row.try_get("description").map_err(database)?,
    })
}

pub(crate) fn order_status(value: &str) -> Result<OrderStatus, StoreError> {
    OrderStatus::parse(value).ok_or_else(|| corrupt(format!("unknown order status {value}")))
}

/// Decodes a line row together with the id of the order it belongs to.
pub(crate) fn order_line(row: &PgRow) -> Result<(Uuid, OrderLine), StoreError> {
    let order_id: Uuid = row.try_get("order_id").map_err(database)?;
    let line = OrderLine {
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id").map_err(database)?),
        product_name: row.try_get("product_name").map_err(database)?,
        order_price: Money::new(row.try_get("order_price").map_err(database)?),
        quantity: quantity(row.try_get("quantity").map_err(database)?, "quantity")?,
    };
    Ok((order_id, line))
}

pub(crate) fn order(row: &PgRow, lines: Vec<OrderLine>) -> Result<Order, StoreError> {
    let status: String = row.try_get("status").map_err(database)?;
    Ok(Order::from_record(OrderRecord {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id").map_err(database)?),
        order_number: row.try_get("order_number").map_err(database)?,
        order_name: row.try_get("order_name").map_err(database)?,
        member_id: MemberId::from_uuid(row.try_get::<Uuid, _>("member_id").map_err(database)?),
        email: row.try_get("email").map_err(database)?,
        status: order_status(&status)?,
        payment_key: row.try_get("payment_key").map_err(database)?,
        ordered_at: row.try_get("ordered_at").map_err(database)?,
        lines,
    }))
}

pub(crate) fn payment(row: PgRow) -> Result<Payment, StoreError> {
    let status: String = row.try_get("status").map_err(database)?;
    Ok(Payment {
        id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id").map_err(database)?),
        payment_key: row.try_get("payment_key").map_err(database)?,
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id").map_err(database)?),
        order_name: row.try_get("order_name").map_err(database)?,
        method: row.try_get("method").map_err(database)?,
        total_amount: Money::new(row.try_get("total_amount").map_err(database)?),
        status: PaymentStatus::parse(&status),
        requested_at: row.try_get("requested_at").map_err(database)?,
    })
}

pub(crate) fn member_order_stats(row: PgRow) -> Result<MemberOrderStats, StoreError> {
    Ok(MemberOrderStats {
        member_id: MemberId::from_uuid(row.try_get::<Uuid, _>("member_id").map_err(database)?),
        email: row.try_get("email").map_err(database)?,
        order_count: count(row.try_get("order_count").map_err(database)?)?,
        total_amount: Money::new(row.try_get("total_amount").map_err(database)?),
        average_amount: row.try_get("average_amount").map_err(database)?,
        last_ordered_at: row.try_get("last_ordered_at").map_err(database)?,
    })
}
