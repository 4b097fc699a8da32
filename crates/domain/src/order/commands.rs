//! Order commands.

use common::{MemberId, OrderId, ProductId};

/// Request to buy `quantity` units of one product.
#[derive(Debug, Clone, Copy)]
pub struct PlaceOrder {
    pub member_id: MemberId,
    pub product_id: ProductId,
    pub quantity: u32,
}

impl PlaceOrder {
    pub fn new(member_id: MemberId, product_id: ProductId, quantity: u32) -> Self {
        Self {
            member_id,
            product_id,
            quantity,
        }
    }
}

/// Request by a member to cancel one of their orders.
#[derive(Debug, Clone, Copy)]
pub struct CancelOrder {
    pub member_id: MemberId,
    pub order_id: OrderId,
}

impl CancelOrder {
    pub fn new(member_id: MemberId, order_id: OrderId) -> Self {
        Self {
            member_id,
            order_id,
        }
    }
}
