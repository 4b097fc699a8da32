//! Products and their stock counter.

use common::{Money, ProductId};
use serde::{Deserialize, Serialize};

use crate::order::OrderError;

/// Whether a product can currently be sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SellStatus {
    Sell,
    SoldOut,
}

/// A catalog product with its stock.
///
/// `stock_quantity` is unsigned, so the non-negative invariant holds by
/// construction; [`Product::remove_stock`] refuses to go below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub stock_quantity: u32,
    pub description: String,
}

impl Product {
    pub fn new(name: impl Into<String>, price: Money, stock_quantity: u32) -> Self {
        Self {
            id: ProductId::new(),
            name: name.into(),
            price,
            stock_quantity,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn sell_status(&self) -> SellStatus {
        if self.stock_quantity == 0 {
            SellStatus::SoldOut
        } else {
            SellStatus::Sell
        }
    }

    /// Takes `quantity` units out of stock.
    ///
    /// Check and decrement are one step here, but across tasks they are only
    /// safe while the product's lock is held.
    pub fn remove_stock(&mut self, quantity: u32) -> Result<(), OrderError> {
        match self.stock_quantity.checked_sub(quantity) {
            Some(rest) => {
                self.stock_quantity = rest;
                Ok(())
            }
            None => Err(OrderError::InsufficientStock {
                product_id: self.id,
                requested: quantity,
                available: self.stock_quantity,
            }),
        }
    }

    /// Puts `quantity` units back, e.g. when an order is cancelled.
    pub fn add_stock(&mut self, quantity: u32) {
        self.stock_quantity = self.stock_quantity.saturating_add(quantity);
    }
}
