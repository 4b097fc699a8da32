use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{MemberId, Money, OrderId, ProductId};
use tokio::sync::RwLock;

use super::{ShopStore, StoreError};
use crate::{
    Member, MemberOrderStats, Order, OrderFilter, OrderStatus, Page, Payment, Product, StatsFilter,
};

/// In-memory store for tests and single-instance runs.
///
/// Every write takes the single state lock, so each trait method is atomic
/// in the same way a database transaction is. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryShopStore {
    state: Arc<RwLock<State>>,
}

#[derive(Default)]
struct State {
    members: HashMap<MemberId, Member>,
    products: HashMap<ProductId, Product>,
    orders: HashMap<OrderId, Order>,
    /// Keyed by gateway payment key.
    payments: HashMap<String, Payment>,
    fail_on_insert_order: bool,
    fail_on_mark_payment_pending: bool,
    fail_on_complete_payment: bool,
}

impl InMemoryShopStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `insert_order` fail, as if storage were down.
    pub async fn set_fail_on_insert_order(&self, fail: bool) {
        self.state.write().await.fail_on_insert_order = fail;
    }

    /// Makes every `mark_payment_pending` fail, as if storage were down.
    pub async fn set_fail_on_mark_payment_pending(&self, fail: bool) {
        self.state.write().await.fail_on_mark_payment_pending = fail;
    }

    /// Makes every `complete_payment` fail, as if storage were down.
    pub async fn set_fail_on_complete_payment(&self, fail: bool) {
        self.state.write().await.fail_on_complete_payment = fail;
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.state.read().await.orders.values().cloned().collect()
    }
}

fn unavailable(operation: &str) -> StoreError {
    StoreError::Unavailable(format!("{operation} failed (simulated)"))
}

#[async_trait]
impl ShopStore for InMemoryShopStore {
    async fn save_member(&self, member: &Member) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .members
            .insert(member.id, member.clone());
        Ok(())
    }

    async fn find_member(&self, id: MemberId) -> Result<Option<Member>, StoreError> {
        Ok(self.state.read().await.members.get(&id).cloned())
    }

    async fn save_product(&self, product: &Product) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .products
            .insert(product.id, product.clone());
        Ok(())
    }

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.fail_on_insert_order {
            return Err(unavailable("insert_order"));
        }

        // Check every guard before touching anything so a failure leaves no trace.
        for line in order.lines() {
            let product = state
                .products
                .get(&line.product_id)
                .ok_or_else(|| StoreError::NotFound {
                    entity: "product",
                    id: line.product_id.to_string(),
                })?;
            if product.stock_quantity < line.quantity {
                return Err(StoreError::StockConflict {
                    product_id: line.product_id,
                });
            }
        }
        for line in order.lines() {
            if let Some(product) = state.products.get_mut(&line.product_id) {
                product.stock_quantity -= line.quantity;
            }
        }

        state.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn mark_payment_pending(
        &self,
        order_id: OrderId,
        payment_key: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.fail_on_mark_payment_pending {
            return Err(unavailable("mark_payment_pending"));
        }

        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::order_not_found(order_id))?;
        let status = order.status();
        order
            .await_payment(payment_key)
            .map_err(|_| StoreError::StaleState { order_id, status })
    }

    async fn cancel_order(&self, order_id: OrderId) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;

        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::order_not_found(order_id))?;
        if order.status() == OrderStatus::Canceled {
            return Ok(false);
        }
        let status = order.status();
        order
            .cancel()
            .map_err(|_| StoreError::StaleState { order_id, status })?;
        let lines = order.lines().to_vec();

        for line in lines {
            if let Some(product) = state.products.get_mut(&line.product_id) {
                product.add_stock(line.quantity);
            }
        }
        Ok(true)
    }

    async fn complete_payment(&self, payment: &Payment) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if state.fail_on_complete_payment {
            return Err(unavailable("complete_payment"));
        }

        if state.payments.contains_key(&payment.payment_key) {
            return Ok(false);
        }
        if state
            .payments
            .values()
            .any(|existing| existing.order_id == payment.order_id)
        {
            return Err(StoreError::DuplicatePayment {
                order_id: payment.order_id,
            });
        }

        let order = state
            .orders
            .get_mut(&payment.order_id)
            .ok_or_else(|| StoreError::order_not_found(payment.order_id))?;
        let status = order.status();
        order
            .complete(&payment.payment_key)
            .map_err(|_| StoreError::StaleState {
                order_id: payment.order_id,
                status,
            })?;

        state
            .payments
            .insert(payment.payment_key.clone(), payment.clone());
        Ok(true)
    }

    async fn find_payment_by_key(&self, payment_key: &str) -> Result<Option<Payment>, StoreError> {
        Ok(self.state.read().await.payments.get(payment_key).cloned())
    }

    async fn find_payment_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .values()
            .find(|payment| payment.order_id == order_id)
            .cloned())
    }

    async fn list_payments(&self) -> Result<Vec<Payment>, StoreError> {
        let mut payments: Vec<Payment> =
            self.state.read().await.payments.values().cloned().collect();
        payments.sort_by_key(|payment| payment.requested_at);
        Ok(payments)
    }

    async fn find_unreconciled_orders(&self) -> Result<Vec<Order>, StoreError> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|order| {
                order.status() == OrderStatus::PaymentPending
                    && order.payment_key().is_some()
                    && !state
                        .payments
                        .values()
                        .any(|payment| payment.order_id == order.id())
            })
            .cloned()
            .collect();
        orders.sort_by_key(|order| order.ordered_at());
        Ok(orders)
    }

    async fn search_orders(&self, filter: &OrderFilter) -> Result<Page<Order>, StoreError> {
        let state = self.state.read().await;
        let mut matches: Vec<&Order> = state
            .orders
            .values()
            .filter(|order| {
                order.ordered_at() >= filter.from
                    && order.ordered_at() < filter.to
                    && filter.status.is_none_or(|status| order.status() == status)
                    && order.total_amount() >= filter.min_amount
            })
            .collect();
        matches.sort_by(|a, b| {
            b.ordered_at()
                .cmp(&a.ordered_at())
                .then_with(|| a.id().cmp(&b.id()))
        });

        let total = matches.len() as u64;
        let items = paged(matches, filter.page.offset(), filter.page.limit())
            .cloned()
            .collect();
        Ok(Page::new(items, filter.page, total))
    }

    async fn order_statistics(
        &self,
        filter: &StatsFilter,
    ) -> Result<Page<MemberOrderStats>, StoreError> {
        let state = self.state.read().await;
        let mut by_member: HashMap<MemberId, MemberOrderStats> = HashMap::new();

        for order in state.orders.values() {
            let Some(member) = state.members.get(&order.member_id()) else {
                continue;
            };
            let stats = by_member
                .entry(member.id)
                .or_insert_with(|| MemberOrderStats {
                    member_id: member.id,
                    email: member.email.clone(),
                    order_count: 0,
                    total_amount: Money::zero(),
                    average_amount: 0.0,
                    last_ordered_at: order.ordered_at(),
                });
            stats.order_count += 1;
            stats.total_amount += order.total_amount();
            stats.last_ordered_at = stats.last_ordered_at.max(order.ordered_at());
        }

        let mut rows: Vec<MemberOrderStats> = by_member
            .into_values()
            .filter(|stats| stats.total_amount >= filter.min_amount)
            .map(|mut stats| {
                stats.average_amount = stats.total_amount.amount() as f64 / stats.order_count as f64;
                stats
            })
            .collect();
        rows.sort_by(|a, b| {
            b.total_amount
                .cmp(&a.total_amount)
                .then_with(|| a.member_id.cmp(&b.member_id))
        });

        let total = rows.len() as u64;
        let items = paged(rows, filter.page.offset(), filter.page.limit()).collect();
        Ok(Page::new(items, filter.page, total))
    }
}

fn paged<T>(items: Vec<T>, offset: u64, limit: u64) -> impl Iterator<Item = T> {
    let offset = usize::try_from(offset).unwrap_or(usize::MAX);
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    items.into_iter().skip(offset).take(limit)
}
