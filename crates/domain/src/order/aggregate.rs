//! The order record and its transitions.

use chrono::{DateTime, Utc};
use common::{MemberId, Money, OrderId, ProductId};
use serde::{Deserialize, Serialize};

use super::{OrderError, OrderStatus};
use crate::{Member, Product};

/// One product line of an order, priced when the order was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub product_name: String,
    /// Unit price captured at order time.
    pub order_price: Money,
    pub quantity: u32,
}

impl OrderLine {
    /// Captures the product's current price for `quantity` units.
    pub fn snapshot(product: &Product, quantity: u32) -> Self {
        Self {
            product_id: product.id,
            product_name: product.name.clone(),
            order_price: product.price,
            quantity,
        }
    }

    /// `order_price * quantity`, or `None` if it does not fit in [`Money`].
    pub fn total_price(&self) -> Option<Money> {
        self.order_price.checked_times(self.quantity)
    }
}

/// The persisted fields of an order, used to rebuild one from storage.
///
/// Totals are not part of the record; [`Order::from_record`] derives them from
/// the lines so they cannot disagree.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub id: OrderId,
    pub order_number: String,
    pub order_name: String,
    pub member_id: MemberId,
    pub email: String,
    pub status: OrderStatus,
    pub payment_key: Option<String>,
    pub ordered_at: DateTime<Utc>,
    pub lines: Vec<OrderLine>,
}

/// A customer order.
///
/// Invariants:
/// - at least one line
/// - `total_amount` is the sum of `order_price * quantity` over the lines
/// - status only moves along the [`OrderStatus`] transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    order_number: String,
    order_name: String,
    member_id: MemberId,
    email: String,
    lines: Vec<OrderLine>,
    status: OrderStatus,
    payment_key: Option<String>,
    total_amount: Money,
    total_quantity: u32,
    ordered_at: DateTime<Utc>,
}

impl Order {
    /// Builds a new order for `member` in status [`OrderStatus::New`].
    pub fn place(member: &Member, lines: Vec<OrderLine>) -> Result<Self, OrderError> {
        if lines.is_empty() {
            return Err(OrderError::NoLines);
        }
        if let Some(line) = lines.iter().find(|line| line.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                quantity: line.quantity,
            });
        }
        if total_of(&lines).is_none() {
            return Err(OrderError::AmountOverflow);
        }

        let ordered_at = Utc::now();
        let order_name = order_name_for(&lines);
        Ok(Self::from_record(OrderRecord {
            id: OrderId::new(),
            order_number: order_number_for(ordered_at),
            order_name,
            member_id: member.id,
            email: member.email.clone(),
            status: OrderStatus::New,
            payment_key: None,
            ordered_at,
            lines,
        }))
    }

    /// Rebuilds an order from storage.
    ///
    /// Stored orders went through [`Order::place`], so their total fits; a
    /// corrupt row saturates instead of panicking.
    pub fn from_record(record: OrderRecord) -> Self {
        let total_amount = total_of(&record.lines).unwrap_or(Money::new(i64::MAX));
        let total_quantity = record.lines.iter().map(|line| line.quantity).sum();

        Self {
            id: record.id,
            order_number: record.order_number,
            order_name: record.order_name,
            member_id: record.member_id,
            email: record.email,
            lines: record.lines,
            status: record.status,
            payment_key: record.payment_key,
            total_amount,
            total_quantity,
            ordered_at: record.ordered_at,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn id(&self) -> OrderId {
        self.id
    }

    /// Human-facing number, `ORD-<date>-<6 chars>`.
    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    /// Display name sent to the payment gateway.
    pub fn order_name(&self) -> &str {
        &self.order_name
    }

    pub fn member_id(&self) -> MemberId {
        self.member_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_key(&self) -> Option<&str> {
        self.payment_key.as_deref()
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn total_quantity(&self) -> u32 {
        self.total_quantity
    }

    pub fn ordered_at(&self) -> DateTime<Utc> {
        self.ordered_at
    }

    pub fn is_owned_by(&self, member_id: MemberId) -> bool {
        self.member_id == member_id
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Moves the order to [`OrderStatus::PaymentPending`], recording
    /// `payment_key` when one is given. Repeating the call is allowed.
    pub fn await_payment(&mut self, payment_key: Option<&str>) -> Result<(), OrderError> {
        if !self.status.can_await_payment() {
            return Err(self.invalid("await payment"));
        }
        self.status = OrderStatus::PaymentPending;
        if let Some(key) = payment_key {
            self.payment_key = Some(key.to_string());
        }
        Ok(())
    }

    /// Marks the order paid with the payment identified by `payment_key`.
    pub fn complete(&mut self, payment_key: &str) -> Result<(), OrderError> {
        if !self.status.can_complete() {
            return Err(self.invalid("complete"));
        }
        self.status = OrderStatus::Completed;
        self.payment_key = Some(payment_key.to_string());
        Ok(())
    }

    /// Cancels the order. The caller is responsible for returning the stock of
    /// every line.
    pub fn cancel(&mut self) -> Result<(), OrderError> {
        if !self.status.can_cancel() {
            return Err(self.invalid("cancel"));
        }
        self.status = OrderStatus::Canceled;
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> OrderError {
        OrderError::InvalidStateTransition {
            current_state: self.status,
            action,
        }
    }
}

/// Sum of the line totals, `None` on overflow.
fn total_of(lines: &[OrderLine]) -> Option<Money> {
    lines.iter().try_fold(Money::zero(), |total, line| {
        total.checked_add(line.total_price()?)
    })
}

fn order_number_for(ordered_at: DateTime<Utc>) -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(6)
        .collect();
    format!(
        "ORD-{}-{}",
        ordered_at.format("%Y-%m-%d"),
        suffix.to_uppercase()
    )
}

fn order_name_for(lines: &[OrderLine]) -> String {
    match lines {
        [only] => only.product_name.clone(),
        [first, rest @ ..] => format!("{} and {} more", first.product_name, rest.len()),
        [] => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> Member {
        Member::new("buyer@example.com", "Buyer")
    }

    fn line(name: &str, price: i64, quantity: u32) -> OrderLine {
        let product = Product::new(name, Money::new(price), 100);
        OrderLine::snapshot(&product, quantity)
    }

    #[test]
    fn test_place_computes_totals() {
        let order = Order::place(
            &member(),
            vec![line("Keyboard", 1500, 2), line("Mouse", 700, 3)],
        )
        .unwrap();

        assert_eq!(order.status(), OrderStatus::New);
        assert_eq!(order.total_amount(), Money::new(1500 * 2 + 700 * 3));
        assert_eq!(order.total_quantity(), 5);
        assert_eq!(order.email(), "buyer@example.com");
        assert!(order.payment_key().is_none());
    }

    #[test]
    fn test_order_number_format() {
        let order = Order::place(&member(), vec![line("Keyboard", 1500, 1)]).unwrap();
        let number = order.order_number();

        assert!(number.starts_with("ORD-"));
        let suffix = number.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert!(number.contains(&order.ordered_at().format("%Y-%m-%d").to_string()));
    }

    #[test]
    fn test_order_name_single_and_multiple_lines() {
        let single = Order::place(&member(), vec![line("Keyboard", 1500, 1)]).unwrap();
        assert_eq!(single.order_name(), "Keyboard");

        let multi = Order::place(
            &member(),
            vec![
                line("Keyboard", 1500, 1),
                line("Mouse", 700, 1),
                line("Pad", 300, 1),
            ],
        )
        .unwrap();
        assert_eq!(multi.order_name(), "Keyboard and 2 more");
    }

    #[test]
    fn test_place_rejects_empty_and_zero_quantity() {
        assert!(matches!(
            Order::place(&member(), vec![]),
            Err(OrderError::NoLines)
        ));
        assert!(matches!(
            Order::place(&member(), vec![line("Keyboard", 1500, 0)]),
            Err(OrderError::InvalidQuantity { quantity: 0 })
        ));
    }

    #[test]
    fn test_place_rejects_total_that_overflows() {
        let err = Order::place(&member(), vec![line("Yacht", i64::MAX / 2, 3)]).unwrap_err();
        assert!(matches!(err, OrderError::AmountOverflow));

        let err = Order::place(
            &member(),
            vec![line("Yacht", i64::MAX / 2, 1), line("Jet", i64::MAX / 2 + 2, 1)],
        )
        .unwrap_err();
        assert!(matches!(err, OrderError::AmountOverflow));
    }

    #[test]
    fn test_line_total_price() {
        assert_eq!(line("Keyboard", 1500, 3).total_price(), Some(Money::new(4500)));
        assert_eq!(line("Yacht", i64::MAX, 2).total_price(), None);
    }

    #[test]
    fn test_full_payment_lifecycle() {
        let mut order = Order::place(&member(), vec![line("Keyboard", 1500, 1)]).unwrap();

        order.await_payment(None).unwrap();
        assert_eq!(order.status(), OrderStatus::PaymentPending);

        order.await_payment(Some("pk_1")).unwrap();
        assert_eq!(order.payment_key(), Some("pk_1"));

        order.complete("pk_1").unwrap();
        assert_eq!(order.status(), OrderStatus::Completed);
    }

    #[test]
    fn test_cannot_complete_from_new() {
        let mut order = Order::place(&member(), vec![line("Keyboard", 1500, 1)]).unwrap();
        let err = order.complete("pk_1").unwrap_err();

        assert!(matches!(
            err,
            OrderError::InvalidStateTransition {
                current_state: OrderStatus::New,
                action: "complete"
            }
        ));
    }

    #[test]
    fn test_cancel_is_rejected_once_terminal() {
        let mut order = Order::place(&member(), vec![line("Keyboard", 1500, 1)]).unwrap();
        order.cancel().unwrap();
        assert_eq!(order.status(), OrderStatus::Canceled);

        assert!(order.cancel().is_err());
        assert!(order.await_payment(Some("pk_1")).is_err());
    }

    #[test]
    fn test_from_record_derives_totals_from_lines() {
        let original = Order::place(&member(), vec![line("Keyboard", 1500, 4)]).unwrap();
        let rebuilt = Order::from_record(OrderRecord {
            id: original.id(),
            order_number: original.order_number().to_string(),
            order_name: original.order_name().to_string(),
            member_id: original.member_id(),
            email: original.email().to_string(),
            status: original.status(),
            payment_key: None,
            ordered_at: original.ordered_at(),
            lines: original.lines().to_vec(),
        });

        assert_eq!(rebuilt, original);
    }
}
