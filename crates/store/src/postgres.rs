use std::collections::HashMap;

use async_trait::async_trait;
use common::{MemberId, OrderId, ProductId};
use domain::{
    Member, MemberOrderStats, Order, OrderFilter, OrderLine, OrderStatus, Page, Payment, Product,
    ShopStore, StatsFilter, StoreError,
};
use sqlx::{PgPool, Postgres, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::rows::{self, database};

const ORDER_COLUMNS: &str = "id, order_number, order_name, member_id, email, status, payment_key, ordered_at";

const PAYMENT_COLUMNS: &str =
    "id, payment_key, order_id, order_name, method, total_amount, status, requested_at";

/// PostgreSQL-backed shop store.
#[derive(Clone)]
pub struct PostgresShopStore {
    pool: PgPool,
}

impl PostgresShopStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the shop and lock table migrations.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Loads the lines of `order_rows` and assembles the orders in row order.
    async fn assemble_orders(&self, order_rows: Vec<PgRow>) -> Result<Vec<Order>, StoreError> {
        if order_rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids = order_rows
            .iter()
            .map(|row| sqlx::Row::try_get::<Uuid, _>(row, "id").map_err(database))
            .collect::<Result<Vec<_>, _>>()?;

        let line_rows = sqlx::query(
            r#"
            SELECT order_id, product_id, product_name, order_price, quantity
            FROM order_lines
            WHERE order_id = ANY($1)
            ORDER BY order_id, line_no
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        let mut lines: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
        for row in &line_rows {
            let (order_id, line) = rows::order_line(row)?;
            lines.entry(order_id).or_default().push(line);
        }

        order_rows
            .iter()
            .zip(ids)
            .map(|(row, id)| rows::order(row, lines.remove(&id).unwrap_or_default()))
            .collect()
    }

    /// Explains why a conditional order update touched no row.
    async fn rejected_update(
        tx: &mut Transaction<'_, Postgres>,
        order_id: OrderId,
    ) -> StoreError {
        let status: Result<Option<String>, _> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
                .bind(order_id.as_uuid())
                .fetch_optional(&mut **tx)
                .await;

        match status {
            Ok(None) => StoreError::order_not_found(order_id),
            Ok(Some(status)) => match rows::order_status(&status) {
                Ok(status) => StoreError::StaleState { order_id, status },
                Err(e) => e,
            },
            Err(e) => database(e),
        }
    }
}

#[async_trait]
impl ShopStore for PostgresShopStore {
    async fn save_member(&self, member: &Member) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO members (id, email, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email, name = EXCLUDED.name
            "#,
        )
        .bind(member.id.as_uuid())
        .bind(&member.email)
        .bind(&member.name)
        .execute(&self.pool)
        .await
        .map_err(database)?;
        Ok(())
    }

    async fn find_member(&self, id: MemberId) -> Result<Option<Member>, StoreError> {
        sqlx::query("SELECT id, email, name FROM members WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(database)?
            .map(rows::member)
            .transpose()
    }

    async fn save_product(&self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price, stock_quantity, description)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
                SET name = EXCLUDED.name,
                    price = EXCLUDED.price,
                    stock_quantity = EXCLUDED.stock_quantity,
                    description = EXCLUDED.description
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.price.amount())
        .bind(i64::from(product.stock_quantity))
        .bind(&product.description)
        .execute(&self.pool)
        .await
        .map_err(database)?;
        Ok(())
    }

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        sqlx::query(
            "SELECT id, name, price, stock_quantity, description FROM products WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(database)?
        .map(rows::product)
        .transpose()
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(database)?;

        match row {
            Some(row) => Ok(self.assemble_orders(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, order), fields(order_id = %order.id()))]
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(database)?;

        for line in order.lines() {
            let updated = sqlx::query(
                r#"
                UPDATE products
                SET stock_quantity = stock_quantity - $2
                WHERE id = $1 AND stock_quantity >= $2
                "#,
            )
            .bind(line.product_id.as_uuid())
            .bind(i64::from(line.quantity))
            .execute(&mut *tx)
            .await
            .map_err(database)?;

            // Dropping the transaction rolls back earlier decrements.
            if updated.rows_affected() == 0 {
                return Err(StoreError::StockConflict {
                    product_id: line.product_id,
                });
            }
        }

        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, order_name, member_id, email, status,
                                payment_key, total_amount, total_quantity, ordered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.order_number())
        .bind(order.order_name())
        .bind(order.member_id().as_uuid())
        .bind(order.email())
        .bind(order.status().as_str())
        .bind(order.payment_key())
        .bind(order.total_amount().amount())
        .bind(i64::from(order.total_quantity()))
        .bind(order.ordered_at())
        .execute(&mut *tx)
        .await
        .map_err(database)?;

        for (line_no, line) in order.lines().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_lines (order_id, line_no, product_id, product_name, order_price, quantity)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order.id().as_uuid())
            .bind(line_no as i32)
            .bind(line.product_id.as_uuid())
            .bind(&line.product_name)
            .bind(line.order_price.amount())
            .bind(i64::from(line.quantity))
            .execute(&mut *tx)
            .await
            .map_err(database)?;
        }

        tx.commit().await.map_err(database)?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn mark_payment_pending(
        &self,
        order_id: OrderId,
        payment_key: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(database)?;

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'PAYMENT_PENDING',
                payment_key = COALESCE($2, payment_key)
            WHERE id = $1 AND status IN ('NEW', 'PAYMENT_PENDING')
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(payment_key)
        .execute(&mut *tx)
        .await
        .map_err(database)?;

        if updated.rows_affected() == 0 {
            return Err(Self::rejected_update(&mut tx, order_id).await);
        }
        tx.commit().await.map_err(database)?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_order(&self, order_id: OrderId) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(database)?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(order_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(database)?;
        let status = match status {
            Some(status) => rows::order_status(&status)?,
            None => return Err(StoreError::order_not_found(order_id)),
        };

        match status {
            OrderStatus::Canceled => return Ok(false),
            OrderStatus::Completed => return Err(StoreError::StaleState { order_id, status }),
            OrderStatus::New | OrderStatus::PaymentPending => {}
        }

        sqlx::query("UPDATE orders SET status = 'CANCELED' WHERE id = $1")
            .bind(order_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(database)?;

        // Lines for the same product are summed so each product row is hit once.
        sqlx::query(
            r#"
            UPDATE products p
            SET stock_quantity = p.stock_quantity + l.quantity
            FROM (
                SELECT product_id, SUM(quantity) AS quantity
                FROM order_lines
                WHERE order_id = $1
                GROUP BY product_id
            ) l
            WHERE p.id = l.product_id
            "#,
        )
        .bind(order_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(database)?;

        tx.commit().await.map_err(database)?;
        Ok(true)
    }

    #[tracing::instrument(skip(self, payment), fields(order_id = %payment.order_id))]
    async fn complete_payment(&self, payment: &Payment) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(database)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO payments (id, payment_key, order_id, order_name, method, total_amount, status, requested_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (payment_key) DO NOTHING
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(&payment.payment_key)
        .bind(payment.order_id.as_uuid())
        .bind(&payment.order_name)
        .bind(&payment.method)
        .bind(payment.total_amount.amount())
        .bind(payment.status.as_str())
        .bind(payment.requested_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("payments_order_unique")
            {
                return StoreError::DuplicatePayment {
                    order_id: payment.order_id,
                };
            }
            database(e)
        })?;

        if inserted.rows_affected() == 0 {
            tracing::debug!(payment_key = %payment.payment_key, "payment already recorded");
            return Ok(false);
        }

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'COMPLETED', payment_key = $2
            WHERE id = $1 AND status = 'PAYMENT_PENDING'
            "#,
        )
        .bind(payment.order_id.as_uuid())
        .bind(&payment.payment_key)
        .execute(&mut *tx)
        .await
        .map_err(database)?;

        if updated.rows_affected() == 0 {
            return Err(Self::rejected_update(&mut tx, payment.order_id).await);
        }

        tx.commit().await.map_err(database)?;
        Ok(true)
    }

    async fn find_payment_by_key(&self, payment_key: &str) -> Result<Option<Payment>, StoreError> {
        sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_key = $1"
        ))
        .bind(payment_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(database)?
        .map(rows::payment)
        .transpose()
    }

    async fn find_payment_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Option<Payment>, StoreError> {
        sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(database)?
        .map(rows::payment)
        .transpose()
    }

    async fn list_payments(&self) -> Result<Vec<Payment>, StoreError> {
        sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments ORDER BY requested_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(database)?
        .into_iter()
        .map(rows::payment)
        .collect()
    }

    async fn find_unreconciled_orders(&self) -> Result<Vec<Order>, StoreError> {
        let order_rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders o
            WHERE o.status = 'PAYMENT_PENDING'
              AND o.payment_key IS NOT NULL
              AND NOT EXISTS (SELECT 1 FROM payments p WHERE p.order_id = o.id)
            ORDER BY o.ordered_at ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        self.assemble_orders(order_rows).await
    }

    async fn search_orders(&self, filter: &OrderFilter) -> Result<Page<Order>, StoreError> {
        const MATCHING: &str = r#"
            FROM orders
            WHERE ordered_at >= $1
              AND ordered_at < $2
              AND ($3::TEXT IS NULL OR status = $3)
              AND total_amount >= $4
        "#;
        let status = filter.status.map(|status| status.as_str());

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {MATCHING}"))
            .bind(filter.from)
            .bind(filter.to)
            .bind(status)
            .bind(filter.min_amount.amount())
            .fetch_one(&self.pool)
            .await
            .map_err(database)?;

        let order_rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} {MATCHING} ORDER BY ordered_at DESC, id LIMIT $5 OFFSET $6"
        ))
        .bind(filter.from)
        .bind(filter.to)
        .bind(status)
        .bind(filter.min_amount.amount())
        .bind(rows::page_bound(filter.page.limit())?)
        .bind(rows::page_bound(filter.page.offset())?)
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        let orders = self.assemble_orders(order_rows).await?;
        Ok(Page::new(orders, filter.page, rows::count(total)?))
    }

    async fn order_statistics(
        &self,
        filter: &StatsFilter,
    ) -> Result<Page<MemberOrderStats>, StoreError> {
        const PER_MEMBER: &str = r#"
            SELECT m.id AS member_id,
                   m.email AS email,
                   COUNT(o.id) AS order_count,
                   SUM(o.total_amount)::BIGINT AS total_amount,
                   AVG(o.total_amount)::DOUBLE PRECISION AS average_amount,
                   MAX(o.ordered_at) AS last_ordered_at
            FROM orders o
            JOIN members m ON m.id = o.member_id
            GROUP BY m.id, m.email
            HAVING SUM(o.total_amount) >= $1
        "#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM ({PER_MEMBER}) stats"))
            .bind(filter.min_amount.amount())
            .fetch_one(&self.pool)
            .await
            .map_err(database)?;

        let stats = sqlx::query(&format!(
            "{PER_MEMBER} ORDER BY total_amount DESC, member_id LIMIT $2 OFFSET $3"
        ))
        .bind(filter.min_amount.amount())
        .bind(rows::page_bound(filter.page.limit())?)
        .bind(rows::page_bound(filter.page.offset())?)
        .fetch_all(&self.pool)
        .await
        .map_err(database)?
        .into_iter()
        .map(rows::member_order_stats)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(stats, filter.page, rows::count(total)?))
    }
}
