//! `PostgreSQL` implementation of [`OrderRepository`].

use chrono::{DateTime, Utc};
use seckill_core::providers::{CreateOrderOutcome, OrderRepository};
use seckill_core::{
    CustomerId, OrderId, OrderStatus, PersistedOrder, Result, SeckillError, SeckillSale,
    VoucherId,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;

/// Order repository over a `PostgreSQL` connection pool.
///
/// # Example
///
/// ```no_run
/// use seckill_postgres::PostgresOrderRepository;
///
/// # async fn example() -> seckill_core::Result<()> {
/// let repo = PostgresOrderRepository::connect("postgres://localhost/seckill", 10, std::time::Duration::from_secs(5)).await?;
/// repo.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    /// Create a repository over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Database`] if no connection can be established.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| SeckillError::Database(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Run the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| SeckillError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_id(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| SeckillError::Database(format!("{what} {value} out of range")))
}

fn domain_id(value: i64, what: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| SeckillError::Database(format!("{what} {value} out of range")))
}

fn order_from_row(row: &PgRow) -> Result<PersistedOrder> {
    let read = |e: sqlx::Error| SeckillError::Database(format!("Failed to decode order row: {e}"));

    let order_id: i64 = row.try_get("order_id").map_err(read)?;
    let customer_id: i64 = row.try_get("customer_id").map_err(read)?;
    let voucher_id: i64 = row.try_get("voucher_id").map_err(read)?;
    let status: i16 = row.try_get("status").map_err(read)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(read)?;

    Ok(PersistedOrder {
        order_id: OrderId::new(domain_id(order_id, "order id")?),
        customer_id: CustomerId::new(domain_id(customer_id, "customer id")?),
        voucher_id: VoucherId::new(domain_id(voucher_id, "voucher id")?),
        status: OrderStatus::from_code(status)
            .ok_or_else(|| SeckillError::Database(format!("Unknown order status {status}")))?,
        created_at,
    })
}

/// Roll back a transaction whose outcome is already decided.
///
/// A failed rollback is only logged; the server discards the transaction when
/// the connection returns to the pool.
async fn rollback(tx: Transaction<'_, Postgres>, order_id: OrderId) {
    if let Err(error) = tx.rollback().await {
        tracing::warn!(order_id = %order_id, error = %error, "Failed to roll back order transaction");
    }
}

impl OrderRepository for PostgresOrderRepository {
    async fn register_sale(&self, sale: &SeckillSale) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO seckill_vouchers (voucher_id, stock, begin_time, end_time)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (voucher_id) DO UPDATE
            SET stock = EXCLUDED.stock,
                begin_time = EXCLUDED.begin_time,
                end_time = EXCLUDED.end_time,
                updated_at = now()
            ",
        )
        .bind(db_id(sale.voucher_id.get(), "voucher id")?)
        .bind(
            i32::try_from(sale.stock)
                .map_err(|_| SeckillError::InvalidSale(format!("stock {} too large", sale.stock)))?,
        )
        .bind(sale.window.begin)
        .bind(sale.window.end)
        .execute(&self.pool)
        .await
        .map_err(|e| SeckillError::Database(format!("Failed to register sale: {e}")))?;

        tracing::info!(voucher_id = %sale.voucher_id, stock = sale.stock, "Registered sale");
        Ok(())
    }

    async fn find_order(
        &self,
        customer_id: CustomerId,
        voucher_id: VoucherId,
    ) -> Result<Option<PersistedOrder>> {
        let row = sqlx::query(
            r"
            SELECT order_id, customer_id, voucher_id, status, created_at
            FROM voucher_orders
            WHERE customer_id = $1 AND voucher_id = $2
            ",
        )
        .bind(db_id(customer_id.get(), "customer id")?)
        .bind(db_id(voucher_id.get(), "voucher id")?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SeckillError::Database(format!("Failed to find order: {e}")))?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<PersistedOrder>> {
        let row = sqlx::query(
            r"
            SELECT order_id, customer_id, voucher_id, status, created_at
            FROM voucher_orders
            WHERE order_id = $1
            ",
        )
        .bind(db_id(order_id.get(), "order id")?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SeckillError::Database(format!("Failed to get order: {e}")))?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn create_order(&self, order: &PersistedOrder) -> Result<CreateOrderOutcome> {
        let order_id = db_id(order.order_id.get(), "order id")?;
        let customer_id = db_id(order.customer_id.get(), "customer id")?;
        let voucher_id = db_id(order.voucher_id.get(), "voucher id")?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SeckillError::Database(format!("Failed to start transaction: {e}")))?;

        // Conflicts on either the order id or (customer, voucher) insert nothing.
        let inserted = sqlx::query(
            r"
            INSERT INTO voucher_orders (order_id, customer_id, voucher_id, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(order_id)
        .bind(customer_id)
        .bind(voucher_id)
        .bind(order.status.code())
        .bind(order.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| SeckillError::Database(format!("Failed to insert order: {e}")))?;

        if inserted.rows_affected() == 0 {
            rollback(tx, order.order_id).await;
            return Ok(CreateOrderOutcome::AlreadyExists);
        }

        let decremented = sqlx::query(
            r"
            UPDATE seckill_vouchers
            SET stock = stock - 1, updated_at = now()
            WHERE voucher_id = $1 AND stock > 0
            ",
        )
        .bind(voucher_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| SeckillError::Database(format!("Failed to decrement stock: {e}")))?;

        if decremented.rows_affected() == 0 {
            rollback(tx, order.order_id).await;
            return Ok(CreateOrderOutcome::StockExhausted);
        }

        tx.commit()
            .await
            .map_err(|e| SeckillError::Database(format!("Failed to commit order: {e}")))?;

        tracing::debug!(order_id = %order.order_id, "Inserted order row");
        Ok(CreateOrderOutcome::Created)
    }

    async fn remaining_stock(&self, voucher_id: VoucherId) -> Result<Option<i64>> {
        let stock: Option<i32> =
            sqlx::query_scalar("SELECT stock FROM seckill_vouchers WHERE voucher_id = $1")
                .bind(db_id(voucher_id.get(), "voucher id")?)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| SeckillError::Database(format!("Failed to read stock: {e}")))?;

        Ok(stock.map(i64::from))
    }
}
