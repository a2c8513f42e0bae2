use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, ProductId, UserId};
use domain::{
    Cart, CartError, CartItem, Money, Order, OrderLine, OrderParts, Payment, Product,
    StatusChange,
};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    OrderQuery, Page, Result, StoreError,
    store::{
        CartStore, OrderStore, PaymentSettlement, PaymentStore, ProductStore, StockLine,
        merge_stock_lines,
    },
};

const ORDER_COLUMNS: &str =
    "id, user_id, lines, total_amount, status, is_paid, payment_method, created_at, updated_at";
const PAYMENT_COLUMNS: &str =
    "id, order_id, method, status, transaction_id, gateway_transaction_no, created_at, updated_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        let status: String = row.try_get("status")?;
        Ok(Product {
            id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            price: Money::new(row.try_get("price")?),
            stock: to_u32(row.try_get("stock")?, "stock")?,
            status: status.parse().map_err(StoreError::Corrupt)?,
            image_url: row.try_get("image_url")?,
        })
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let lines: serde_json::Value = row.try_get("lines")?;
        let lines: Vec<OrderLine> = serde_json::from_value(lines)?;
        let status: String = row.try_get("status")?;
        let method: String = row.try_get("payment_method")?;

        Ok(Order::from_parts(OrderParts {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            lines,
            total_amount: Money::new(row.try_get("total_amount")?),
            status: status.parse().map_err(StoreError::Corrupt)?,
            is_paid: row.try_get("is_paid")?,
            payment_method: method.parse().map_err(StoreError::Corrupt)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let method: String = row.try_get("method")?;
        let status: String = row.try_get("status")?;

        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            method: method.parse().map_err(StoreError::Corrupt)?,
            status: status.parse().map_err(StoreError::Corrupt)?,
            transaction_id: row.try_get("transaction_id")?,
            gateway_transaction_no: row.try_get("gateway_transaction_no")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

fn merge_lines(lines: &[StockLine]) -> Result<Vec<StockLine>> {
    merge_stock_lines(lines).ok_or_else(|| StoreError::Conflict("stock quantity overflows".into()))
}

async fn load_cart(conn: &mut PgConnection, user_id: UserId, lock: bool) -> Result<Option<Cart>> {
    let sql = if lock {
        "SELECT created_at, updated_at FROM carts WHERE user_id = $1 FOR UPDATE"
    } else {
        "SELECT created_at, updated_at FROM carts WHERE user_id = $1"
    };
    let Some(header) = sqlx::query(sql)
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let rows = sqlx::query(
        "SELECT product_id, quantity FROM cart_items WHERE user_id = $1 ORDER BY position ASC",
    )
    .bind(user_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?;

    let items = rows
        .into_iter()
        .map(|row| {
            Ok(CartItem {
                product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
                quantity: to_u32(row.try_get("quantity")?, "quantity")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(Cart::from_parts(
        user_id,
        items,
        header.try_get("created_at")?,
        header.try_get("updated_at")?,
    )))
}

async fn upsert_cart_item(
    conn: &mut PgConnection,
    user_id: UserId,
    product_id: ProductId,
    quantity: u32,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO cart_items (user_id, product_id, quantity)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, product_id)
        DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
        "#,
    )
    .bind(user_id.as_uuid())
    .bind(product_id.as_uuid())
    .bind(i64::from(quantity))
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.constraint() == Some("cart_items_quantity_range")
        {
            return StoreError::Cart(CartError::QuantityOverflow { product_id });
        }
        StoreError::Database(e)
    })?;
    Ok(())
}

/// Applies a compare-and-set order update. Returns `None` if the row did not match.
async fn apply_order_change(
    conn: &mut PgConnection,
    change: &StatusChange,
    now: DateTime<Utc>,
) -> Result<Option<Order>> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE orders SET status = $2, is_paid = $3, updated_at = $4
        WHERE id = $1 AND status = $5 AND is_paid = $6
        RETURNING {ORDER_COLUMNS}
        "#
    ))
    .bind(change.order_id.as_uuid())
    .bind(change.to.as_str())
    .bind(change.is_paid)
    .bind(now)
    .bind(change.from.as_str())
    .bind(change.was_paid)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(PostgresStore::row_to_order).transpose()
}

/// Explains why a compare-and-set order update matched nothing.
async fn order_change_failure(conn: &mut PgConnection, change: &StatusChange) -> Result<StoreError> {
    let current = sqlx::query("SELECT status, is_paid FROM orders WHERE id = $1")
        .bind(change.order_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?;

    Ok(match current {
        None => StoreError::not_found("Order", change.order_id),
        Some(row) => {
            let status: String = row.try_get("status")?;
            let is_paid: bool = row.try_get("is_paid")?;
            StoreError::Conflict(format!(
                "order {} is {status} (paid: {is_paid}), expected {} (paid: {})",
                change.order_id, change.from, change.was_paid
            ))
        }
    })
}

/// Conditionally decrements every line. The caller rolls back on error.
async fn reserve_lines(conn: &mut PgConnection, lines: &[StockLine]) -> Result<()> {
    for line in merge_lines(lines)? {
        let updated =
            sqlx::query("UPDATE products SET stock = stock - $2 WHERE id = $1 AND stock >= $2")
                .bind(line.product_id.as_uuid())
                .bind(i64::from(line.quantity))
                .execute(&mut *conn)
                .await?;

        if updated.rows_affected() == 0 {
            let available: Option<i64> =
                sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
                    .bind(line.product_id.as_uuid())
                    .fetch_optional(&mut *conn)
                    .await?;

            return Err(match available {
                None => StoreError::not_found("Product", line.product_id),
                Some(stock) => StoreError::InsufficientStock {
                    product_id: line.product_id,
                    requested: line.quantity,
                    available: to_u32(stock, "stock")?,
                },
            });
        }
    }
    Ok(())
}

async fn release_lines(conn: &mut PgConnection, lines: &[StockLine]) -> Result<()> {
    for line in merge_lines(lines)? {
        let updated = sqlx::query("UPDATE products SET stock = stock + $2 WHERE id = $1")
            .bind(line.product_id.as_uuid())
            .bind(i64::from(line.quantity))
            .execute(&mut *conn)
            .await?;
        if updated.rows_affected() == 0 {
            tracing::warn!(product_id = %line.product_id, "releasing stock for unknown product");
        }
    }
    Ok(())
}

#[async_trait]
impl ProductStore for PostgresStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            "SELECT id, name, price, stock, status, image_url FROM products WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn get_products(&self, ids: &[ProductId]) -> Result<Vec<Product>> {
        let uuids: Vec<Uuid> = ids.iter().map(ProductId::as_uuid).collect();
        let rows = sqlx::query(
            "SELECT id, name, price, stock, status, image_url FROM products WHERE id = ANY($1)",
        )
        .bind(&uuids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_product).collect()
    }

    async fn upsert_product(&self, product: Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price, stock, status, image_url)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                price = EXCLUDED.price,
                stock = EXCLUDED.stock,
                status = EXCLUDED.status,
                image_url = EXCLUDED.image_url
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.price.amount())
        .bind(i64::from(product.stock))
        .bind(product.status.as_str())
        .bind(&product.image_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reserve_stock(&self, lines: &[StockLine]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if let Err(err) = reserve_lines(&mut tx, lines).await {
            tx.rollback().await?;
            return Err(err);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn release_stock(&self, lines: &[StockLine]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        release_lines(&mut tx, lines).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        let mut conn = self.pool.acquire().await?;
        load_cart(&mut conn, user_id, false).await
    }

    async fn add_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity { quantity }.into());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO carts (user_id, created_at, updated_at)
            VALUES ($1, $2, $2)
            ON CONFLICT (user_id) DO UPDATE SET updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        upsert_cart_item(&mut tx, user_id, product_id, quantity).await?;

        let cart = load_cart(&mut tx, user_id, false)
            .await?
            .ok_or_else(|| StoreError::not_found("Cart", user_id))?;
        tx.commit().await?;

        Ok(cart)
    }

    async fn remove_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<Cart>> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2")
            .bind(user_id.as_uuid())
            .bind(product_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cart_items WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_one(&mut *tx)
            .await?;

        if remaining == 0 {
            sqlx::query("DELETE FROM carts WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(None);
        }

        if removed.rows_affected() > 0 {
            sqlx::query("UPDATE carts SET updated_at = $2 WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
        }

        let cart = load_cart(&mut tx, user_id, false).await?;
        tx.commit().await?;
        Ok(cart)
    }

    async fn take_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        let mut tx = self.pool.begin().await?;

        let cart = load_cart(&mut tx, user_id, true).await?;
        if cart.is_some() {
            sqlx::query("DELETE FROM carts WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(cart)
    }

    async fn restore_cart(&self, cart: Cart) -> Result<()> {
        if cart.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO carts (user_id, created_at, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET
                created_at = LEAST(carts.created_at, EXCLUDED.created_at),
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(cart.user_id().as_uuid())
        .bind(cart.created_at())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        for item in cart.items() {
            upsert_cart_item(&mut tx, cart.user_id(), item.product_id, item.quantity).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(&self, order: &Order, payment: Option<&Payment>) -> Result<()> {
        let lines = serde_json::to_value(order.lines())?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, lines, total_amount, status, is_paid, payment_method, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.user_id().as_uuid())
        .bind(lines)
        .bind(order.total_amount().amount())
        .bind(order.status().as_str())
        .bind(order.is_paid())
        .bind(order.payment_method().as_str())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *tx)
        .await?;

        if let Some(payment) = payment {
            sqlx::query(
                r#"
                INSERT INTO payments (id, order_id, method, status, transaction_id, gateway_transaction_no, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(payment.id.as_uuid())
            .bind(payment.order_id.as_uuid())
            .bind(payment.method.as_str())
            .bind(payment.status.as_str())
            .bind(&payment.transaction_id)
            .bind(&payment.gateway_transaction_no)
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn query_orders(&self, query: &OrderQuery) -> Result<Page<Order>> {
        fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &OrderQuery) {
            if let Some(user_id) = query.user_id {
                builder.push(" AND user_id = ").push_bind(user_id.as_uuid());
            }
            if let Some(status) = query.status {
                builder.push(" AND status = ").push_bind(status.as_str());
            }
        }

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM orders WHERE TRUE");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {ORDER_COLUMNS} FROM orders WHERE TRUE"));
        push_filters(&mut select, query);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::try_from(query.limit).unwrap_or(i64::MAX))
            .push(" OFFSET ")
            .push_bind(i64::try_from(query.offset()).unwrap_or(i64::MAX));
        let rows = select.build().fetch_all(&self.pool).await?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(Self::row_to_order)
                .collect::<Result<_>>()?,
            total: usize::try_from(total).unwrap_or(0),
            page: query.page,
            limit: query.limit,
        })
    }

    async fn apply_status_change(&self, change: &StatusChange) -> Result<Order> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let Some(order) = apply_order_change(&mut tx, change, now).await? else {
            let err = order_change_failure(&mut tx, change).await?;
            tx.rollback().await?;
            return Err(err);
        };

        let lines: Vec<StockLine> = order
            .lines()
            .iter()
            .map(|line| StockLine::new(line.product_id, line.quantity))
            .collect();

        if change.reserves_stock()
            && let Err(err) = reserve_lines(&mut tx, &lines).await
        {
            tx.rollback().await?;
            return Err(err);
        }

        if change.releases_stock() {
            release_lines(&mut tx, &lines).await?;

            sqlx::query(
                "UPDATE payments SET status = 'Failed', updated_at = $2 WHERE order_id = $1 AND status = 'Pending'",
            )
            .bind(change.order_id.as_uuid())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(order)
    }

    async fn find_expired_orders(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT o.id, o.user_id, o.lines, o.total_amount, o.status, o.is_paid,
                   o.payment_method, o.created_at, o.updated_at
            FROM orders o
            JOIN payments p ON p.order_id = o.id
            WHERE o.payment_method = 'gateway'
              AND o.status = 'Pending'
              AND NOT o.is_paid
              AND p.status = 'Pending'
              AND o.created_at < $1
            ORDER BY o.created_at ASC
            LIMIT $2
            "#,
        )
        .bind(created_before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }
}

#[async_trait]
impl PaymentStore for PostgresStore {
    async fn get_payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn settle_payment(&self, settlement: &PaymentSettlement) -> Result<Payment> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE payments SET status = $2, gateway_transaction_no = $3, updated_at = $4
            WHERE order_id = $1 AND status = 'Pending'
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(settlement.order_id.as_uuid())
        .bind(settlement.status.as_str())
        .bind(&settlement.gateway_transaction_no)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM payments WHERE order_id = $1")
                    .bind(settlement.order_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(match current {
                None => StoreError::not_found("Payment", settlement.order_id),
                Some(status) => StoreError::Conflict(format!(
                    "payment for order {} is already {status}",
                    settlement.order_id
                )),
            });
        };
        let payment = Self::row_to_payment(row)?;

        if let Some(change) = &settlement.order_change
            && apply_order_change(&mut tx, change, now).await?.is_none()
        {
            let err = order_change_failure(&mut tx, change).await?;
            tx.rollback().await?;
            return Err(err);
        }

        tx.commit().await?;
        Ok(payment)
    }
}
