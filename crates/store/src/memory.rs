use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use domain::{Cart, Order, Payment, PaymentMethod, PaymentStatus, Product, StatusChange};
use tokio::sync::RwLock;

use crate::{
    OrderQuery, Page, Result, StoreError,
    store::{
        CartStore, OrderStore, PaymentSettlement, PaymentStore, ProductStore, StockLine,
        merge_stock_lines,
    },
};

#[derive(Debug, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    carts: HashMap<UserId, Cart>,
    orders: HashMap<OrderId, Order>,
    payments: HashMap<OrderId, Payment>,
}

impl State {
    fn reserve(&mut self, lines: &[StockLine]) -> Result<()> {
        let lines = merge_lines(lines)?;

        // Check every line before touching any.
        for line in &lines {
            let product = self
                .products
                .get(&line.product_id)
                .ok_or_else(|| StoreError::not_found("Product", line.product_id))?;
            if !product.has_stock(line.quantity) {
                return Err(StoreError::InsufficientStock {
                    product_id: line.product_id,
                    requested: line.quantity,
                    available: product.stock,
                });
            }
        }

        for line in &lines {
            if let Some(product) = self.products.get_mut(&line.product_id) {
                product.stock -= line.quantity;
            }
        }
        Ok(())
    }

    fn release(&mut self, lines: &[StockLine]) -> Result<()> {
        for line in merge_lines(lines)? {
            if let Some(product) = self.products.get_mut(&line.product_id) {
                product.stock = product.stock.saturating_add(line.quantity);
            } else {
                tracing::warn!(product_id = %line.product_id, "releasing stock for unknown product");
            }
        }
        Ok(())
    }

    fn check_change(&self, change: &StatusChange) -> Result<()> {
        let order = self
            .orders
            .get(&change.order_id)
            .ok_or_else(|| StoreError::not_found("Order", change.order_id))?;
        if !order.matches(change) {
            return Err(StoreError::Conflict(format!(
                "order {} is {} (paid: {}), expected {} (paid: {})",
                change.order_id,
                order.status(),
                order.is_paid(),
                change.from,
                change.was_paid
            )));
        }
        Ok(())
    }
}

fn merge_lines(lines: &[StockLine]) -> Result<Vec<StockLine>> {
    merge_stock_lines(lines).ok_or_else(|| StoreError::Conflict("stock quantity overflows".into()))
}

fn stock_lines(order: &Order) -> Vec<StockLine> {
    order
        .lines()
        .iter()
        .map(|line| StockLine::new(line.product_id, line.quantity))
        .collect()
}

/// In-memory store implementation for tests and single-process deployments.
///
/// All collections live behind one lock, so every trait operation is atomic
/// with respect to the others.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    fail_on_insert_order: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with products.
    pub async fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write().await;
            for product in products {
                state.products.insert(product.id, product);
            }
        }
        store
    }

    /// Makes `insert_order` fail until reset. Used to exercise rollback paths.
    pub fn set_fail_on_insert_order(&self, fail: bool) {
        self.fail_on_insert_order.store(fail, Ordering::SeqCst);
    }

    /// Returns the current stock of a product.
    pub async fn stock_of(&self, product_id: ProductId) -> Option<u32> {
        self.state
            .read()
            .await
            .products
            .get(&product_id)
            .map(|product| product.stock)
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns the total number of carts stored.
    pub async fn cart_count(&self) -> usize {
        self.state.read().await.carts.len()
    }
}

#[async_trait]
impl ProductStore for InMemoryStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn get_products(&self, ids: &[ProductId]) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        let mut seen = std::collections::HashSet::new();
        Ok(ids
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| state.products.get(id).cloned())
            .collect())
    }

    async fn upsert_product(&self, product: Product) -> Result<()> {
        self.state.write().await.products.insert(product.id, product);
        Ok(())
    }

    async fn reserve_stock(&self, lines: &[StockLine]) -> Result<()> {
        self.state.write().await.reserve(lines)
    }

    async fn release_stock(&self, lines: &[StockLine]) -> Result<()> {
        self.state.write().await.release(lines)
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        Ok(self.state.read().await.carts.get(&user_id).cloned())
    }

    async fn add_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let mut cart = state
            .carts
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| Cart::new(user_id, now));
        cart.add_item(product_id, quantity, now)?;
        state.carts.insert(user_id, cart.clone());

        Ok(cart)
    }

    async fn remove_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<Cart>> {
        let mut state = self.state.write().await;

        let Some(cart) = state.carts.get_mut(&user_id) else {
            return Ok(None);
        };
        cart.remove_item(&product_id, Utc::now());

        if cart.is_empty() {
            state.carts.remove(&user_id);
            Ok(None)
        } else {
            Ok(Some(cart.clone()))
        }
    }

    async fn take_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        Ok(self.state.write().await.carts.remove(&user_id))
    }

    async fn restore_cart(&self, cart: Cart) -> Result<()> {
        if cart.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        let user_id = cart.user_id();
        match state.carts.get_mut(&user_id) {
            Some(current) => current.merge(&cart, Utc::now())?,
            None => {
                state.carts.insert(user_id, cart);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &Order, payment: Option<&Payment>) -> Result<()> {
        if self.fail_on_insert_order.load(Ordering::SeqCst) {
            return Err(StoreError::Conflict("order insert disabled".to_string()));
        }

        let mut state = self.state.write().await;
        if state.orders.contains_key(&order.id()) {
            return Err(StoreError::Conflict(format!(
                "order {} already exists",
                order.id()
            )));
        }

        state.orders.insert(order.id(), order.clone());
        if let Some(payment) = payment {
            state.payments.insert(order.id(), payment.clone());
        }
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn query_orders(&self, query: &OrderQuery) -> Result<Page<Order>> {
        let state = self.state.read().await;

        let mut matching: Vec<&Order> = state
            .orders
            .values()
            .filter(|order| query.user_id.is_none_or(|user| order.belongs_to(user)))
            .filter(|order| query.status.is_none_or(|status| order.status() == status))
            .collect();
        matching.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(&a.id()))
        });

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(query.offset())
            .take(query.limit)
            .cloned()
            .collect();

        Ok(Page {
            items,
            total,
            page: query.page,
            limit: query.limit,
        })
    }

    async fn apply_status_change(&self, change: &StatusChange) -> Result<Order> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        state.check_change(change)?;

        let lines = state
            .orders
            .get(&change.order_id)
            .map(stock_lines)
            .unwrap_or_default();
        if change.reserves_stock() {
            state.reserve(&lines)?;
        }

        if change.releases_stock() {
            state.release(&lines)?;

            if let Some(payment) = state.payments.get_mut(&change.order_id)
                && payment.status == PaymentStatus::Pending
            {
                payment.status = PaymentStatus::Failed;
                payment.updated_at = now;
            }
        }

        let order = state
            .orders
            .get_mut(&change.order_id)
            .ok_or_else(|| StoreError::not_found("Order", change.order_id))?;
        order.apply(change, now);
        Ok(order.clone())
    }

    async fn find_expired_orders(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>> {
        let state = self.state.read().await;

        let mut expired: Vec<Order> = state
            .orders
            .values()
            .filter(|order| {
                order.payment_method() == PaymentMethod::Gateway
                    && order.status() == domain::OrderStatus::Pending
                    && !order.is_paid()
                    && order.created_at() < created_before
            })
            .filter(|order| {
                state
                    .payments
                    .get(&order.id())
                    .is_some_and(|payment| payment.status == PaymentStatus::Pending)
            })
            .cloned()
            .collect();
        expired.sort_by_key(|order| order.created_at());
        expired.truncate(limit);

        Ok(expired)
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn get_payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        Ok(self.state.read().await.payments.get(&order_id).cloned())
    }

    async fn settle_payment(&self, settlement: &PaymentSettlement) -> Result<Payment> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let payment = state
            .payments
            .get(&settlement.order_id)
            .ok_or_else(|| StoreError::not_found("Payment", settlement.order_id))?;
        if payment.status.is_settled() {
            return Err(StoreError::Conflict(format!(
                "payment for order {} is already {}",
                settlement.order_id, payment.status
            )));
        }

        if let Some(change) = &settlement.order_change {
            state.check_change(change)?;
            if let Some(order) = state.orders.get_mut(&change.order_id) {
                order.apply(change, now);
            }
        }

        let payment = state
            .payments
            .get_mut(&settlement.order_id)
            .ok_or_else(|| StoreError::not_found("Payment", settlement.order_id))?;
        payment.status = settlement.status;
        payment.gateway_transaction_no = settlement.gateway_transaction_no.clone();
        payment.updated_at = now;

        Ok(payment.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Money, OrderLine, OrderStatus, ProductStatus, RequestContext, StatusPolicy};

    fn product(stock: u32) -> Product {
        Product {
            id: ProductId::new(),
            name: "Hydrating Toner".to_string(),
            price: Money::new(100_000),
            stock,
            status: ProductStatus::Active,
            image_url: None,
        }
    }

    fn order_for(user_id: UserId, product: &Product, quantity: u32) -> Order {
        Order::place(
            user_id,
            vec![OrderLine::new(
                product.id,
                product.name.clone(),
                product.price,
                quantity,
            )],
            PaymentMethod::Gateway,
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_reserve_decrements_every_line() {
        let a = product(5);
        let b = product(2);
        let store = InMemoryStore::with_products([a.clone(), b.clone()]).await;

        store
            .reserve_stock(&[StockLine::new(a.id, 2), StockLine::new(b.id, 2)])
            .await
            .unwrap();

        assert_eq!(store.stock_of(a.id).await, Some(3));
        assert_eq!(store.stock_of(b.id).await, Some(0));
    }

    #[tokio::test]
    async fn test_reserve_is_all_or_nothing() {
        let a = product(5);
        let b = product(1);
        let store = InMemoryStore::with_products([a.clone(), b.clone()]).await;

        let err = store
            .reserve_stock(&[StockLine::new(a.id, 2), StockLine::new(b.id, 2)])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::InsufficientStock { product_id, requested: 2, available: 1 } if product_id == b.id
        ));
        assert_eq!(store.stock_of(a.id).await, Some(5));
        assert_eq!(store.stock_of(b.id).await, Some(1));
    }

    #[tokio::test]
    async fn test_reserve_counts_duplicate_lines_together() {
        let a = product(3);
        let store = InMemoryStore::with_products([a.clone()]).await;

        let result = store
            .reserve_stock(&[StockLine::new(a.id, 2), StockLine::new(a.id, 2)])
            .await;

        assert!(result.is_err());
        assert_eq!(store.stock_of(a.id).await, Some(3));
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_oversell() {
        let a = product(10);
        let store = InMemoryStore::with_products([a.clone()]).await;
        let product_id = a.id;

        let tasks: Vec<_> = (0..25)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(
                    async move { store.reserve_stock(&[StockLine::new(product_id, 1)]).await },
                )
            })
            .collect();

        let mut succeeded = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 10);
        assert_eq!(store.stock_of(a.id).await, Some(0));
    }

    #[tokio::test]
    async fn test_remove_last_item_deletes_cart() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let product_id = ProductId::new();

        store.add_cart_item(user, product_id, 1).await.unwrap();
        let remaining = store.remove_cart_item(user, product_id).await.unwrap();

        assert!(remaining.is_none());
        assert!(store.get_cart(user).await.unwrap().is_none());
        assert_eq!(store.cart_count().await, 0);
    }

    #[tokio::test]
    async fn test_take_cart_is_exclusive() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        store.add_cart_item(user, ProductId::new(), 1).await.unwrap();

        assert!(store.take_cart(user).await.unwrap().is_some());
        assert!(store.take_cart(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_cart_merges_into_new_cart() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let product_id = ProductId::new();

        store.add_cart_item(user, product_id, 2).await.unwrap();
        let taken = store.take_cart(user).await.unwrap().unwrap();
        store.add_cart_item(user, product_id, 1).await.unwrap();
        store.restore_cart(taken).await.unwrap();

        let cart = store.get_cart(user).await.unwrap().unwrap();
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.get_item(&product_id).unwrap().quantity, 3);
    }

    #[tokio::test]
    async fn test_cancel_releases_stock_and_fails_payment() {
        let a = product(5);
        let store = InMemoryStore::with_products([a.clone()]).await;
        let user = UserId::new();
        let order = order_for(user, &a, 2);
        let payment = Payment::pending(order.id(), PaymentMethod::Gateway, "TX", Utc::now());

        store.reserve_stock(&[StockLine::new(a.id, 2)]).await.unwrap();
        store.insert_order(&order, Some(&payment)).await.unwrap();

        let change = order.cancel_by(&RequestContext::customer(user)).unwrap();
        let cancelled = store.apply_status_change(&change).await.unwrap();

        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert_eq!(store.stock_of(a.id).await, Some(5));
        let payment = store.get_payment_for_order(order.id()).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_stale_status_change_conflicts() {
        let a = product(5);
        let store = InMemoryStore::with_products([a.clone()]).await;
        let user = UserId::new();
        let order = order_for(user, &a, 1);
        store.insert_order(&order, None).await.unwrap();

        let change = order.cancel_by(&RequestContext::customer(user)).unwrap();
        store.apply_status_change(&change).await.unwrap();
        let err = store.apply_status_change(&change).await.unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.stock_of(a.id).await, Some(6));
    }

    #[tokio::test]
    async fn test_reopening_cancelled_order_reserves_again() {
        let a = product(5);
        let store = InMemoryStore::with_products([a.clone()]).await;
        let user = UserId::new();
        let order = order_for(user, &a, 2);
        store.reserve_stock(&[StockLine::new(a.id, 2)]).await.unwrap();
        store.insert_order(&order, None).await.unwrap();

        let cancel = order.cancel_by(&RequestContext::customer(user)).unwrap();
        let cancelled = store.apply_status_change(&cancel).await.unwrap();
        assert_eq!(store.stock_of(a.id).await, Some(5));

        let reopen = cancelled
            .change_status(OrderStatus::Pending, StatusPolicy::Permissive)
            .unwrap();
        let reopened = store.apply_status_change(&reopen).await.unwrap();
        assert_eq!(store.stock_of(a.id).await, Some(3));

        let cancel = reopened.cancel_by(&RequestContext::customer(user)).unwrap();
        store.apply_status_change(&cancel).await.unwrap();
        assert_eq!(store.stock_of(a.id).await, Some(5));
    }

    #[tokio::test]
    async fn test_reopening_fails_when_stock_is_gone() {
        let a = product(2);
        let store = InMemoryStore::with_products([a.clone()]).await;
        let user = UserId::new();
        let order = order_for(user, &a, 2);
        store.reserve_stock(&[StockLine::new(a.id, 2)]).await.unwrap();
        store.insert_order(&order, None).await.unwrap();

        let cancel = order.cancel_by(&RequestContext::customer(user)).unwrap();
        let cancelled = store.apply_status_change(&cancel).await.unwrap();
        store.reserve_stock(&[StockLine::new(a.id, 1)]).await.unwrap();

        let ship = cancelled
            .change_status(OrderStatus::Shipped, StatusPolicy::Permissive)
            .unwrap();
        let err = store.apply_status_change(&ship).await.unwrap_err();

        assert!(matches!(
            err,
            StoreError::InsufficientStock {
                requested: 2,
                available: 1,
                ..
            }
        ));
        assert_eq!(store.stock_of(a.id).await, Some(1));
        let unchanged = store.get_order(order.id()).await.unwrap().unwrap();
        assert_eq!(unchanged.status(), OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_settle_payment_only_once() {
        let a = product(5);
        let store = InMemoryStore::with_products([a.clone()]).await;
        let order = order_for(UserId::new(), &a, 1);
        let payment = Payment::pending(order.id(), PaymentMethod::Gateway, "TX", Utc::now());
        store.insert_order(&order, Some(&payment)).await.unwrap();

        let settlement = PaymentSettlement {
            order_id: order.id(),
            status: PaymentStatus::Completed,
            gateway_transaction_no: Some("14000001".to_string()),
            order_change: Some(order.confirm_payment().unwrap()),
        };
        let settled = store.settle_payment(&settlement).await.unwrap();
        assert_eq!(settled.status, PaymentStatus::Completed);

        let order = store.get_order(order.id()).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Processing);
        assert!(order.is_paid());

        assert!(matches!(
            store.settle_payment(&settlement).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_query_orders_filters_and_pages_newest_first() {
        let a = product(100);
        let store = InMemoryStore::with_products([a.clone()]).await;
        let user = UserId::new();

        let mut ids = Vec::new();
        for _ in 0..3 {
            let order = order_for(user, &a, 1);
            ids.push(order.id());
            store.insert_order(&order, None).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        store
            .insert_order(&order_for(UserId::new(), &a, 1), None)
            .await
            .unwrap();

        let page = store
            .query_orders(&OrderQuery::new().user(user).limit(2))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages(), 2);
        assert_eq!(page.items[0].id(), ids[2]);
        assert_eq!(page.items[1].id(), ids[1]);

        let pending = store
            .query_orders(&OrderQuery::new().status(OrderStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.total, 4);
        let shipped = store
            .query_orders(&OrderQuery::new().status(OrderStatus::Shipped))
            .await
            .unwrap();
        assert_eq!(shipped.total, 0);
    }

    #[tokio::test]
    async fn test_find_expired_orders() {
        let a = product(5);
        let store = InMemoryStore::with_products([a.clone()]).await;
        let order = order_for(UserId::new(), &a, 1);
        let payment = Payment::pending(order.id(), PaymentMethod::Gateway, "TX", Utc::now());
        store.insert_order(&order, Some(&payment)).await.unwrap();

        let before = order.created_at();
        assert!(store.find_expired_orders(before, 10).await.unwrap().is_empty());

        let later = before + chrono::Duration::minutes(20);
        let expired = store.find_expired_orders(later, 10).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id(), order.id());
    }
}
