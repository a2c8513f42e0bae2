use common::UserId;
use domain::OrderStatus;
use serde::Serialize;

/// Builder for order listings.
///
/// Pages are 1-based. Results are always sorted newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderQuery {
    /// Filter by owning user.
    pub user_id: Option<UserId>,

    /// Filter by status.
    pub status: Option<OrderStatus>,

    /// 1-based page number.
    pub page: usize,

    /// Page size, clamped to `1..=MAX_LIMIT`.
    pub limit: usize,
}

impl OrderQuery {
    pub const DEFAULT_LIMIT: usize = 10;
    pub const MAX_LIMIT: usize = 100;

    /// Creates a query for the first page of all orders.
    pub fn new() -> Self {
        Self {
            user_id: None,
            status: None,
            page: 1,
            limit: Self::DEFAULT_LIMIT,
        }
    }

    /// Creates a query for every order of one user.
    pub fn for_user(user_id: UserId) -> Self {
        Self::new().user(user_id).limit(Self::MAX_LIMIT)
    }

    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn page(mut self, page: usize) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit.clamp(1, Self::MAX_LIMIT);
        self
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> usize {
        (self.page.max(1) - 1).saturating_mul(self.limit)
    }
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self::new()
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.limit.max(1))
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
        }
    }
}
