//! Circulation transaction (checkout record) model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};

use super::pagination::Pagination;

/// One checkout of one book by one member.
///
/// Created by a checkout with `return_date = None`, closed exactly once by
/// the matching return. Rows are never deleted by circulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Transaction {
    pub id: i32,
    pub book_id: i32,
    pub member_id: i32,
    pub checkout_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
}

impl Transaction {
    /// An open transaction is a book currently out with the member
    pub fn is_open(&self) -> bool {
        self.return_date.is_none()
    }
}

/// Transaction history query parameters
#[derive(Debug, Default, Clone, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct TransactionQuery {
    /// Restrict to one member (staff only when not the caller)
    pub member_id: Option<i32>,
    pub book_id: Option<i32>,
    /// Only currently checked-out books
    pub open_only: Option<bool>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl TransactionQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.per_page)
    }
}
