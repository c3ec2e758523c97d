//! Circulation store: the transactional seam the ledger runs against.
//!
//! A [`CirculationStore`] opens [`CirculationTx`] scopes. Everything done
//! through one scope commits together or not at all; dropping a scope
//! without calling [`CirculationTx::commit`] rolls it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, QueryBuilder};

use crate::{
    error::AppResult,
    models::{
        book::{Book, BookFilter},
        transaction::{Transaction, TransactionQuery},
        user::LibraryUser,
    },
};

const BOOK_COLUMNS: &str = "id, title, author, isbn, published_date, copies_available";
const TRANSACTION_COLUMNS: &str = "id, book_id, member_id, checkout_date, return_date";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CirculationStore: Send + Sync {
    /// Open a serializable transaction scope
    async fn begin(&self) -> AppResult<Box<dyn CirculationTx>>;

    /// Books with at least one copy on the shelf matching `filter`, ordered by title then id
    async fn list_available(&self, filter: &BookFilter) -> AppResult<Vec<Book>>;

    /// Transaction log page, newest checkout first, with the total match count
    async fn history(&self, query: &TransactionQuery) -> AppResult<(Vec<Transaction>, i64)>;
}

/// Operations available inside one atomic scope
#[async_trait]
pub trait CirculationTx: Send {
    async fn find_member(&mut self, member_id: i32) -> AppResult<Option<LibraryUser>>;

    /// Load a book and hold it against concurrent writers until the scope ends
    async fn lock_book(&mut self, book_id: i32) -> AppResult<Option<Book>>;

    async fn find_open_transaction(
        &mut self,
        member_id: i32,
        book_id: i32,
    ) -> AppResult<Option<Transaction>>;

    async fn set_copies_available(&mut self, book_id: i32, copies: i32) -> AppResult<()>;

    async fn insert_transaction(
        &mut self,
        member_id: i32,
        book_id: i32,
        checkout_date: DateTime<Utc>,
    ) -> AppResult<Transaction>;

    /// Set the return date of a still-open transaction.
    /// Returns `None` when the transaction was already closed.
    async fn close_transaction(
        &mut self,
        transaction_id: i32,
        return_date: DateTime<Utc>,
    ) -> AppResult<Option<Transaction>>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// Escape `%`, `_` and `\` for use inside an ILIKE pattern
pub(crate) fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[derive(Clone)]
pub struct PgCirculationStore {
    pool: Pool<Postgres>,
}

impl PgCirculationStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

struct PgCirculationTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl CirculationStore for PgCirculationStore {
    async fn begin(&self) -> AppResult<Box<dyn CirculationTx>> {
        let mut tx = self.pool.begin().await?;
        // Must be the first statement of the transaction
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgCirculationTx { tx }))
    }

    async fn list_available(&self, filter: &BookFilter) -> AppResult<Vec<Book>> {
        let filter = filter.normalized();

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM books WHERE copies_available > 0",
            BOOK_COLUMNS
        ));
        if let Some(title) = filter.title {
            qb.push(" AND title ILIKE ").push_bind(like_pattern(&title));
        }
        if let Some(author) = filter.author {
            qb.push(" AND author ILIKE ").push_bind(like_pattern(&author));
        }
        if let Some(isbn) = filter.isbn {
            qb.push(" AND UPPER(isbn) = UPPER(").push_bind(isbn).push(")");
        }
        qb.push(" ORDER BY title, id");

        let books = qb.build_query_as::<Book>().fetch_all(&self.pool).await?;
        Ok(books)
    }

    async fn history(&self, query: &TransactionQuery) -> AppResult<(Vec<Transaction>, i64)> {
        let page = query.pagination();

        fn push_conditions(qb: &mut QueryBuilder<'_, Postgres>, query: &TransactionQuery) {
            qb.push(" WHERE 1=1");
            if let Some(member_id) = query.member_id {
                qb.push(" AND member_id = ").push_bind(member_id);
            }
            if let Some(book_id) = query.book_id {
                qb.push(" AND book_id = ").push_bind(book_id);
            }
            if query.open_only.unwrap_or(false) {
                qb.push(" AND return_date IS NULL");
            }
        }

        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM transactions");
        push_conditions(&mut count_qb, query);
        let total: i64 = count_qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM transactions",
            TRANSACTION_COLUMNS
        ));
        push_conditions(&mut qb, query);
        qb.push(" ORDER BY checkout_date DESC, id DESC LIMIT ")
            .push_bind(page.per_page)
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows = qb
            .build_query_as::<Transaction>()
            .fetch_all(&self.pool)
            .await?;

        Ok((rows, total))
    }
}

#[async_trait]
impl CirculationTx for PgCirculationTx {
    async fn find_member(&mut self, member_id: i32) -> AppResult<Option<LibraryUser>> {
        let member = sqlx::query_as::<_, LibraryUser>(
            "SELECT id, account_id, date_of_membership, is_active FROM library_users WHERE id = $1",
        )
        .bind(member_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(member)
    }

    async fn lock_book(&mut self, book_id: i32) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(&format!(
            "SELECT {} FROM books WHERE id = $1 FOR UPDATE",
            BOOK_COLUMNS
        ))
        .bind(book_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(book)
    }

    async fn find_open_transaction(
        &mut self,
        member_id: i32,
        book_id: i32,
    ) -> AppResult<Option<Transaction>> {
        let open = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE member_id = $1 AND book_id = $2 AND return_date IS NULL
            FOR UPDATE
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(member_id)
        .bind(book_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(open)
    }

    async fn set_copies_available(&mut self, book_id: i32, copies: i32) -> AppResult<()> {
        sqlx::query("UPDATE books SET copies_available = $2 WHERE id = $1")
            .bind(book_id)
            .bind(copies)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_transaction(
        &mut self,
        member_id: i32,
        book_id: i32,
        checkout_date: DateTime<Utc>,
    ) -> AppResult<Transaction> {
        let txn = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            INSERT INTO transactions (member_id, book_id, checkout_date, return_date)
            VALUES ($1, $2, $3, NULL)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(member_id)
        .bind(book_id)
        .bind(checkout_date)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(txn)
    }

    async fn close_transaction(
        &mut self,
        transaction_id: i32,
        return_date: DateTime<Utc>,
    ) -> AppResult<Option<Transaction>> {
        let closed = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            UPDATE transactions SET return_date = $2
            WHERE id = $1 AND return_date IS NULL
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(return_date)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(closed)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
