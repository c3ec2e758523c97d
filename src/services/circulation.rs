//! Circulation ledger: checkout, return and availability.
//!
//! Each checkout and return runs as one store scope. A scope aborted by the
//! store on contention is re-run from the start a bounded number of times.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::{
    config::CirculationConfig,
    error::{AppError, AppResult},
    models::{
        book::{Book, BookFilter},
        transaction::{Transaction, TransactionQuery},
    },
    repository::circulation::CirculationStore,
};

#[derive(Clone)]
pub struct CirculationService {
    store: Arc<dyn CirculationStore>,
    config: CirculationConfig,
}

impl CirculationService {
    pub fn new(store: Arc<dyn CirculationStore>, config: CirculationConfig) -> Self {
        Self { store, config }
    }

    /// Check out one copy of `book_id` to `member_id`
    pub async fn checkout(&self, member_id: i32, book_id: i32) -> AppResult<Transaction> {
        let txn = self
            .with_conflict_retry("checkout", || self.try_checkout(member_id, book_id))
            .await?;

        tracing::info!(
            member_id,
            book_id,
            transaction_id = txn.id,
            "Book checked out"
        );
        Ok(txn)
    }

    /// Return the copy of `book_id` that `member_id` has out
    pub async fn return_book(&self, member_id: i32, book_id: i32) -> AppResult<Transaction> {
        let txn = self
            .with_conflict_retry("return", || self.try_return(member_id, book_id))
            .await?;

        tracing::info!(
            member_id,
            book_id,
            transaction_id = txn.id,
            "Book returned"
        );
        Ok(txn)
    }

    pub async fn list_available(&self, filter: &BookFilter) -> AppResult<Vec<Book>> {
        self.store.list_available(filter).await
    }

    pub async fn history(&self, query: &TransactionQuery) -> AppResult<(Vec<Transaction>, i64)> {
        self.store.history(query).await
    }

    async fn try_checkout(&self, member_id: i32, book_id: i32) -> AppResult<Transaction> {
        let mut tx = self.store.begin().await?;

        let member = tx
            .find_member(member_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Member with id {} not found", member_id)))?;
        if !member.is_active {
            return Err(AppError::Authorization("Membership is inactive".to_string()));
        }

        let book = tx
            .lock_book(book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;

        if tx.find_open_transaction(member_id, book_id).await?.is_some() {
            return Err(AppError::DuplicateCheckout { member_id, book_id });
        }

        if book.copies_available <= 0 {
            return Err(AppError::NoCopiesAvailable { book_id });
        }

        tx.set_copies_available(book_id, book.copies_available - 1)
            .await?;
        let txn = tx.insert_transaction(member_id, book_id, Utc::now()).await?;
        tx.commit().await?;

        Ok(txn)
    }

    async fn try_return(&self, member_id: i32, book_id: i32) -> AppResult<Transaction> {
        let mut tx = self.store.begin().await?;

        let book = tx
            .lock_book(book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;

        let open = tx
            .find_open_transaction(member_id, book_id)
            .await?
            .ok_or(AppError::NotCheckedOut { member_id, book_id })?;

        // First committer wins: a concurrent return that closed it first leaves nothing to close
        let closed = tx
            .close_transaction(open.id, Utc::now())
            .await?
            .ok_or(AppError::NotCheckedOut { member_id, book_id })?;

        tx.set_copies_available(book_id, book.copies_available + 1)
            .await?;
        tx.commit().await?;

        Ok(closed)
    }

    async fn with_conflict_retry<T, F, Fut>(&self, operation: &'static str, mut attempt_fn: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut retries = 0u32;
        loop {
            match attempt_fn().await {
                Err(e) if e.is_retryable() && retries < self.config.max_conflict_retries => {
                    retries += 1;
                    tracing::warn!(operation, retries, error = %e, "Transaction conflict, retrying");
                    tokio::time::sleep(Duration::from_millis(
                        self.config.retry_backoff_ms * u64::from(retries),
                    ))
                    .await;
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(operation, retries, error = %e, "Transaction conflict, giving up");
                    return Err(e);
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use crate::models::user::LibraryUser;
    use crate::repository::circulation::{CirculationTx, MockCirculationStore};
    use crate::repository::memory::MemoryCirculationStore;

    const ISBN: &str = "1234567890123";

    fn config() -> CirculationConfig {
        CirculationConfig {
            max_conflict_retries: 3,
            retry_backoff_ms: 1,
        }
    }

    fn book(id: i32, title: &str, copies: i32) -> Book {
        Book {
            id,
            title: title.to_string(),
            author: "J. R. R. Tolkien".into(),
            isbn: if id == 1 { ISBN.to_string() } else { format!("{:013}", id) },
            published_date: NaiveDate::from_ymd_opt(1954, 7, 29).unwrap(),
            copies_available: copies,
        }
    }

    fn member(id: i32) -> LibraryUser {
        LibraryUser {
            id,
            account_id: id + 100,
            date_of_membership: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            is_active: true,
        }
    }

    async fn ledger_with(books: Vec<Book>) -> (CirculationService, MemoryCirculationStore) {
        let store = MemoryCirculationStore::new();
        for b in books {
            store.put_book(b).await;
        }
        for m in 1..=3 {
            store.put_member(member(m)).await;
        }
        let service = CirculationService::new(Arc::new(store.clone()), config());
        (service, store)
    }

    async fn copies(store: &MemoryCirculationStore, book_id: i32) -> i32 {
        store.book(book_id).await.unwrap().copies_available
    }

    #[tokio::test]
    async fn test_checkout_then_duplicate() {
        let (ledger, store) = ledger_with(vec![book(1, "The Hobbit", 2)]).await;

        let txn = ledger.checkout(1, 1).await.unwrap();
        assert!(txn.is_open());
        assert_eq!(copies(&store, 1).await, 1);

        let err = ledger.checkout(1, 1).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateCheckout { member_id: 1, book_id: 1 }));
        assert_eq!(copies(&store, 1).await, 1);
    }

    #[tokio::test]
    async fn test_checkout_return_cycle() {
        let (ledger, store) = ledger_with(vec![book(1, "The Hobbit", 2)]).await;

        let out = ledger.checkout(1, 1).await.unwrap();
        let back = ledger.return_book(1, 1).await.unwrap();
        assert_eq!(back.id, out.id);
        assert!(back.return_date.is_some());
        assert_eq!(back.checkout_date, out.checkout_date);
        assert_eq!(copies(&store, 1).await, 2);

        let again = ledger.checkout(1, 1).await.unwrap();
        assert_ne!(again.id, out.id);
        assert_eq!(copies(&store, 1).await, 1);
        assert_eq!(store.transactions().await.len(), 2);
    }

    #[tokio::test]
    async fn test_checkout_without_copies() {
        let (ledger, store) = ledger_with(vec![book(1, "The Hobbit", 0)]).await;

        let err = ledger.checkout(1, 1).await.unwrap_err();
        assert!(matches!(err, AppError::NoCopiesAvailable { book_id: 1 }));
        assert_eq!(copies(&store, 1).await, 0);
        assert!(store.transactions().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_book_or_member() {
        let (ledger, _) = ledger_with(vec![book(1, "The Hobbit", 1)]).await;

        assert!(matches!(ledger.checkout(1, 99).await, Err(AppError::NotFound(_))));
        assert!(matches!(ledger.checkout(99, 1).await, Err(AppError::NotFound(_))));
        assert!(matches!(ledger.return_book(1, 99).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_inactive_member_cannot_checkout() {
        let (ledger, store) = ledger_with(vec![book(1, "The Hobbit", 1)]).await;
        store
            .put_member(LibraryUser { is_active: false, ..member(2) })
            .await;

        assert!(matches!(ledger.checkout(2, 1).await, Err(AppError::Authorization(_))));
        assert_eq!(copies(&store, 1).await, 1);
    }

    #[tokio::test]
    async fn test_double_return() {
        let (ledger, store) = ledger_with(vec![book(1, "The Hobbit", 1)]).await;

        ledger.checkout(1, 1).await.unwrap();
        assert_eq!(copies(&store, 1).await, 0);

        ledger.return_book(1, 1).await.unwrap();
        let err = ledger.return_book(1, 1).await.unwrap_err();
        assert!(matches!(err, AppError::NotCheckedOut { member_id: 1, book_id: 1 }));
        assert_eq!(copies(&store, 1).await, 1);
    }

    #[tokio::test]
    async fn test_return_by_other_member_fails() {
        let (ledger, store) = ledger_with(vec![book(1, "The Hobbit", 1)]).await;

        ledger.checkout(1, 1).await.unwrap();
        assert!(matches!(
            ledger.return_book(2, 1).await,
            Err(AppError::NotCheckedOut { member_id: 2, book_id: 1 })
        ));
        assert_eq!(copies(&store, 1).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checkout_of_last_copy() {
        let (ledger, store) = ledger_with(vec![book(1, "The Hobbit", 1)]).await;

        let handles: Vec<_> = (1..=3)
            .map(|member_id| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.checkout(member_id, 1).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(AppError::NoCopiesAvailable { .. }) | Err(AppError::TransactionConflict(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(copies(&store, 1).await, 0);

        let open: Vec<_> = store.transactions().await.into_iter().filter(|t| t.is_open()).collect();
        assert_eq!(open.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_returns_first_wins() {
        let (ledger, store) = ledger_with(vec![book(1, "The Hobbit", 1)]).await;
        ledger.checkout(1, 1).await.unwrap();

        let a = tokio::spawn({
            let ledger = ledger.clone();
            async move { ledger.return_book(1, 1).await }
        });
        let b = tokio::spawn({
            let ledger = ledger.clone();
            async move { ledger.return_book(1, 1).await }
        });

        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AppError::NotCheckedOut { .. }))));
        assert_eq!(copies(&store, 1).await, 1);
    }

    #[tokio::test]
    async fn test_list_available_by_title() {
        let (ledger, _) = ledger_with(vec![
            book(1, "The Lord of the Rings", 2),
            book(2, "Lord of the Flies", 0),
            book(3, "The Hobbit", 4),
            book(4, "Warlords of Atlantis", 1),
        ])
        .await;

        let books = ledger
            .list_available(&BookFilter::default().title("lord"))
            .await
            .unwrap();
        let ids: Vec<i32> = books.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![1, 4]);
        assert!(books.iter().all(|b| b.copies_available > 0));
    }

    #[tokio::test]
    async fn test_list_available_reflects_checkout() {
        let (ledger, _) = ledger_with(vec![book(1, "The Hobbit", 1)]).await;

        assert_eq!(ledger.list_available(&BookFilter::default()).await.unwrap().len(), 1);
        ledger.checkout(1, 1).await.unwrap();
        assert!(ledger.list_available(&BookFilter::default()).await.unwrap().is_empty());

        let by_isbn = BookFilter::default().isbn(ISBN);
        ledger.return_book(1, 1).await.unwrap();
        assert_eq!(ledger.list_available(&by_isbn).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_retries_are_bounded() {
        let mut store = MockCirculationStore::new();
        store
            .expect_begin()
            .times(4)
            .returning(|| Err(AppError::TransactionConflict("could not serialize access".into())));

        let ledger = CirculationService::new(Arc::new(store), config());
        let err = ledger.checkout(1, 1).await.unwrap_err();
        assert!(matches!(err, AppError::TransactionConflict(_)));
    }

    #[tokio::test]
    async fn test_non_conflict_errors_are_not_retried() {
        let mut store = MockCirculationStore::new();
        store
            .expect_begin()
            .times(1)
            .returning(|| Err(AppError::Internal("connection refused".into())));

        let ledger = CirculationService::new(Arc::new(store), config());
        assert!(matches!(ledger.return_book(1, 1).await, Err(AppError::Internal(_))));
    }

    /// Fails the first `failures` scopes at commit time
    struct FlakyStore {
        inner: MemoryCirculationStore,
        failures: Arc<AtomicU32>,
    }

    struct FlakyTx {
        inner: Box<dyn CirculationTx>,
        fail: bool,
    }

    #[async_trait]
    impl CirculationStore for FlakyStore {
        async fn begin(&self) -> AppResult<Box<dyn CirculationTx>> {
            let fail = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            Ok(Box::new(FlakyTx {
                inner: self.inner.begin().await?,
                fail,
            }))
        }

        async fn list_available(&self, filter: &BookFilter) -> AppResult<Vec<Book>> {
            self.inner.list_available(filter).await
        }

        async fn history(&self, query: &TransactionQuery) -> AppResult<(Vec<Transaction>, i64)> {
            self.inner.history(query).await
        }
    }

    #[async_trait]
    impl CirculationTx for FlakyTx {
        async fn find_member(&mut self, member_id: i32) -> AppResult<Option<LibraryUser>> {
            self.inner.find_member(member_id).await
        }

        async fn lock_book(&mut self, book_id: i32) -> AppResult<Option<Book>> {
            self.inner.lock_book(book_id).await
        }

        async fn find_open_transaction(
            &mut self,
            member_id: i32,
            book_id: i32,
        ) -> AppResult<Option<Transaction>> {
            self.inner.find_open_transaction(member_id, book_id).await
        }

        async fn set_copies_available(&mut self, book_id: i32, copies: i32) -> AppResult<()> {
            self.inner.set_copies_available(book_id, copies).await
        }

        async fn insert_transaction(
            &mut self,
            member_id: i32,
            book_id: i32,
            checkout_date: chrono::DateTime<Utc>,
        ) -> AppResult<Transaction> {
            self.inner.insert_transaction(member_id, book_id, checkout_date).await
        }

        async fn close_transaction(
            &mut self,
            transaction_id: i32,
            return_date: chrono::DateTime<Utc>,
        ) -> AppResult<Option<Transaction>> {
            self.inner.close_transaction(transaction_id, return_date).await
        }

        async fn commit(self: Box<Self>) -> AppResult<()> {
            if self.fail {
                return Err(AppError::TransactionConflict("could not serialize access".into()));
            }
            self.inner.commit().await
        }
    }

    #[tokio::test]
    async fn test_conflict_is_retried_without_partial_state() {
        let memory = MemoryCirculationStore::new();
        memory.put_book(book(1, "The Hobbit", 2)).await;
        memory.put_member(member(1)).await;

        let failures = Arc::new(AtomicU32::new(2));
        let flaky = FlakyStore {
            inner: memory.clone(),
            failures: failures.clone(),
        };
        let ledger = CirculationService::new(Arc::new(flaky), config());

        let txn = ledger.checkout(1, 1).await.unwrap();
        assert_eq!(failures.load(Ordering::SeqCst), 0);
        assert_eq!(copies(&memory, 1).await, 1);
        assert_eq!(memory.transactions().await, vec![txn]);
    }
}
