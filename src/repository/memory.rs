//! In-memory circulation store for tests, local demos and embedding.
//!
//! A scope holds the store's single async mutex from `begin` until it is
//! committed or dropped, so scopes run one at a time. Writes go to a private
//! copy of the state that replaces the shared state on commit.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    error::{AppError, AppResult},
    models::{
        book::{Book, BookFilter},
        transaction::{Transaction, TransactionQuery},
        user::LibraryUser,
    },
};

use super::circulation::{CirculationStore, CirculationTx};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    books: BTreeMap<i32, Book>,
    members: BTreeMap<i32, LibraryUser>,
    transactions: Vec<Transaction>,
}

#[derive(Clone, Default)]
pub struct MemoryCirculationStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryCirculationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a book
    pub async fn put_book(&self, book: Book) {
        self.state.lock().await.books.insert(book.id, book);
    }

    /// Insert or replace a member
    pub async fn put_member(&self, member: LibraryUser) {
        self.state.lock().await.members.insert(member.id, member);
    }

    pub async fn book(&self, book_id: i32) -> Option<Book> {
        self.state.lock().await.books.get(&book_id).cloned()
    }

    /// Full transaction log in insertion order
    pub async fn transactions(&self) -> Vec<Transaction> {
        self.state.lock().await.transactions.clone()
    }
}

struct MemoryTx {
    shared: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl CirculationStore for MemoryCirculationStore {
    async fn begin(&self) -> AppResult<Box<dyn CirculationTx>> {
        let shared = self.state.clone().lock_owned().await;
        let working = shared.clone();
        Ok(Box::new(MemoryTx { shared, working }))
    }

    async fn list_available(&self, filter: &BookFilter) -> AppResult<Vec<Book>> {
        let state = self.state.lock().await;
        let mut books: Vec<Book> = state
            .books
            .values()
            .filter(|b| b.is_available() && filter.matches(b))
            .cloned()
            .collect();
        books.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(books)
    }

    async fn history(&self, query: &TransactionQuery) -> AppResult<(Vec<Transaction>, i64)> {
        let page = query.pagination();

        let state = self.state.lock().await;
        let mut matching: Vec<Transaction> = state
            .transactions
            .iter()
            .filter(|t| query.member_id.map_or(true, |m| t.member_id == m))
            .filter(|t| query.book_id.map_or(true, |b| t.book_id == b))
            .filter(|t| !query.open_only.unwrap_or(false) || t.is_open())
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.checkout_date
                .cmp(&a.checkout_date)
                .then(b.id.cmp(&a.id))
        });

        let total = matching.len() as i64;
        let page_rows = matching
            .into_iter()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(page.per_page as usize)
            .collect();
        Ok((page_rows, total))
    }
}

#[async_trait]
impl CirculationTx for MemoryTx {
    async fn find_member(&mut self, member_id: i32) -> AppResult<Option<LibraryUser>> {
        Ok(self.working.members.get(&member_id).cloned())
    }

    async fn lock_book(&mut self, book_id: i32) -> AppResult<Option<Book>> {
        Ok(self.working.books.get(&book_id).cloned())
    }

    async fn find_open_transaction(
        &mut self,
        member_id: i32,
        book_id: i32,
    ) -> AppResult<Option<Transaction>> {
        Ok(self
            .working
            .transactions
            .iter()
            .find(|t| t.member_id == member_id && t.book_id == book_id && t.is_open())
            .cloned())
    }

    async fn set_copies_available(&mut self, book_id: i32, copies: i32) -> AppResult<()> {
        // Mirrors the CHECK (copies_available >= 0) constraint
        if copies < 0 {
            return Err(AppError::Internal(format!(
                "copies_available for book {} would become {}",
                book_id, copies
            )));
        }
        let book = self
            .working
            .books
            .get_mut(&book_id)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;
        book.copies_available = copies;
        Ok(())
    }

    async fn insert_transaction(
        &mut self,
        member_id: i32,
        book_id: i32,
        checkout_date: DateTime<Utc>,
    ) -> AppResult<Transaction> {
        // Mirrors the partial unique index on open transactions
        if self
            .working
            .transactions
            .iter()
            .any(|t| t.member_id == member_id && t.book_id == book_id && t.is_open())
        {
            return Err(AppError::TransactionConflict(format!(
                "open transaction already exists for member {} and book {}",
                member_id, book_id
            )));
        }

        let id = self.working.transactions.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        let txn = Transaction {
            id,
            book_id,
            member_id,
            checkout_date,
            return_date: None,
        };
        self.working.transactions.push(txn.clone());
        Ok(txn)
    }

    async fn close_transaction(
        &mut self,
        transaction_id: i32,
        return_date: DateTime<Utc>,
    ) -> AppResult<Option<Transaction>> {
        Ok(self
            .working
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction_id && t.is_open())
            .map(|t| {
                t.return_date = Some(return_date);
                t.clone()
            }))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTx { mut shared, working } = *self;
        *shared = working;
        Ok(())
    }
}
