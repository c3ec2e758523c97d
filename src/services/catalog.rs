//! Catalog management service

use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::book::{Book, BookQuery, CreateBook, UpdateBook},
    repository::Repository,
};

#[derive(Clone)]
pub struct CatalogService {
    repository: Repository,
}

impl CatalogService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// List the catalog, available or not
    pub async fn list_books(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)> {
        self.repository.books.list(query).await
    }

    pub async fn get_book(&self, id: i32) -> AppResult<Book> {
        self.repository.books.get_by_id(id).await
    }

    /// Create a new book
    pub async fn create_book(&self, book: CreateBook) -> AppResult<Book> {
        book.validate()?;
        let created = self.repository.books.create(&book).await?;
        tracing::info!(book_id = created.id, isbn = %created.isbn, "Book created");
        Ok(created)
    }

    /// Update a book.
    ///
    /// Setting `copies_available` here is a stock correction; circulation
    /// itself only moves the counter through checkout and return.
    pub async fn update_book(&self, id: i32, book: UpdateBook) -> AppResult<Book> {
        book.validate()?;
        self.repository.books.update(id, &book).await
    }

    /// Delete a book. Refused while copies are checked out unless `force`.
    pub async fn delete_book(&self, id: i32, force: bool) -> AppResult<()> {
        let open = self.repository.books.count_open_transactions(id).await?;
        if open > 0 && !force {
            return Err(AppError::BusinessRule(format!(
                "Book has {} copies checked out",
                open
            )));
        }
        self.repository.books.delete(id).await?;
        tracing::info!(book_id = id, force, "Book deleted");
        Ok(())
    }
}
