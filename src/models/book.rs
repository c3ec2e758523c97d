//! Book (catalog entry) model and related types

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::pagination::Pagination;

/// ISBN-10 (last character may be `X`) or ISBN-13, no separators
pub static ISBN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[0-9]{9}[0-9Xx]|[0-9]{13})$").expect("valid ISBN pattern"));

/// Book model from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub published_date: NaiveDate,
    /// Copies currently on the shelf. Never negative.
    pub copies_available: i32,
}

impl Book {
    pub fn is_available(&self) -> bool {
        self.copies_available > 0
    }
}

/// Availability search filter.
///
/// Every field is optional and all present fields must match.
/// `title` and `author` are case-insensitive substring matches,
/// `isbn` is a case-insensitive exact match.
#[derive(Debug, Default, Clone, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct BookFilter {
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
}

impl BookFilter {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn isbn(mut self, isbn: impl Into<String>) -> Self {
        self.isbn = Some(isbn.into());
        self
    }

    /// Drop blank fields so `?title=` behaves like no title filter.
    /// Non-blank needles are kept as given, surrounding spaces included.
    pub fn normalized(&self) -> Self {
        fn clean(v: &Option<String>) -> Option<String> {
            v.as_ref().filter(|s| !s.trim().is_empty()).cloned()
        }
        Self {
            title: clean(&self.title),
            author: clean(&self.author),
            isbn: clean(&self.isbn),
        }
    }

    /// Whether `book` satisfies the text criteria. Availability is not checked here.
    pub fn matches(&self, book: &Book) -> bool {
        fn contains_ci(haystack: &str, needle: &str) -> bool {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        }

        let filter = self.normalized();
        filter.title.as_deref().map_or(true, |t| contains_ci(&book.title, t))
            && filter.author.as_deref().map_or(true, |a| contains_ci(&book.author, a))
            && filter
                .isbn
                .as_deref()
                .map_or(true, |i| book.isbn.eq_ignore_ascii_case(i))
    }
}

/// Catalog listing query parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct BookQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl BookQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.per_page)
    }
}

/// Create book request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1, max = 255, message = "Title must be 1-255 characters"))]
    pub title: String,
    #[validate(length(min = 1, max = 255, message = "Author must be 1-255 characters"))]
    pub author: String,
    #[validate(regex(path = *ISBN_RE, message = "ISBN must be 10 or 13 characters without separators"))]
    pub isbn: String,
    pub published_date: NaiveDate,
    #[validate(range(min = 0, message = "copies_available cannot be negative"))]
    pub copies_available: i32,
}

/// Update book request
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    #[validate(length(min = 1, max = 255, message = "Title must be 1-255 characters"))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Author must be 1-255 characters"))]
    pub author: Option<String>,
    #[validate(regex(path = *ISBN_RE, message = "ISBN must be 10 or 13 characters without separators"))]
    pub isbn: Option<String>,
    pub published_date: Option<NaiveDate>,
    #[validate(range(min = 0, message = "copies_available cannot be negative"))]
    pub copies_available: Option<i32>,
}
