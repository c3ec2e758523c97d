//! Data models for Stacks

pub mod book;
pub mod pagination;
pub mod transaction;
pub mod user;

// Re-export commonly used types
pub use book::{Book, BookFilter};
pub use pagination::Pagination;
pub use transaction::Transaction;
pub use user::{Account, LibraryUser, UserClaims};
