//! Users repository: accounts and their library memberships

use sqlx::{PgConnection, Pool, Postgres, Row};

use crate::{
    error::{AppError, AppResult},
    models::user::{Account, LibraryUser, UserProfile, UserQuery},
};

use super::circulation::like_pattern;

const ACCOUNT_COLUMNS: &str =
    "id, username, email, password_hash, first_name, last_name, is_staff, created_at";
const MEMBER_COLUMNS: &str = "id, account_id, date_of_membership, is_active";

/// Rows listed by `search`; `$1` is the optional ILIKE pattern
const SEARCH_FROM: &str = r#"
    FROM accounts a
    JOIN library_users m ON m.account_id = a.id
    WHERE $1::TEXT IS NULL
       OR a.username ILIKE $1 OR a.email ILIKE $1
       OR a.first_name ILIKE $1 OR a.last_name ILIKE $1
"#;

/// New account row, password already hashed
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
}

/// Insert the membership row for `account_id` on the given connection
async fn insert_membership(conn: &mut PgConnection, account_id: i32) -> AppResult<LibraryUser> {
    let member = sqlx::query_as::<_, LibraryUser>(&format!(
        r#"
        INSERT INTO library_users (account_id, date_of_membership, is_active)
        VALUES ($1, CURRENT_DATE, TRUE)
        RETURNING {}
        "#,
        MEMBER_COLUMNS
    ))
    .bind(account_id)
    .fetch_one(conn)
    .await?;
    Ok(member)
}

#[derive(Clone)]
pub struct UsersRepository {
    pool: Pool<Postgres>,
}

impl UsersRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get account by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Account> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))
    }

    /// Get account by username (case-insensitive)
    pub async fn get_by_username(&self, username: &str) -> AppResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE LOWER(username) = LOWER($1)",
            ACCOUNT_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    /// Check if username already exists
    pub async fn username_exists(&self, username: &str) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM accounts WHERE LOWER(username) = LOWER($1))",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Check if email already exists
    pub async fn email_exists(&self, email: &str, exclude_id: Option<i32>) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM accounts
                WHERE LOWER(email) = LOWER($1) AND ($2::INTEGER IS NULL OR id != $2)
            )
            "#,
        )
        .bind(email)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Membership linked to an account
    pub async fn get_membership(&self, account_id: i32) -> AppResult<LibraryUser> {
        sqlx::query_as::<_, LibraryUser>(&format!(
            "SELECT {} FROM library_users WHERE account_id = $1",
            MEMBER_COLUMNS
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("No membership for user with id {}", account_id))
        })
    }

    /// Create the account and provision its membership in one transaction
    pub async fn create_with_membership(
        &self,
        account: &NewAccount,
    ) -> AppResult<(Account, LibraryUser)> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query_as::<_, Account>(&format!(
            r#"
            INSERT INTO accounts (username, email, password_hash, first_name, last_name, is_staff)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(account.is_staff)
        .fetch_one(&mut *tx)
        .await?;

        let member = insert_membership(&mut tx, created.id).await?;
        tx.commit().await?;

        Ok((created, member))
    }

    /// Provision a membership for an existing account
    pub async fn create_membership(&self, account_id: i32) -> AppResult<LibraryUser> {
        let mut conn = self.pool.acquire().await?;
        insert_membership(&mut conn, account_id).await
    }

    /// Search accounts with their memberships, paginated
    pub async fn search(&self, query: &UserQuery) -> AppResult<(Vec<UserProfile>, i64)> {
        let page = query.pagination();

        let pattern = query
            .name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", SEARCH_FROM))
            .bind(&pattern)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT a.id, a.username, a.email, a.first_name, a.last_name, a.is_staff,
                   m.id AS member_id, m.date_of_membership, m.is_active
            {}
            ORDER BY a.username
            LIMIT $2 OFFSET $3
            "#,
            SEARCH_FROM
        ))
        .bind(&pattern)
        .bind(page.per_page)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let users = rows
            .iter()
            .map(|row| UserProfile {
                id: row.get("id"),
                username: row.get("username"),
                email: row.get("email"),
                first_name: row.get("first_name"),
                last_name: row.get("last_name"),
                is_staff: row.get("is_staff"),
                membership: LibraryUser {
                    id: row.get("member_id"),
                    account_id: row.get("id"),
                    date_of_membership: row.get("date_of_membership"),
                    is_active: row.get("is_active"),
                },
            })
            .collect();

        Ok((users, total))
    }

    /// Update profile fields. Absent fields keep their current value.
    pub async fn update_profile(
        &self,
        id: i32,
        email: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
        password_hash: Option<&str>,
    ) -> AppResult<Account> {
        sqlx::query_as::<_, Account>(&format!(
            r#"
            UPDATE accounts SET
                email = COALESCE($2, email),
                first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                password_hash = COALESCE($5, password_hash)
            WHERE id = $1
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .bind(email)
        .bind(first_name)
        .bind(last_name)
        .bind(password_hash)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))
    }

    /// Set the active flag on the membership of `account_id`
    pub async fn set_membership_active(&self, account_id: i32, is_active: bool) -> AppResult<LibraryUser> {
        sqlx::query_as::<_, LibraryUser>(&format!(
            "UPDATE library_users SET is_active = $2 WHERE account_id = $1 RETURNING {}",
            MEMBER_COLUMNS
        ))
        .bind(account_id)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("No membership for user with id {}", account_id))
        })
    }

    /// Count books a member currently has out
    pub async fn count_open_transactions(&self, member_id: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transactions WHERE member_id = $1 AND return_date IS NULL",
        )
        .bind(member_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Delete an account; the membership and its history go with it
    pub async fn delete(&self, id: i32) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User with id {} not found", id)));
        }
        Ok(())
    }
}
