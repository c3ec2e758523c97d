//! Authentication, account and membership service

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    config::AuthConfig,
    error::{AppError, AppResult},
    models::user::{
        Account, LibraryUser, RegisterUser, TokenKind, TokenPair, UpdateProfile, UserClaims,
        UserProfile, UserQuery,
    },
    repository::{users::NewAccount, Repository},
};

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

pub fn verify_password(hash: &str, password: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[derive(Clone)]
pub struct UsersService {
    repository: Repository,
    config: AuthConfig,
}

impl UsersService {
    pub fn new(repository: Repository, config: AuthConfig) -> Self {
        Self { repository, config }
    }

    /// Register a new account and provision its membership
    pub async fn register(&self, user: RegisterUser) -> AppResult<UserProfile> {
        user.validate()?;

        if self.repository.users.username_exists(&user.username).await? {
            return Err(AppError::Conflict("Username already exists".to_string()));
        }
        if self.repository.users.email_exists(&user.email, None).await? {
            return Err(AppError::Conflict("Email already exists".to_string()));
        }

        let account = NewAccount {
            username: user.username,
            email: user.email,
            password_hash: hash_password(&user.password)?,
            first_name: user.first_name,
            last_name: user.last_name,
            is_staff: false,
        };

        let (account, membership) = self.repository.users.create_with_membership(&account).await?;
        tracing::info!(
            account_id = account.id,
            member_id = membership.id,
            "Account registered"
        );

        Ok(UserProfile::new(account, membership))
    }

    /// Create the configured staff account if it does not exist yet
    pub async fn ensure_bootstrap_staff(&self) -> AppResult<()> {
        let Some(staff) = self.config.bootstrap_staff.clone() else {
            return Ok(());
        };
        if self.repository.users.username_exists(&staff.username).await? {
            return Ok(());
        }

        let account = NewAccount {
            username: staff.username,
            email: staff.email,
            password_hash: hash_password(&staff.password)?,
            first_name: String::new(),
            last_name: String::new(),
            is_staff: true,
        };
        let (account, membership) = self.repository.users.create_with_membership(&account).await?;
        tracing::info!(
            account_id = account.id,
            member_id = membership.id,
            username = %account.username,
            "Bootstrap staff account created"
        );
        Ok(())
    }

    /// Provision the membership for an account registered without one
    pub async fn create_membership(&self, account_id: i32) -> AppResult<LibraryUser> {
        self.repository.users.get_by_id(account_id).await?;
        let membership = self.repository.users.create_membership(account_id).await?;
        tracing::info!(account_id, member_id = membership.id, "Membership created");
        Ok(membership)
    }

    /// Authenticate by username and password, returning a token pair
    pub async fn authenticate(&self, username: &str, password: &str) -> AppResult<TokenPair> {
        let account = self
            .repository
            .users
            .get_by_username(username)
            .await?
            .ok_or_else(|| AppError::Authentication("Invalid username or password".to_string()))?;

        if !verify_password(&account.password_hash, password)? {
            return Err(AppError::Authentication("Invalid username or password".to_string()));
        }

        let membership = self.repository.users.get_membership(account.id).await?;
        self.issue_pair(&account, &membership)
    }

    /// Exchange a refresh token for a fresh access token
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<TokenPair> {
        let claims = UserClaims::from_token(refresh_token, &self.config.jwt_secret)
            .map_err(|e| AppError::Authentication(e.to_string()))?;
        if claims.kind != TokenKind::Refresh {
            return Err(AppError::Authentication("Not a refresh token".to_string()));
        }

        // Pick up staff/membership changes made since the refresh token was issued
        let account = self.repository.users.get_by_id(claims.account_id).await?;
        let membership = self.repository.users.get_membership(account.id).await?;

        let now = Utc::now().timestamp();
        let access = self
            .base_claims(&account, &membership, now)
            .create_token(&self.config.jwt_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))?;

        Ok(TokenPair {
            access,
            refresh: refresh_token.to_string(),
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl(),
        })
    }

    pub async fn get_profile(&self, account_id: i32) -> AppResult<UserProfile> {
        let account = self.repository.users.get_by_id(account_id).await?;
        let membership = self.repository.users.get_membership(account_id).await?;
        Ok(UserProfile::new(account, membership))
    }

    pub async fn search_users(&self, query: &UserQuery) -> AppResult<(Vec<UserProfile>, i64)> {
        self.repository.users.search(query).await
    }

    /// Update own profile; changing the password requires the current one
    pub async fn update_profile(&self, account_id: i32, profile: UpdateProfile) -> AppResult<UserProfile> {
        profile.validate()?;

        let account = self.repository.users.get_by_id(account_id).await?;

        if let Some(ref email) = profile.email {
            if self.repository.users.email_exists(email, Some(account_id)).await? {
                return Err(AppError::Conflict("Email already exists".to_string()));
            }
        }

        let password_hash = match profile.new_password {
            Some(ref new_password) => {
                let current = profile.current_password.as_deref().ok_or_else(|| {
                    AppError::Validation("current_password is required to change password".to_string())
                })?;
                if !verify_password(&account.password_hash, current)? {
                    return Err(AppError::Authentication("Current password is incorrect".to_string()));
                }
                Some(hash_password(new_password)?)
            }
            None => None,
        };

        let updated = self
            .repository
            .users
            .update_profile(
                account_id,
                profile.email.as_deref(),
                profile.first_name.as_deref(),
                profile.last_name.as_deref(),
                password_hash.as_deref(),
            )
            .await?;
        let membership = self.repository.users.get_membership(account_id).await?;

        Ok(UserProfile::new(updated, membership))
    }

    pub async fn set_membership_active(&self, account_id: i32, is_active: bool) -> AppResult<LibraryUser> {
        let membership = self
            .repository
            .users
            .set_membership_active(account_id, is_active)
            .await?;
        tracing::info!(account_id, member_id = membership.id, is_active, "Membership status changed");
        Ok(membership)
    }

    /// Delete an account. Refused while its member has books out unless `force`.
    pub async fn delete_user(&self, account_id: i32, force: bool) -> AppResult<()> {
        let membership = self.repository.users.get_membership(account_id).await?;
        let open = self
            .repository
            .users
            .count_open_transactions(membership.id)
            .await?;
        if open > 0 && !force {
            return Err(AppError::BusinessRule(format!(
                "User has {} books checked out",
                open
            )));
        }

        self.repository.users.delete(account_id).await?;
        tracing::info!(account_id, force, "Account deleted");
        Ok(())
    }

    fn access_ttl(&self) -> i64 {
        self.config.access_token_minutes * 60
    }

    fn refresh_ttl(&self) -> i64 {
        self.config.refresh_token_hours * 3600
    }

    fn base_claims(&self, account: &Account, membership: &LibraryUser, now: i64) -> UserClaims {
        UserClaims {
            sub: account.username.clone(),
            account_id: account.id,
            member_id: membership.id,
            is_staff: account.is_staff,
            kind: TokenKind::Access,
            exp: now + self.access_ttl(),
            iat: now,
        }
    }

    fn issue_pair(&self, account: &Account, membership: &LibraryUser) -> AppResult<TokenPair> {
        let now = Utc::now().timestamp();
        let access_claims = self.base_claims(account, membership, now);
        let refresh_claims = access_claims.reissue(TokenKind::Refresh, now, self.refresh_ttl());

        let sign = |claims: &UserClaims| {
            claims
                .create_token(&self.config.jwt_secret)
                .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
        };

        Ok(TokenPair {
            access: sign(&access_claims)?,
            refresh: sign(&refresh_claims)?,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl(),
        })
    }
}
