//! Checkout, return and transaction history endpoints

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::transaction::{Transaction, TransactionQuery},
};

use super::{AuthenticatedUser, PaginatedResponse};

/// Checkout / return request
#[derive(Deserialize, ToSchema)]
pub struct CirculationRequest {
    pub book_id: i32,
}

/// Checkout / return response
#[derive(Serialize, ToSchema)]
pub struct CirculationResponse {
    pub message: String,
    pub transaction: Transaction,
}

/// Check out a book for the authenticated member
#[utoipa::path(
    post,
    path = "/checkout",
    tag = "circulation",
    security(("bearer_auth" = [])),
    request_body = CirculationRequest,
    responses(
        (status = 201, description = "Book checked out", body = CirculationResponse),
        (status = 403, description = "Membership inactive"),
        (status = 404, description = "Book not found"),
        (status = 409, description = "Already checked out by this member, or no copies available"),
        (status = 503, description = "Concurrent update conflict, retry")
    )
)]
pub async fn checkout(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<CirculationRequest>,
) -> AppResult<(StatusCode, Json<CirculationResponse>)> {
    let transaction = state
        .services
        .circulation
        .checkout(claims.member_id, request.book_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CirculationResponse {
            message: "Book checked out successfully".to_string(),
            transaction,
        }),
    ))
}

/// Return a book the authenticated member has checked out
#[utoipa::path(
    post,
    path = "/return",
    tag = "circulation",
    security(("bearer_auth" = [])),
    request_body = CirculationRequest,
    responses(
        (status = 200, description = "Book returned", body = CirculationResponse),
        (status = 404, description = "Book not found"),
        (status = 409, description = "Book is not checked out by this member"),
        (status = 503, description = "Concurrent update conflict, retry")
    )
)]
pub async fn return_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<CirculationRequest>,
) -> AppResult<Json<CirculationResponse>> {
    let transaction = state
        .services
        .circulation
        .return_book(claims.member_id, request.book_id)
        .await?;

    Ok(Json(CirculationResponse {
        message: "Book returned successfully".to_string(),
        transaction,
    }))
}

/// Transaction history. Non-staff callers only see their own.
#[utoipa::path(
    get,
    path = "/transactions",
    tag = "circulation",
    security(("bearer_auth" = [])),
    params(TransactionQuery),
    responses(
        (status = 200, description = "Transactions, newest first", body = PaginatedResponse<Transaction>),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_transactions(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(mut query): Query<TransactionQuery>,
) -> AppResult<Json<PaginatedResponse<Transaction>>> {
    if !claims.is_staff {
        query.member_id = Some(claims.member_id);
    }

    let page = query.pagination();
    let (items, total) = state.services.circulation.history(&query).await?;

    Ok(Json(PaginatedResponse {
        items,
        total,
        page: page.page,
        per_page: page.per_page,
    }))
}
