//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{auth, books, circulation, health, users};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Stacks API",
        version = "0.3.0",
        description = "Library catalog and circulation REST API",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Auth
        auth::obtain_token,
        auth::refresh_token,
        // Books
        books::list_books,
        books::list_available,
        books::get_book,
        books::create_book,
        books::update_book,
        books::delete_book,
        // Users
        users::register,
        users::list_users,
        users::me,
        users::update_my_profile,
        users::get_user,
        users::create_membership,
        users::set_active,
        users::delete_user,
        // Circulation
        circulation::checkout,
        circulation::return_book,
        circulation::list_transactions,
    ),
    components(
        schemas(
            // Auth
            auth::LoginRequest,
            auth::RefreshRequest,
            crate::models::user::TokenPair,
            // Books
            crate::models::book::Book,
            crate::models::book::CreateBook,
            crate::models::book::UpdateBook,
            // Users
            crate::models::user::UserProfile,
            crate::models::user::LibraryUser,
            crate::models::user::RegisterUser,
            crate::models::user::UpdateProfile,
            crate::models::user::UpdateMembershipStatus,
            // Circulation
            circulation::CirculationRequest,
            circulation::CirculationResponse,
            crate::models::transaction::Transaction,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Token issuance"),
        (name = "books", description = "Catalog management"),
        (name = "users", description = "Accounts and memberships"),
        (name = "circulation", description = "Checkout, return and history")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
