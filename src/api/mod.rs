pub mod auth;
mod cases;
mod documents;
pub mod error;
pub mod rate_limit;
mod validation;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .config
        .cors
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public, tight rate limit)
    let public_auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    // Auth routes that require a live session
    let protected_auth_routes = Router::new()
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/profile", put(auth::update_profile))
        .route("/password", put(auth::change_password))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    // Admin-only routes: role check layered inside the auth middleware
    let admin_routes = Router::new()
        .route("/users", get(auth::list_users))
        .layer(middleware::from_fn(auth::require_admin))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let case_routes = Router::new()
        .route("/", get(cases::list_cases))
        .route("/", post(cases::create_case))
        .route("/stats/overview", get(cases::case_stats))
        .route("/:id", get(cases::get_case))
        .route("/:id", put(cases::update_case))
        .route("/:id", delete(cases::delete_case))
        .route("/:id/notes", post(cases::add_note))
        .route("/:id/deadlines", post(cases::add_deadline));

    // Multipart bodies need headroom beyond the file-size ceiling for the
    // other form parts
    let body_limit = state.config.storage.max_upload_bytes as usize + 64 * 1024;
    let document_routes = Router::new()
        .route("/upload/:case_id", post(documents::upload_document))
        .route("/download/:document_id", get(documents::download_document))
        .route("/:document_id", delete(documents::delete_document))
        .layer(DefaultBodyLimit::max(body_limit));

    let protected_api_routes = Router::new()
        .nest("/cases", case_routes)
        .nest("/documents", document_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    let cors = cors_layer(&state);

    Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api/auth",
            public_auth_routes
                .merge(protected_auth_routes)
                .merge(admin_routes),
        )
        .nest("/api", protected_api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
