use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::error::ApiError;
use super::validation::{
    validate_email, validate_password, validate_phone, validate_required_text,
};
use crate::db::{
    AuthResponse, ChangePasswordRequest, LoginRequest, RegisterRequest, UpdateProfileRequest,
    User, UserResponse,
};
use crate::session::{self, TokenError};
use crate::AppState;

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// The authenticated caller, attached to request extensions by
/// `auth_middleware`. Carries safe user fields only (no password hash)
/// plus the raw token so handlers can revoke or exempt the current
/// session.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: UserResponse,
    pub token: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// Extract the bearer token from the Authorization header
fn bearer_token(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Resolve a bearer token to its user, enforcing every validity authority:
/// signature, expiry claim, live session row, and an active user account.
pub async fn authenticate(state: &AppState, token: &str) -> Result<UserResponse, ApiError> {
    let claims = session::verify(&state.config.auth.jwt_secret, token).map_err(|e| match e {
        TokenError::Expired => ApiError::unauthorized("Token expired"),
        TokenError::Invalid => ApiError::unauthorized("Invalid token"),
    })?;

    // The session row is authoritative for revocation; a cryptographically
    // valid token with no live row has been logged out.
    session::find_live(&state.db, token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Session expired or revoked"))?;

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&claims.sub)
        .fetch_optional(&state.db)
        .await?;

    match user {
        Some(u) if u.is_active => Ok(UserResponse::from(u)),
        _ => Err(ApiError::unauthorized("Account is not active")),
    }
}

/// Auth middleware: validates the bearer token and attaches `CurrentUser`
/// for downstream handlers.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    let user = authenticate(&state, &token).await?;

    request.extensions_mut().insert(CurrentUser { user, token });
    Ok(next.run(request).await)
}

/// Second-stage role check. Must be layered inside `auth_middleware` so
/// the current user is already resolved.
pub async fn require_admin(request: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let current = request
        .extensions()
        .get::<CurrentUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if current.user.role != "admin" {
        return Err(ApiError::forbidden("Administrator role required"));
    }
    Ok(next.run(request).await)
}

fn validate_register_request(req: &RegisterRequest) -> Result<(), ApiError> {
    let mut errors = super::error::ValidationErrorBuilder::new();

    if let Err(e) = validate_email(&req.email) {
        errors.add("email", e);
    }
    if let Err(e) = validate_password(&req.password) {
        errors.add("password", e);
    }
    if let Err(e) = validate_required_text(&req.first_name, "First name", 100) {
        errors.add("firstName", e);
    }
    if let Err(e) = validate_required_text(&req.last_name, "Last name", 100) {
        errors.add("lastName", e);
    }
    if let Err(e) = validate_phone(&req.phone) {
        errors.add("phone", e);
    }

    errors.finish()
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    validate_register_request(&req)?;

    // Email is a case-insensitive identity; stored lowercased
    let email = req.email.trim().to_lowercase();

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let id = Uuid::new_v4().to_string();
    let password_hash = hash_password(&req.password).map_err(|e| {
        tracing::error!(error = %e, "Password hashing failed");
        ApiError::internal("Failed to create account")
    })?;
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO users (id, email, password_hash, first_name, last_name, firm_name, phone, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&email)
    .bind(&password_hash)
    .bind(&req.first_name)
    .bind(&req.last_name)
    .bind(&req.firm_name)
    .bind(&req.phone)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await
    .map_err(|e| {
        // Concurrent registration can still hit the unique constraint
        if e.to_string().contains("UNIQUE constraint failed") {
            ApiError::conflict("An account with this email already exists")
        } else {
            tracing::error!(error = %e, "Failed to create user");
            ApiError::internal("Failed to create account")
        }
    })?;

    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    let token = session::issue(&state.db, &state.config.auth, &user)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to issue session token");
            ApiError::internal("Failed to create session")
        })?;

    tracing::info!(user_id = %id, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "Account created".to_string(),
            user: UserResponse::from(user),
            token,
        }),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = req.email.trim().to_lowercase();

    // Unknown email and wrong password are deliberately the same failure.
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    let user = user.ok_or_else(|| ApiError::unauthorized("Invalid email or password"))?;

    if !verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::unauthorized("Invalid email or password"));
    }

    if !user.is_active {
        return Err(ApiError::unauthorized("Account is not active"));
    }

    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
        .bind(&now)
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    let token = session::issue(&state.db, &state.config.auth, &user)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to issue session token");
            ApiError::internal("Failed to create session")
        })?;

    // Re-fetch so the response reflects the login that just happened
    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&user.id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(AuthResponse {
        message: "Login successful".to_string(),
        user: UserResponse::from(user),
        token,
    }))
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<MessageResponse>, ApiError> {
    session::revoke(&state.db, &current.token).await?;
    Ok(Json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}

#[derive(Serialize)]
pub struct ProfileResponse {
    pub user: UserResponse,
}

/// GET /api/auth/me
pub async fn me(current: CurrentUser) -> Json<ProfileResponse> {
    Json(ProfileResponse { user: current.user })
}

/// PUT /api/auth/profile
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let mut errors = super::error::ValidationErrorBuilder::new();
    if let Some(ref first_name) = req.first_name {
        if let Err(e) = validate_required_text(first_name, "First name", 100) {
            errors.add("firstName", e);
        }
    }
    if let Some(ref last_name) = req.last_name {
        if let Err(e) = validate_required_text(last_name, "Last name", 100) {
            errors.add("lastName", e);
        }
    }
    if let Some(ref phone) = req.phone {
        if let Err(e) = validate_phone(phone) {
            errors.add("phone", e);
        }
    }
    errors.finish()?;

    let existing: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&current.user.id)
        .fetch_one(&state.db)
        .await?;

    let first_name = req.first_name.unwrap_or(existing.first_name);
    let last_name = req.last_name.unwrap_or(existing.last_name);
    // Absent key keeps the stored value; explicit null clears it
    let firm_name = req.firm_name.unwrap_or(existing.firm_name);
    let phone = req.phone.unwrap_or(existing.phone);
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "UPDATE users SET first_name = ?, last_name = ?, firm_name = ?, phone = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(&first_name)
    .bind(&last_name)
    .bind(&firm_name)
    .bind(&phone)
    .bind(&now)
    .bind(&current.user.id)
    .execute(&state.db)
    .await?;

    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&current.user.id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(ProfileResponse {
        user: UserResponse::from(user),
    }))
}

/// PUT /api/auth/password
///
/// Changing the password revokes every other session for the user; the
/// session that performed the change stays valid.
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if let Err(e) = validate_password(&req.new_password) {
        return Err(ApiError::validation_field("newPassword", e));
    }

    // The extension carries safe fields only; re-fetch for the hash.
    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&current.user.id)
        .fetch_one(&state.db)
        .await?;

    if !verify_password(&req.current_password, &user.password_hash) {
        return Err(ApiError::unauthorized("Current password is incorrect"));
    }

    let password_hash = hash_password(&req.new_password).map_err(|e| {
        tracing::error!(error = %e, "Password hashing failed");
        ApiError::internal("Failed to change password")
    })?;
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(&password_hash)
        .bind(&now)
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    let revoked = session::revoke_all_except(&state.db, &user.id, &current.token).await?;
    tracing::info!(user_id = %user.id, revoked, "Password changed, other sessions revoked");

    Ok(Json(MessageResponse {
        message: "Password changed".to_string(),
    }))
}

#[derive(Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
}

/// GET /api/auth/users (admin only)
pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<UserListResponse>, ApiError> {
    let users: Vec<User> = sqlx::query_as("SELECT * FROM users ORDER BY created_at DESC")
        .fetch_all(&state.db)
        .await?;

    Ok(Json(UserListResponse {
        users: users.into_iter().map(UserResponse::from).collect(),
    }))
}
