//! Session and token service.
//!
//! Every issued bearer token is a signed JWT *and* a row in the sessions
//! table. The signature proves the token was not tampered with; the row is
//! what makes revocation work, since logout or a password change can delete
//! it long before the signature expires. Both expiry authorities are derived
//! from a single issued-at + TTL computation so they cannot drift.

use anyhow::{Context, Result};
use chrono::{Duration, SecondsFormat, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::db::{DbPool, Session, User};

/// Claims embedded in every issued token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub email: String,
    /// Session id. Timestamps alone have second granularity, so without
    /// this two logins in the same second would mint byte-identical
    /// tokens and per-session revocation could not tell them apart.
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
}

/// Hash a token for storage. Sessions are matched by this digest, which is
/// equivalent to exact-token matching without keeping bearer tokens
/// readable at rest.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Issue a signed token for the user and persist the matching session row.
///
/// The JWT `exp` claim and the session row's `expires_at` are computed from
/// the same instant.
pub async fn issue(pool: &DbPool, auth: &AuthConfig, user: &User) -> Result<String> {
    let issued_at = Utc::now();
    let expires_at = issued_at + Duration::days(auth.token_ttl_days);
    let session_id = Uuid::new_v4().to_string();

    let claims = Claims {
        sub: user.id.clone(),
        email: user.email.clone(),
        jti: session_id.clone(),
        iat: issued_at.timestamp(),
        exp: expires_at.timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(auth.jwt_secret.as_bytes()),
    )
    .context("Failed to sign session token")?;

    sqlx::query(
        "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&session_id)
    .bind(&user.id)
    .bind(hash_token(&token))
    .bind(expires_at.to_rfc3339_opts(SecondsFormat::Secs, true))
    .bind(issued_at.to_rfc3339_opts(SecondsFormat::Secs, true))
    .execute(pool)
    .await?;

    Ok(token)
}

/// Verify a token's signature and expiry claim. Expired and malformed
/// tokens are distinct failures; both surface to clients as 401.
pub fn verify(secret: &str, token: &str) -> Result<Claims, TokenError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid,
    })
}

/// Look up a live (unexpired) session row for the exact token. This check
/// runs on every authenticated request and is never cached; it is what
/// makes logout effective while the signature still verifies.
pub async fn find_live(pool: &DbPool, token: &str) -> Result<Option<Session>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM sessions WHERE token_hash = ? AND datetime(expires_at) > datetime('now')",
    )
    .bind(hash_token(token))
    .fetch_optional(pool)
    .await
}

/// Delete the session matching the exact token. Used on logout.
pub async fn revoke(pool: &DbPool, token: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
        .bind(hash_token(token))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Delete every session for the user except the one matching
/// `current_token`. Used on password change so other devices are logged
/// out but the device that performed the change stays in.
pub async fn revoke_all_except(
    pool: &DbPool,
    user_id: &str,
    current_token: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE user_id = ? AND token_hash != ?")
        .bind(user_id)
        .bind(hash_token(current_token))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Periodic cleanup of expired session rows.
///
/// Advisory only: validity is re-verified on every request, so the cadence
/// affects storage growth, not correctness. The sweeper is an explicit
/// value with a start/stop lifecycle rather than a timer started on import,
/// so tests can drive it and supervisors cannot double-start it.
pub struct SessionSweeper {
    db: DbPool,
    interval: std::time::Duration,
}

impl SessionSweeper {
    pub fn new(db: DbPool, interval_secs: u64) -> Self {
        Self {
            db,
            interval: std::time::Duration::from_secs(interval_secs),
        }
    }

    /// Run a single sweep cycle, returning the number of rows removed.
    pub async fn sweep_once(&self) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM sessions WHERE datetime(expires_at) <= datetime('now')")
                .execute(&self.db)
                .await?;
        let removed = result.rows_affected();
        if removed > 0 {
            tracing::info!(removed, "Swept expired sessions");
        }
        Ok(removed)
    }

    /// Spawn the sweep loop. The returned handle stops it.
    pub fn start(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick fires immediately; skip it so startup isn't
            // serialized behind a sweep.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            tracing::warn!(error = %e, "Session sweep failed");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            tracing::debug!("Session sweeper stopped");
        });
        SweeperHandle { shutdown_tx, task }
    }
}

pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_auth_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".to_string(),
            token_ttl_days: 7,
            session_sweep_interval: 3600,
        }
    }

    async fn insert_user(pool: &DbPool, id: &str, email: &str) -> User {
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, first_name, last_name) \
             VALUES (?, ?, 'hash', 'Jane', 'Doe')",
        )
        .bind(id)
        .bind(email)
        .execute(pool)
        .await
        .unwrap();
        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_issue_and_verify_roundtrip() {
        let pool = db::init_in_memory().await.unwrap();
        let auth = test_auth_config();
        let user = insert_user(&pool, "u1", "jane@firm.test").await;

        let token = issue(&pool, &auth, &user).await.unwrap();
        let claims = verify(&auth.jwt_secret, &token).unwrap();

        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.email, "jane@firm.test");
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 3600);
    }

    #[tokio::test]
    async fn test_token_and_session_expiries_agree() {
        let pool = db::init_in_memory().await.unwrap();
        let auth = test_auth_config();
        let user = insert_user(&pool, "u1", "jane@firm.test").await;

        let token = issue(&pool, &auth, &user).await.unwrap();
        let claims = verify(&auth.jwt_secret, &token).unwrap();

        let session = find_live(&pool, &token).await.unwrap().unwrap();
        let row_exp = chrono::DateTime::parse_from_rfc3339(&session.expires_at)
            .unwrap()
            .timestamp();
        assert_eq!(row_exp, claims.exp);
    }

    #[tokio::test]
    async fn test_revoke_defeats_valid_signature() {
        let pool = db::init_in_memory().await.unwrap();
        let auth = test_auth_config();
        let user = insert_user(&pool, "u1", "jane@firm.test").await;

        let token = issue(&pool, &auth, &user).await.unwrap();
        assert!(find_live(&pool, &token).await.unwrap().is_some());

        assert_eq!(revoke(&pool, &token).await.unwrap(), 1);

        // Signature still verifies but the session is gone.
        assert!(verify(&auth.jwt_secret, &token).is_ok());
        assert!(find_live(&pool, &token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tokens_are_unique_per_session() {
        let pool = db::init_in_memory().await.unwrap();
        let auth = test_auth_config();
        let user = insert_user(&pool, "u1", "jane@firm.test").await;

        // Issued back to back, almost certainly within the same second;
        // the session id claim must still make them distinct.
        let a = issue(&pool, &auth, &user).await.unwrap();
        let b = issue(&pool, &auth, &user).await.unwrap();
        assert_ne!(a, b);
        assert_ne!(hash_token(&a), hash_token(&b));

        let claims_a = verify(&auth.jwt_secret, &a).unwrap();
        let claims_b = verify(&auth.jwt_secret, &b).unwrap();
        assert_ne!(claims_a.jti, claims_b.jti);
    }

    #[tokio::test]
    async fn test_revoke_all_except_keeps_current() {
        let pool = db::init_in_memory().await.unwrap();
        let auth = test_auth_config();
        let user = insert_user(&pool, "u1", "jane@firm.test").await;

        let other_a = issue(&pool, &auth, &user).await.unwrap();
        let other_b = issue(&pool, &auth, &user).await.unwrap();
        let current = issue(&pool, &auth, &user).await.unwrap();

        let removed = revoke_all_except(&pool, "u1", &current).await.unwrap();
        assert_eq!(removed, 2);

        assert!(find_live(&pool, &current).await.unwrap().is_some());
        assert!(find_live(&pool, &other_a).await.unwrap().is_none());
        assert!(find_live(&pool, &other_b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_verify_rejects_expired_distinctly() {
        let auth = test_auth_config();
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "u1".to_string(),
            email: "jane@firm.test".to_string(),
            jti: "s1".to_string(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(auth.jwt_secret.as_bytes()),
        )
        .unwrap();

        assert_eq!(verify(&auth.jwt_secret, &token), Err(TokenError::Expired));
        assert_eq!(
            verify(&auth.jwt_secret, "not-a-token"),
            Err(TokenError::Invalid)
        );
        assert_eq!(
            verify("wrong-secret", &token),
            Err(TokenError::Invalid)
        );
    }

    #[tokio::test]
    async fn test_sweeper_removes_only_expired_rows() {
        let pool = db::init_in_memory().await.unwrap();
        let auth = test_auth_config();
        let user = insert_user(&pool, "u1", "jane@firm.test").await;

        let live = issue(&pool, &auth, &user).await.unwrap();

        // Manually insert an already-expired session.
        let past = (Utc::now() - Duration::days(1)).to_rfc3339_opts(SecondsFormat::Secs, true);
        sqlx::query(
            "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) \
             VALUES ('s-old', 'u1', 'stale-hash', ?, ?)",
        )
        .bind(&past)
        .bind(&past)
        .execute(&pool)
        .await
        .unwrap();

        let sweeper = SessionSweeper::new(pool.clone(), 3600);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert!(find_live(&pool, &live).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweeper_start_stop() {
        let pool = db::init_in_memory().await.unwrap();
        let handle = SessionSweeper::new(pool, 3600).start();
        handle.stop().await;
    }
}
