//! User, credential, and API key repository implementation.
//!
//! Passwords are hashed with argon2id. API key secrets are random, carry the
//! `dbn_` prefix, and only their SHA-256 digest is stored; the plaintext is
//! returned exactly once at issue time.

use std::time::Duration;

use argon2::password_hash::{rand_core::OsRng as PasswordOsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::{Pool, Postgres, Row};
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use notebase_core::defaults;
use notebase_core::{
    ApiKeyInfo, ApiKeyKind, Error, IssuedKey, Result, Role, User, UserRepository,
};

/// PostgreSQL implementation of UserRepository.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: Pool<Postgres>,
}

impl PgUserRepository {
    /// Create a new PgUserRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Generate a fresh API key secret: `dbn_` + 32 hex chars.
    pub fn generate_secret() -> String {
        let mut bytes = [0u8; defaults::API_KEY_SECRET_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        format!("{}{}", defaults::API_KEY_PREFIX, hex::encode(bytes))
    }

    /// SHA-256 digest of a secret, hex-encoded. Stored instead of the secret.
    pub fn hash_secret(secret: &str) -> String {
        hex::encode(Sha256::digest(secret.as_bytes()))
    }

    /// Generate a random bootstrap password.
    pub fn random_password() -> String {
        use rand::distributions::Alphanumeric;
        use rand::Rng;
        rand::rngs::OsRng
            .sample_iter(&Alphanumeric)
            .take(20)
            .map(char::from)
            .collect()
    }

    /// Hash a password with argon2id and a fresh salt.
    pub fn hash_password(password: &str) -> Result<String> {
        let password = Zeroizing::new(password.to_string());
        let salt = SaltString::generate(&mut PasswordOsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| Error::Internal(format!("Password hashing failed: {}", e)))
    }

    /// Verify a password against a stored argon2 hash.
    pub fn verify_password(password: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    fn check_password_policy(password: &str) -> Result<()> {
        if password.len() < defaults::MIN_PASSWORD_LENGTH {
            return Err(Error::InvalidInput(format!(
                "password must be at least {} characters",
                defaults::MIN_PASSWORD_LENGTH
            )));
        }
        Ok(())
    }

    fn row_to_user(row: &sqlx::postgres::PgRow) -> Result<User> {
        let role: String = row.get("role");
        Ok(User {
            id: row.get("id"),
            username: row.get("username"),
            role: role.parse()?,
            must_rotate: row.get("must_rotate"),
            created_at: row.get("created_at"),
        })
    }

    async fn issue_key(
        &self,
        user_id: Uuid,
        kind: ApiKeyKind,
        lifetime: Option<Duration>,
    ) -> Result<IssuedKey> {
        let secret = Self::generate_secret();
        let id = Uuid::new_v4();
        let expires_at =
            lifetime.map(|l| Utc::now() + chrono::Duration::seconds(l.as_secs() as i64));

        sqlx::query(
            r#"
            INSERT INTO api_key (id, user_id, kind, secret_hash, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(kind.to_string())
        .bind(Self::hash_secret(&secret))
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(IssuedKey {
            info: ApiKeyInfo {
                id,
                user_id,
                kind,
                created_at: Utc::now(),
                expires_at,
            },
            secret,
        })
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create_user(
        &self,
        username: &str,
        password: &str,
        role: Role,
        must_rotate: bool,
    ) -> Result<(User, IssuedKey)> {
        if username.trim().is_empty() {
            return Err(Error::InvalidInput("username must not be empty".to_string()));
        }
        Self::check_password_policy(password)?;

        let id = Uuid::new_v4();
        let password_hash = Self::hash_password(password)?;

        sqlx::query(
            r#"
            INSERT INTO app_user (id, username, password_hash, role, must_rotate)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(username.trim())
        .bind(&password_hash)
        .bind(role.to_string())
        .bind(must_rotate)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::InvalidInput(format!("username '{}' is taken", username.trim()))
            }
            _ => Error::Database(e),
        })?;

        let key = self.issue_key(id, ApiKeyKind::Primary, None).await?;

        let user = self
            .get(id)
            .await?
            .ok_or_else(|| Error::Internal("user vanished after insert".to_string()))?;

        info!(
            subsystem = "db",
            component = "users",
            user_id = %id,
            role = %role,
            "User created"
        );
        Ok((user, key))
    }

    async fn get(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, role, must_rotate, created_at FROM app_user WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn list(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(
            "SELECT id, username, role, must_rotate, created_at FROM app_user ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::row_to_user).collect()
    }

    async fn verify_login(&self, username: &str, password: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, password_hash, role, must_rotate, created_at
            FROM app_user WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some(row) = row else {
            // Burn a verification anyway so missing and wrong usernames take
            // comparable time.
            let _ = Self::verify_password(password, DUMMY_HASH);
            return Ok(None);
        };

        let stored: String = row.get("password_hash");
        if !Self::verify_password(password, &stored) {
            warn!(
                subsystem = "db",
                component = "users",
                username,
                "Failed login attempt"
            );
            return Ok(None);
        }

        Ok(Some(Self::row_to_user(&row)?))
    }

    async fn set_password(&self, user_id: Uuid, password: &str) -> Result<()> {
        Self::check_password_policy(password)?;
        let password_hash = Self::hash_password(password)?;

        let result = sqlx::query(
            "UPDATE app_user SET password_hash = $2, must_rotate = false WHERE id = $1",
        )
        .bind(user_id)
        .bind(&password_hash)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("user {}", user_id)));
        }

        info!(
            subsystem = "db",
            component = "users",
            user_id = %user_id,
            "Password rotated"
        );
        Ok(())
    }

    async fn regenerate_primary_key(&self, user_id: Uuid) -> Result<IssuedKey> {
        sqlx::query(
            r#"
            UPDATE api_key SET revoked_at = now()
            WHERE user_id = $1 AND kind = 'primary' AND revoked_at IS NULL
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let key = self.issue_key(user_id, ApiKeyKind::Primary, None).await?;

        info!(
            subsystem = "db",
            component = "users",
            user_id = %user_id,
            "Primary API key regenerated"
        );
        Ok(key)
    }

    async fn create_session_key(&self, user_id: Uuid, lifetime: Duration) -> Result<IssuedKey> {
        self.issue_key(user_id, ApiKeyKind::Session, Some(lifetime))
            .await
    }

    async fn validate_key(&self, secret: &str) -> Result<Option<(User, ApiKeyInfo)>> {
        if !secret.starts_with(defaults::API_KEY_PREFIX) {
            return Ok(None);
        }

        let row = sqlx::query(
            r#"
            SELECT k.id AS key_id, k.kind, k.created_at AS key_created_at, k.expires_at,
                   u.id, u.username, u.role, u.must_rotate, u.created_at
            FROM api_key k
            JOIN app_user u ON u.id = k.user_id
            WHERE k.secret_hash = $1
              AND k.revoked_at IS NULL
              AND (k.expires_at IS NULL OR k.expires_at > now())
            "#,
        )
        .bind(Self::hash_secret(secret))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let user = Self::row_to_user(&row)?;
        let kind: String = row.get("kind");
        let info = ApiKeyInfo {
            id: row.get("key_id"),
            user_id: user.id,
            kind: kind.parse()?,
            created_at: row.get("key_created_at"),
            expires_at: row.get("expires_at"),
        };
        Ok(Some((user, info)))
    }

    async fn revoke_key(&self, key_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE api_key SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL")
            .bind(key_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM app_user")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.get("count"))
    }
}

/// Valid argon2 hash of an unknowable password, used to equalize login
/// timing for unknown usernames.
const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$S4XzN9EMJLdGsqhiFOnnrCyA07Y0lkHAYNdnE9ohJWk";
