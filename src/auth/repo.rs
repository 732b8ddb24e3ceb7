use sqlx::PgPool;

use crate::auth::error::ApiError;
use crate::auth::repo_types::User;

impl User {
    /// Find a user by email.
    pub async fn find_by_email(db: &PgPool, email: &str) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, avatar, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await
        .map_err(store_fault)?;
        Ok(user)
    }

    /// Create a new user with hashed password. Unique-index violations on
    /// username or email surface as `ApiError::Conflict`.
    pub async fn create(
        db: &PgPool,
        username: &str,
        email: &str,
        password_hash: &str,
        avatar: &str,
    ) -> Result<User, ApiError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash, avatar)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, email, password_hash, avatar, created_at
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(avatar)
        .fetch_one(db)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    return ApiError::Conflict("Username or email already in use".to_string());
                }
            }
            store_fault(e)
        })
    }
}

fn store_fault(e: sqlx::Error) -> ApiError {
    ApiError::Internal(anyhow::Error::new(e))
}
