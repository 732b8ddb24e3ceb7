use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Fallback profile picture for accounts created without one.
pub const DEFAULT_AVATAR: &str = "https://cdn-icons-png.flaticon.com/512/149/149071.png";

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,                   // unique user ID
    pub username: String,           // unique handle
    pub email: String,              // unique login email
    #[serde(skip_serializing)]
    pub password_hash: String,      // Argon2 hash, not exposed in JSON
    pub avatar: String,             // profile picture URL
    pub created_at: OffsetDateTime, // creation timestamp
}
