use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{GoogleLoginRequest, LoginRequest, MessageResponse, PublicUser, SignupRequest},
        error::ApiError,
        jwt::{JwtKeys, ACCESS_TOKEN_COOKIE},
        password::{generate_throwaway_password, hash_password, verify_password},
        repo_types::{User, DEFAULT_AVATAR},
    },
    db::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/google", post(google))
        .route("/logout", post(logout))
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn session_cookie(token: String) -> Cookie<'static> {
    // Cross-site cookie: the SPA is served from another origin
    Cookie::build((ACCESS_TOKEN_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::None)
        .build()
}

/// Token + redacted user record, the shared tail of every login path.
fn authenticated(
    state: &AppState,
    jar: CookieJar,
    user: User,
) -> Result<(CookieJar, Json<PublicUser>), ApiError> {
    let keys = JwtKeys::from_ref(state);
    let token = keys.sign(user.id)?;
    Ok((jar.add(session_cookie(token)), Json(PublicUser::from(user))))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(mut payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    payload.username = payload.username.trim().to_string();
    payload.email = payload.email.trim().to_lowercase();

    if payload.username.is_empty() || payload.email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::Validation(
            "Username, email, and password are required".to_string(),
        ));
    }
    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::Validation("Invalid email".to_string()));
    }

    let hash = hash_password(&payload.password)?;
    let user = User::create(
        &state.db,
        &payload.username,
        &payload.email,
        &hash,
        DEFAULT_AVATAR,
    )
    .await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "User created successfully",
        }),
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(mut payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<PublicUser>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if payload.email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::Validation(
            "Email and password are required".to_string(),
        ));
    }

    let user = User::find_by_email(&state.db, &payload.email)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(email = %payload.email, user_id = %user.id, "login invalid password");
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    info!(user_id = %user.id, email = %user.email, "user logged in");
    authenticated(&state, jar, user)
}

#[instrument(skip(state, jar, payload))]
pub async fn google(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(mut payload): Json<GoogleLoginRequest>,
) -> Result<(CookieJar, Json<PublicUser>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();
    payload.name = payload.name.trim().to_string();

    if payload.email.is_empty() || payload.name.is_empty() {
        return Err(ApiError::Validation(
            "Email and name are required".to_string(),
        ));
    }
    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::Validation("Invalid email".to_string()));
    }

    if let Some(user) = User::find_by_email(&state.db, &payload.email).await? {
        info!(user_id = %user.id, email = %user.email, "google user logged in");
        return authenticated(&state, jar, user);
    }

    let user = provision_google_user(&state, &payload).await?;
    info!(user_id = %user.id, email = %user.email, "google user provisioned");
    authenticated(&state, jar, user)
}

#[instrument(skip(jar))]
pub async fn logout(jar: CookieJar) -> (CookieJar, Json<MessageResponse>) {
    let jar = jar.remove(Cookie::build(ACCESS_TOKEN_COOKIE).path("/"));
    (
        jar,
        Json(MessageResponse {
            message: "Logged out successfully",
        }),
    )
}

const PROVISION_ATTEMPTS: u32 = 3;

/// First Google sign-in: mint a local account. The generated username can
/// collide, so creation retries with a fresh suffix; an email conflict
/// means a concurrent sign-in won the race and its record is reused.
async fn provision_google_user(
    state: &AppState,
    payload: &GoogleLoginRequest,
) -> Result<User, ApiError> {
    let avatar = if payload.photo.is_empty() {
        DEFAULT_AVATAR
    } else {
        payload.photo.as_str()
    };

    let mut last_conflict = None;
    for _ in 0..PROVISION_ATTEMPTS {
        let username = generate_username(&payload.name);
        let hash = hash_password(&generate_throwaway_password())?;

        match User::create(&state.db, &username, &payload.email, &hash, avatar).await {
            Ok(user) => return Ok(user),
            Err(ApiError::Conflict(msg)) => {
                if let Some(user) = User::find_by_email(&state.db, &payload.email).await? {
                    return Ok(user);
                }
                warn!(%username, "generated username taken, retrying");
                last_conflict = Some(ApiError::Conflict(msg));
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_conflict
        .unwrap_or_else(|| ApiError::Conflict("Could not allocate a username".to_string())))
}

fn generate_username(name: &str) -> String {
    let base: String = name.split_whitespace().collect::<String>().to_lowercase();
    format!("{base}{}", random_suffix(4))
}

fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}
