use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use log::error;
use serde::Deserialize;
use serde_json::json;
use tower_cookies::cookie::SameSite;
use tower_cookies::{Cookie, Cookies};
use uuid::Uuid;

use crate::api::{api_error, ApiError};
use crate::shared::models::{NewSession, UpsertUser, User};
use crate::shared::state::AppState;

pub const SESSION_COOKIE: &str = "botforge.sid";
const SESSION_TTL_DAYS: i64 = 7;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/user", get(current_user))
        .route("/api/auth/discord", get(discord_login))
        .route("/api/auth/discord/callback", get(discord_callback))
}

/// Resolves the user behind the request's session cookie, if any.
pub fn session_user(state: &AppState, cookies: &Cookies) -> Option<User> {
    let sid = cookies.get(SESSION_COOKIE)?.value().to_string();
    let session = state.storage.get_session(&sid).ok().flatten()?;
    let user_id = session.sess.get("userId")?.as_str()?.to_string();
    state.storage.get_user(&user_id).ok().flatten()
}

fn start_session(state: &AppState, cookies: &Cookies, user_id: &str) -> Result<(), ApiError> {
    let sid = Uuid::new_v4().to_string();
    state
        .storage
        .put_session(NewSession {
            sid: sid.clone(),
            sess: json!({ "userId": user_id }),
            expire: Utc::now() + Duration::days(SESSION_TTL_DAYS),
        })
        .map_err(|e| {
            error!("Failed to store session: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Login failed")
        })?;
    let mut cookie = Cookie::new(SESSION_COOKIE, sid);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookies.add(cookie);
    Ok(())
}

fn end_session(state: &AppState, cookies: &Cookies) {
    if let Some(cookie) = cookies.get(SESSION_COOKIE) {
        let sid = cookie.value().to_string();
        if let Err(e) = state.storage.delete_session(&sid) {
            error!("Failed to delete session: {}", e);
        }
    }
    let mut cookie = Cookie::new(SESSION_COOKIE, "");
    cookie.set_path("/");
    cookies.remove(cookie);
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    email: Option<String>,
    password: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

async fn register(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let (Some(email), Some(password)) = (body.email.as_deref(), body.password.as_deref()) else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Email and password are required",
        ));
    };
    if email.is_empty() || password.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Email and password are required",
        ));
    }

    let existing = state.storage.get_user_by_email(email).map_err(|e| {
        error!("Registration error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to register user")
    })?;
    if existing.is_some() {
        return Err(api_error(StatusCode::CONFLICT, "User already exists"));
    }

    let password_hash = hash_password(password).map_err(|e| {
        error!("Password hashing error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to register user")
    })?;

    let user = state
        .storage
        .upsert_user(UpsertUser {
            id: Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            first_name: body.first_name,
            last_name: body.last_name,
            profile_image_url: None,
            provider: "email".to_string(),
            provider_id: None,
            password_hash: Some(password_hash),
        })
        .map_err(|e| {
            error!("Registration error: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to register user")
        })?;

    start_session(&state, &cookies, &user.id)?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: Option<String>,
    password: Option<String>,
}

async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(body): Json<LoginRequest>,
) -> Result<Json<User>, ApiError> {
    let (Some(email), Some(password)) = (body.email.as_deref(), body.password.as_deref()) else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Email and password are required",
        ));
    };

    let user = state.storage.get_user_by_email(email).map_err(|e| {
        error!("Authentication error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Authentication error")
    })?;
    let Some(user) = user else {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "Invalid email or password",
        ));
    };
    let valid = user
        .password_hash
        .as_deref()
        .map(|hash| verify_password(password, hash))
        .unwrap_or(false);
    if !valid {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "Invalid email or password",
        ));
    }

    start_session(&state, &cookies, &user.id)?;
    Ok(Json(user))
}

async fn logout(State(state): State<AppState>, cookies: Cookies) -> Json<serde_json::Value> {
    end_session(&state, &cookies);
    Json(json!({ "message": "Logged out successfully" }))
}

async fn current_user(
    State(state): State<AppState>,
    cookies: Cookies,
) -> Result<Json<User>, ApiError> {
    session_user(&state, &cookies)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Not authenticated"))
}

async fn discord_login(State(state): State<AppState>) -> Result<Redirect, ApiError> {
    let Some(oauth) = state.config.discord_oauth.as_ref() else {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Discord login is not configured",
        ));
    };
    let url = format!(
        "https://discord.com/oauth2/authorize?client_id={}&redirect_uri={}&response_type=code&scope=identify%20email",
        oauth.client_id,
        urlencoding::encode(&oauth.callback_url)
    );
    Ok(Redirect::temporary(&url))
}

#[derive(Debug, Deserialize)]
struct OAuthCallback {
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct DiscordProfile {
    id: String,
    username: String,
    email: Option<String>,
    avatar: Option<String>,
}

async fn discord_callback(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<OAuthCallback>,
) -> Result<Redirect, ApiError> {
    let Some(oauth) = state.config.discord_oauth.as_ref() else {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Discord login is not configured",
        ));
    };
    let Some(code) = query.code.as_deref() else {
        return Err(api_error(StatusCode::BAD_REQUEST, "Missing authorization code"));
    };

    let client = reqwest::Client::new();
    let token: OAuthToken = client
        .post("https://discord.com/api/v10/oauth2/token")
        .form(&[
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", oauth.callback_url.as_str()),
        ])
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| {
            error!("Discord token exchange failed: {}", e);
            api_error(StatusCode::BAD_GATEWAY, "Discord authentication failed")
        })?
        .json()
        .await
        .map_err(|e| {
            error!("Discord token exchange failed: {}", e);
            api_error(StatusCode::BAD_GATEWAY, "Discord authentication failed")
        })?;

    let profile: DiscordProfile = client
        .get("https://discord.com/api/v10/users/@me")
        .header("Authorization", format!("Bearer {}", token.access_token))
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| {
            error!("Discord profile fetch failed: {}", e);
            api_error(StatusCode::BAD_GATEWAY, "Discord authentication failed")
        })?
        .json()
        .await
        .map_err(|e| {
            error!("Discord profile fetch failed: {}", e);
            api_error(StatusCode::BAD_GATEWAY, "Discord authentication failed")
        })?;

    // Returning users keep their id; first sign-in mints one.
    let user_id = state
        .storage
        .get_user_by_provider_id("discord", &profile.id)
        .map_err(|e| {
            error!("Discord login error: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Login failed")
        })?
        .map(|u| u.id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let avatar = profile.avatar.as_ref().map(|hash| {
        format!(
            "https://cdn.discordapp.com/avatars/{}/{}.png",
            profile.id, hash
        )
    });
    let user = state
        .storage
        .upsert_user(UpsertUser {
            id: user_id,
            email: profile.email,
            first_name: Some(profile.username.clone()),
            last_name: None,
            profile_image_url: avatar,
            provider: "discord".to_string(),
            provider_id: Some(profile.id),
            password_hash: None,
        })
        .map_err(|e| {
            error!("Discord login error: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Login failed")
        })?;

    start_session(&state, &cookies, &user.id)?;
    Ok(Redirect::temporary("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use crate::storage::BotStore;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert_ne!(hash, "hunter2");
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
    }

    #[test]
    fn verify_rejects_malformed_hashes() {
        assert!(!verify_password("anything", "not-a-phc-string"));
        assert!(!verify_password("anything", ""));
    }

    #[test]
    fn expired_sessions_are_not_returned() {
        let store = MemoryStore::new();
        store
            .put_session(NewSession {
                sid: "sid-1".to_string(),
                sess: json!({ "userId": "u1" }),
                expire: Utc::now() - Duration::hours(1),
            })
            .unwrap();
        assert!(store.get_session("sid-1").unwrap().is_none());

        store
            .put_session(NewSession {
                sid: "sid-2".to_string(),
                sess: json!({ "userId": "u1" }),
                expire: Utc::now() + Duration::hours(1),
            })
            .unwrap();
        assert!(store.get_session("sid-2").unwrap().is_some());
    }
}
