use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_cookies::CookieManagerLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::gateway::GatewayError;
use crate::shared::models::{Analytics, Bot, BotStatus, NewBot, Template};
use crate::shared::state::AppState;

pub type ApiError = (StatusCode, Json<serde_json::Value>);

pub fn api_error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "message": message })))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/validate-token", post(validate_token))
        .route("/api/templates", get(list_templates))
        .route("/api/templates/:category", get(templates_by_category))
        .route("/api/bots", post(create_bot).get(list_bots))
        .route("/api/bots/:id", get(get_bot).delete(delete_bot))
        .route("/api/bots/:id/status", get(bot_status))
        .route("/api/analytics", get(analytics))
        .route("/ws", get(crate::relay::ws_handler))
        .merge(crate::auth::router())
        .layer(CookieManagerLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ValidateTokenRequest {
    token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenValidResponse {
    valid: bool,
    bot_info: BotInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BotInfo {
    id: String,
    username: String,
    discriminator: String,
    tag: String,
}

async fn validate_token(
    State(state): State<AppState>,
    Json(body): Json<ValidateTokenRequest>,
) -> Result<Json<TokenValidResponse>, ApiError> {
    let token = match body.token.as_deref() {
        Some(token) if !token.is_empty() => token,
        _ => return Err(api_error(StatusCode::BAD_REQUEST, "Token is required")),
    };

    let existing = state.storage.get_bot_by_token(token).map_err(|e| {
        error!("Token validation error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to validate token")
    })?;
    if existing.is_some() {
        return Err(api_error(
            StatusCode::CONFLICT,
            "This token is already in use by another bot",
        ));
    }

    match state.manager.validate_token(token).await {
        Ok(identity) => Ok(Json(TokenValidResponse {
            valid: true,
            bot_info: BotInfo {
                tag: identity.tag(),
                id: identity.id,
                username: identity.username,
                discriminator: identity.discriminator,
            },
        })),
        Err(e) => {
            let reason = match e {
                GatewayError::InvalidToken => "Invalid bot token",
                _ => "Failed to validate token",
            };
            Err((
                StatusCode::BAD_REQUEST,
                Json(json!({ "valid": false, "error": reason })),
            ))
        }
    }
}

async fn list_templates(State(state): State<AppState>) -> Result<Json<Vec<Template>>, ApiError> {
    state.storage.get_all_templates().map(Json).map_err(|e| {
        error!("Get templates error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch templates")
    })
}

async fn templates_by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<Vec<Template>>, ApiError> {
    state
        .storage
        .get_templates_by_category(&category)
        .map(Json)
        .map_err(|e| {
            error!("Get templates by category error: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch templates")
        })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBotRequest {
    user_id: Option<String>,
    name: String,
    token: String,
    template_id: String,
    #[serde(default)]
    config: serde_json::Value,
}

async fn create_bot(
    State(state): State<AppState>,
    Json(body): Json<CreateBotRequest>,
) -> Result<(StatusCode, Json<Bot>), ApiError> {
    if body.name.trim().is_empty() || body.token.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Invalid bot data"));
    }

    let template = state.storage.get_template(&body.template_id).map_err(|e| {
        error!("Create bot error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create bot")
    })?;
    if template.is_none() {
        return Err(api_error(StatusCode::NOT_FOUND, "Template not found"));
    }

    let existing = state.storage.get_bot_by_token(&body.token).map_err(|e| {
        error!("Create bot error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create bot")
    })?;
    if existing.is_some() {
        return Err(api_error(
            StatusCode::CONFLICT,
            "This token is already in use",
        ));
    }

    let config = if body.config.is_null() {
        json!({})
    } else {
        body.config.clone()
    };
    let bot = state
        .storage
        .create_bot(NewBot {
            user_id: body.user_id.unwrap_or_else(|| "anonymous".to_string()),
            name: body.name,
            token: body.token,
            template_id: body.template_id,
            status: BotStatus::Deploying.as_str().to_string(),
            config: config.clone(),
        })
        .map_err(|e| {
            error!("Create bot error: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create bot")
        })?;

    // Deployment runs in the background; the eventual outcome reaches
    // the browser over the status channel.
    let manager = state.manager.clone();
    let bot_id = bot.id;
    let token = bot.token.clone();
    let template_id = bot.template_id.clone();
    tokio::spawn(async move {
        if let Err(e) = manager.deploy_bot(bot_id, &token, &template_id, &config).await {
            error!("Failed to deploy bot {}: {}", bot_id, e);
        }
    });

    Ok((StatusCode::CREATED, Json(bot)))
}

async fn list_bots(State(state): State<AppState>) -> Result<Json<Vec<Bot>>, ApiError> {
    state.storage.get_all_bots().map(Json).map_err(|e| {
        error!("Get bots error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch bots")
    })
}

async fn get_bot(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Bot>, ApiError> {
    let bot = state.storage.get_bot(id).map_err(|e| {
        error!("Get bot error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch bot")
    })?;
    bot.map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Bot not found"))
}

async fn delete_bot(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let bot = state.storage.get_bot(id).map_err(|e| {
        error!("Delete bot error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete bot")
    })?;
    if bot.is_none() {
        return Err(api_error(StatusCode::NOT_FOUND, "Bot not found"));
    }

    state.manager.stop_bot(id).await.map_err(|e| {
        error!("Delete bot error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete bot")
    })?;

    let deleted = state.storage.delete_bot(id).map_err(|e| {
        error!("Delete bot error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete bot")
    })?;
    if deleted {
        Ok(Json(json!({ "message": "Bot stopped and deleted successfully" })))
    } else {
        Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to delete bot",
        ))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BotStatusResponse {
    id: i32,
    name: String,
    status: String,
    last_seen: Option<DateTime<Utc>>,
    invite_url: Option<String>,
    is_running: bool,
    guild_count: i32,
}

async fn bot_status(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<BotStatusResponse>, ApiError> {
    let bot = state
        .storage
        .get_bot(id)
        .map_err(|e| {
            error!("Get bot status error: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch bot status")
        })?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Bot not found"))?;

    let instance = state.manager.get_bot_instance(id);
    Ok(Json(BotStatusResponse {
        id: bot.id,
        name: bot.name,
        status: bot.status,
        last_seen: bot.last_seen,
        invite_url: bot.invite_url,
        is_running: instance.is_some(),
        guild_count: instance.map(|i| i.client.guild_count()).unwrap_or(0),
    }))
}

async fn analytics(State(state): State<AppState>) -> Result<Json<Analytics>, ApiError> {
    let snapshot = state.storage.get_analytics().map_err(|e| {
        error!("Get analytics error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch analytics")
    })?;
    if let Some(snapshot) = snapshot {
        return Ok(Json(snapshot));
    }
    // First request on a fresh install computes the initial snapshot.
    state.storage.update_analytics().map_err(|e| {
        error!("Update analytics error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch analytics")
    })?;
    state
        .storage
        .get_analytics()
        .map_err(|e| {
            error!("Get analytics error: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch analytics")
        })?
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch analytics"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ServerConfig};
    use crate::gateway::fake::{FakeFailure, FakeGateway};
    use crate::manager::BotLifecycleManager;
    use crate::relay::StatusRelay;
    use crate::storage::memory::MemoryStore;
    use crate::storage::BotStore;
    use std::sync::Arc;

    fn test_state() -> (AppState, Arc<MemoryStore>, Arc<FakeGateway>) {
        let storage = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let manager = Arc::new(BotLifecycleManager::new(storage.clone(), gateway.clone()));
        let relay = Arc::new(StatusRelay::new());
        let config = Arc::new(AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            database_url: "postgres://localhost/test".to_string(),
            discord_oauth: None,
        });
        (
            AppState::new(config, storage.clone(), manager, relay),
            storage,
            gateway,
        )
    }

    fn create_request(token: &str, template_id: &str) -> CreateBotRequest {
        CreateBotRequest {
            user_id: None,
            name: "My Bot".to_string(),
            token: token.to_string(),
            template_id: template_id.to_string(),
            config: json!({ "prefix": "!" }),
        }
    }

    #[tokio::test]
    async fn create_bot_rejects_unknown_template() {
        let (state, _, _) = test_state();
        let result = create_bot(
            State(state),
            Json(create_request("tok-1", "no-such-template")),
        )
        .await;
        let (status, _) = result.err().unwrap();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_bot_rejects_duplicate_token() {
        let (state, _, _) = test_state();
        let (status, Json(bot)) = create_bot(
            State(state.clone()),
            Json(create_request("tok-1", "fun-zone")),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(bot.status, "deploying");

        let result = create_bot(State(state), Json(create_request("tok-1", "fun-zone"))).await;
        let (status, Json(body)) = result.err().unwrap();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["message"], "This token is already in use");
    }

    #[tokio::test]
    async fn create_bot_rejects_blank_fields() {
        let (state, _, _) = test_state();
        let mut request = create_request("tok-1", "fun-zone");
        request.name = "  ".to_string();
        let result = create_bot(State(state), Json(request)).await;
        let (status, _) = result.err().unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn validate_token_flags_tokens_already_in_use() {
        let (state, _, _) = test_state();
        create_bot(
            State(state.clone()),
            Json(create_request("tok-used", "fun-zone")),
        )
        .await
        .unwrap();

        let result = validate_token(
            State(state),
            Json(ValidateTokenRequest {
                token: Some("tok-used".to_string()),
            }),
        )
        .await;
        let (status, Json(body)) = result.err().unwrap();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(
            body["message"],
            "This token is already in use by another bot"
        );
    }

    #[tokio::test]
    async fn validate_token_classifies_invalid_tokens() {
        let (state, _, gateway) = test_state();
        gateway.fail_validate_with(FakeFailure::InvalidToken);

        let result = validate_token(
            State(state),
            Json(ValidateTokenRequest {
                token: Some("bad".to_string()),
            }),
        )
        .await;
        let (status, Json(body)) = result.err().unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["valid"], false);
        assert_eq!(body["error"], "Invalid bot token");
    }

    #[tokio::test]
    async fn validate_token_requires_a_token() {
        let (state, _, _) = test_state();
        let result =
            validate_token(State(state), Json(ValidateTokenRequest { token: None })).await;
        let (status, Json(body)) = result.err().unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Token is required");
    }

    fn seed_bot(storage: &MemoryStore, token: &str, template_id: &str) -> Bot {
        storage
            .create_bot(NewBot {
                user_id: "anonymous".to_string(),
                name: "My Bot".to_string(),
                token: token.to_string(),
                template_id: template_id.to_string(),
                status: "deploying".to_string(),
                config: json!({}),
            })
            .unwrap()
    }

    #[tokio::test]
    async fn status_reports_running_instance_and_guild_count() {
        let (state, storage, _) = test_state();
        let bot = seed_bot(&storage, "tok-1", "utility-hub");

        // Deploy synchronously so the instance is live for the check.
        state
            .manager
            .deploy_bot(bot.id, "tok-1", "utility-hub", &json!({}))
            .await
            .unwrap();

        let Json(status) = bot_status(State(state.clone()), Path(bot.id))
            .await
            .unwrap();
        assert!(status.is_running);
        assert_eq!(status.guild_count, 3);
        assert_eq!(status.status, "online");
        assert!(status.invite_url.is_some());

        state.manager.stop_bot(bot.id).await.unwrap();
        let Json(status) = bot_status(State(state), Path(bot.id)).await.unwrap();
        assert!(!status.is_running);
        assert_eq!(status.guild_count, 0);
        let stored = storage.get_bot(bot.id).unwrap().unwrap();
        assert_eq!(stored.status, "offline");
    }

    #[tokio::test]
    async fn delete_stops_and_removes_the_bot() {
        let (state, storage, gateway) = test_state();
        let bot = seed_bot(&storage, "tok-1", "fun-zone");
        state
            .manager
            .deploy_bot(bot.id, "tok-1", "fun-zone", &json!({}))
            .await
            .unwrap();

        let Json(body) = delete_bot(State(state.clone()), Path(bot.id))
            .await
            .unwrap();
        assert_eq!(body["message"], "Bot stopped and deleted successfully");
        assert!(storage.get_bot(bot.id).unwrap().is_none());
        assert!(!gateway.last_client().unwrap().is_open());

        let result = delete_bot(State(state), Path(bot.id)).await;
        let (status, _) = result.err().unwrap();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn templates_endpoint_serves_the_catalog() {
        let (state, _, _) = test_state();
        let Json(all) = list_templates(State(state.clone())).await.unwrap();
        assert_eq!(all.len(), 4);

        let Json(moderation) = templates_by_category(State(state), Path("moderation".to_string()))
            .await
            .unwrap();
        assert_eq!(moderation.len(), 1);
        assert_eq!(moderation[0].id, "moderation-pro");
    }
}
