use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// Persisted lifecycle state of a bot record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotStatus {
    Offline,
    Deploying,
    Online,
    Error,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Deploying => "deploying",
            Self::Online => "online",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable)]
#[diesel(table_name = schema::bots)]
#[serde(rename_all = "camelCase")]
pub struct Bot {
    pub id: i32,
    pub user_id: String,
    pub name: String,
    pub token: String,
    pub template_id: String,
    pub status: String,
    pub config: serde_json::Value,
    pub invite_url: Option<String>,
    pub discord_bot_id: Option<String>,
    pub guild_count: i32,
    pub created_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::bots)]
pub struct NewBot {
    pub user_id: String,
    pub name: String,
    pub token: String,
    pub template_id: String,
    pub status: String,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable, Selectable)]
#[diesel(table_name = schema::templates)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub features: serde_json::Value,
    pub price: i32,
    pub is_popular: bool,
    pub is_premium: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable)]
#[diesel(table_name = schema::users)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub provider: String,
    pub provider_id: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = schema::users)]
pub struct UpsertUser {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub provider: String,
    pub provider_id: Option<String>,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable)]
#[diesel(table_name = schema::analytics)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub id: i32,
    pub total_users: i32,
    pub total_bots: i32,
    pub bots_online: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = schema::sessions)]
#[diesel(primary_key(sid))]
pub struct Session {
    pub sid: String,
    pub sess: serde_json::Value,
    pub expire: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::sessions)]
pub struct NewSession {
    pub sid: String,
    pub sess: serde_json::Value,
    pub expire: DateTime<Utc>,
}

/// Message pushed to every open browser connection on a lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub bot_id: i32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl StatusEvent {
    pub fn bot_status_change(bot_id: i32, status: &str, data: Option<serde_json::Value>) -> Self {
        Self {
            kind: "bot_status_change".to_string(),
            bot_id,
            status: status.to_string(),
            data,
        }
    }
}

pub mod schema {
    diesel::table! {
        users (id) {
            id -> Varchar,
            email -> Nullable<Varchar>,
            first_name -> Nullable<Varchar>,
            last_name -> Nullable<Varchar>,
            profile_image_url -> Nullable<Varchar>,
            provider -> Varchar,
            provider_id -> Nullable<Varchar>,
            password_hash -> Nullable<Varchar>,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        bots (id) {
            id -> Int4,
            user_id -> Varchar,
            name -> Text,
            token -> Text,
            template_id -> Text,
            status -> Text,
            config -> Jsonb,
            invite_url -> Nullable<Text>,
            discord_bot_id -> Nullable<Text>,
            guild_count -> Int4,
            created_at -> Timestamptz,
            last_seen -> Nullable<Timestamptz>,
        }
    }

    diesel::table! {
        templates (id) {
            id -> Text,
            name -> Text,
            description -> Text,
            category -> Text,
            features -> Jsonb,
            price -> Int4,
            is_popular -> Bool,
            is_premium -> Bool,
        }
    }

    diesel::table! {
        analytics (id) {
            id -> Int4,
            total_users -> Int4,
            total_bots -> Int4,
            bots_online -> Int4,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        sessions (sid) {
            sid -> Varchar,
            sess -> Jsonb,
            expire -> Timestamptz,
        }
    }
}

pub use schema::*;
