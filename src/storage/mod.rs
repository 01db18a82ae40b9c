use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{info, warn};
use serde_json::json;

use crate::shared::models::schema::{analytics, bots, sessions, templates, users};
use crate::shared::models::{
    Analytics, Bot, BotStatus, NewBot, NewSession, Session, Template, UpsertUser, User,
};
use crate::shared::utils::DbPool;

#[cfg(test)]
pub mod memory;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database pool error: {0}")]
    Pool(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence gateway for bots, templates, users and analytics.
///
/// Methods are synchronous; callers on the async side go through
/// short-lived queries against the pooled connection.
pub trait BotStore: Send + Sync {
    fn get_bot(&self, id: i32) -> StorageResult<Option<Bot>>;
    fn get_bot_by_token(&self, token: &str) -> StorageResult<Option<Bot>>;
    fn get_all_bots(&self) -> StorageResult<Vec<Bot>>;
    fn get_user_bots(&self, user_id: &str) -> StorageResult<Vec<Bot>>;
    fn create_bot(&self, bot: NewBot) -> StorageResult<Bot>;
    /// Writes the new status; `last_seen` is only touched when provided,
    /// so an offline transition keeps the last online timestamp.
    fn update_bot_status(
        &self,
        id: i32,
        status: &str,
        last_seen: Option<DateTime<Utc>>,
    ) -> StorageResult<Option<Bot>>;
    fn update_bot_invite_url(&self, id: i32, invite_url: &str) -> StorageResult<Option<Bot>>;
    fn update_bot_guild_count(&self, id: i32, guild_count: i32) -> StorageResult<Option<Bot>>;
    fn update_bot_vendor_id(&self, id: i32, vendor_id: &str) -> StorageResult<Option<Bot>>;
    fn delete_bot(&self, id: i32) -> StorageResult<bool>;

    fn get_template(&self, id: &str) -> StorageResult<Option<Template>>;
    fn get_all_templates(&self) -> StorageResult<Vec<Template>>;
    fn get_templates_by_category(&self, category: &str) -> StorageResult<Vec<Template>>;
    fn create_template(&self, template: Template) -> StorageResult<Template>;

    fn get_user(&self, id: &str) -> StorageResult<Option<User>>;
    fn get_user_by_email(&self, email: &str) -> StorageResult<Option<User>>;
    fn get_user_by_provider_id(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> StorageResult<Option<User>>;
    fn upsert_user(&self, user: UpsertUser) -> StorageResult<User>;

    fn get_analytics(&self) -> StorageResult<Option<Analytics>>;
    fn update_analytics(&self) -> StorageResult<()>;

    fn get_session(&self, sid: &str) -> StorageResult<Option<Session>>;
    fn put_session(&self, session: NewSession) -> StorageResult<()>;
    fn delete_session(&self, sid: &str) -> StorageResult<()>;
}

/// Diesel-backed implementation of [`BotStore`].
pub struct DatabaseStorage {
    pool: DbPool,
}

impl DatabaseStorage {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(
        &self,
    ) -> StorageResult<diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<PgConnection>>>
    {
        self.pool.get().map_err(|e| StorageError::Pool(e.to_string()))
    }

    /// Inserts the canned template catalog, skipping ids that already exist.
    pub fn seed_templates(&self) -> StorageResult<()> {
        let mut conn = self.conn()?;
        for template in default_templates() {
            let exists: i64 = templates::table
                .filter(templates::id.eq(&template.id))
                .count()
                .get_result(&mut conn)?;
            if exists == 0 {
                info!("Seeding template {}", template.id);
                diesel::insert_into(templates::table)
                    .values(&template)
                    .execute(&mut conn)?;
            }
        }
        Ok(())
    }
}

pub fn default_templates() -> Vec<Template> {
    vec![
        Template {
            id: "moderation-pro".to_string(),
            name: "Moderation Pro".to_string(),
            description: "Advanced moderation tools with auto-moderation and logging".to_string(),
            category: "moderation".to_string(),
            features: json!([
                "Auto-moderation",
                "Warn/Kick/Ban commands",
                "Detailed logging",
                "Spam protection"
            ]),
            price: 0,
            is_popular: true,
            is_premium: false,
        },
        Template {
            id: "music-master".to_string(),
            name: "Music Master".to_string(),
            description: "High-quality music streaming with playlist support".to_string(),
            category: "music".to_string(),
            features: json!([
                "YouTube/Spotify support",
                "Queue management",
                "Audio filters",
                "Playlists"
            ]),
            price: 1499,
            is_popular: false,
            is_premium: true,
        },
        Template {
            id: "utility-hub".to_string(),
            name: "Utility Hub".to_string(),
            description: "Essential server utilities and management tools".to_string(),
            category: "utility".to_string(),
            features: json!([
                "Server info",
                "Role management",
                "Polls & reminders",
                "Welcome messages"
            ]),
            price: 0,
            is_popular: false,
            is_premium: false,
        },
        Template {
            id: "fun-zone".to_string(),
            name: "Fun Zone".to_string(),
            description: "Games and entertainment for your server".to_string(),
            category: "fun".to_string(),
            features: json!([
                "Mini-games",
                "Trivia system",
                "Economy features",
                "Leaderboards"
            ]),
            price: 499,
            is_popular: false,
            is_premium: false,
        },
    ]
}

impl BotStore for DatabaseStorage {
    fn get_bot(&self, id: i32) -> StorageResult<Option<Bot>> {
        let mut conn = self.conn()?;
        Ok(bots::table
            .find(id)
            .first::<Bot>(&mut conn)
            .optional()?)
    }

    fn get_bot_by_token(&self, token: &str) -> StorageResult<Option<Bot>> {
        let mut conn = self.conn()?;
        Ok(bots::table
            .filter(bots::token.eq(token))
            .first::<Bot>(&mut conn)
            .optional()?)
    }

    fn get_all_bots(&self) -> StorageResult<Vec<Bot>> {
        let mut conn = self.conn()?;
        Ok(bots::table.order(bots::id.asc()).load::<Bot>(&mut conn)?)
    }

    fn get_user_bots(&self, user_id: &str) -> StorageResult<Vec<Bot>> {
        let mut conn = self.conn()?;
        Ok(bots::table
            .filter(bots::user_id.eq(user_id))
            .order(bots::id.asc())
            .load::<Bot>(&mut conn)?)
    }

    fn create_bot(&self, bot: NewBot) -> StorageResult<Bot> {
        let mut conn = self.conn()?;
        let created = diesel::insert_into(bots::table)
            .values(&bot)
            .get_result::<Bot>(&mut conn)?;
        drop(conn);
        if let Err(e) = self.update_analytics() {
            warn!("Failed to update analytics after bot create: {}", e);
        }
        Ok(created)
    }

    fn update_bot_status(
        &self,
        id: i32,
        status: &str,
        last_seen: Option<DateTime<Utc>>,
    ) -> StorageResult<Option<Bot>> {
        let mut conn = self.conn()?;
        let updated = match last_seen {
            Some(last_seen) => diesel::update(bots::table.find(id))
                .set((bots::status.eq(status), bots::last_seen.eq(Some(last_seen))))
                .get_result::<Bot>(&mut conn)
                .optional()?,
            None => diesel::update(bots::table.find(id))
                .set(bots::status.eq(status))
                .get_result::<Bot>(&mut conn)
                .optional()?,
        };
        Ok(updated)
    }

    fn update_bot_invite_url(&self, id: i32, invite_url: &str) -> StorageResult<Option<Bot>> {
        let mut conn = self.conn()?;
        Ok(diesel::update(bots::table.find(id))
            .set(bots::invite_url.eq(invite_url))
            .get_result::<Bot>(&mut conn)
            .optional()?)
    }

    fn update_bot_guild_count(&self, id: i32, guild_count: i32) -> StorageResult<Option<Bot>> {
        let mut conn = self.conn()?;
        Ok(diesel::update(bots::table.find(id))
            .set(bots::guild_count.eq(guild_count))
            .get_result::<Bot>(&mut conn)
            .optional()?)
    }

    fn update_bot_vendor_id(&self, id: i32, vendor_id: &str) -> StorageResult<Option<Bot>> {
        let mut conn = self.conn()?;
        Ok(diesel::update(bots::table.find(id))
            .set(bots::discord_bot_id.eq(vendor_id))
            .get_result::<Bot>(&mut conn)
            .optional()?)
    }

    fn delete_bot(&self, id: i32) -> StorageResult<bool> {
        let mut conn = self.conn()?;
        let deleted = diesel::delete(bots::table.find(id)).execute(&mut conn)?;
        drop(conn);
        if let Err(e) = self.update_analytics() {
            warn!("Failed to update analytics after bot delete: {}", e);
        }
        Ok(deleted > 0)
    }

    fn get_template(&self, id: &str) -> StorageResult<Option<Template>> {
        let mut conn = self.conn()?;
        Ok(templates::table
            .find(id)
            .first::<Template>(&mut conn)
            .optional()?)
    }

    fn get_all_templates(&self) -> StorageResult<Vec<Template>> {
        let mut conn = self.conn()?;
        Ok(templates::table.load::<Template>(&mut conn)?)
    }

    fn get_templates_by_category(&self, category: &str) -> StorageResult<Vec<Template>> {
        let mut conn = self.conn()?;
        Ok(templates::table
            .filter(templates::category.eq(category))
            .load::<Template>(&mut conn)?)
    }

    fn create_template(&self, template: Template) -> StorageResult<Template> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(templates::table)
            .values(&template)
            .get_result::<Template>(&mut conn)?)
    }

    fn get_user(&self, id: &str) -> StorageResult<Option<User>> {
        let mut conn = self.conn()?;
        Ok(users::table
            .find(id)
            .first::<User>(&mut conn)
            .optional()?)
    }

    fn get_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        let mut conn = self.conn()?;
        Ok(users::table
            .filter(users::email.eq(email))
            .first::<User>(&mut conn)
            .optional()?)
    }

    fn get_user_by_provider_id(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> StorageResult<Option<User>> {
        let mut conn = self.conn()?;
        Ok(users::table
            .filter(users::provider.eq(provider))
            .filter(users::provider_id.eq(provider_id))
            .first::<User>(&mut conn)
            .optional()?)
    }

    fn upsert_user(&self, user: UpsertUser) -> StorageResult<User> {
        let mut conn = self.conn()?;
        let upserted = diesel::insert_into(users::table)
            .values(&user)
            .on_conflict(users::id)
            .do_update()
            .set((&user, users::updated_at.eq(diesel::dsl::now)))
            .get_result::<User>(&mut conn)?;
        drop(conn);
        if let Err(e) = self.update_analytics() {
            warn!("Failed to update analytics after user upsert: {}", e);
        }
        Ok(upserted)
    }

    fn get_analytics(&self) -> StorageResult<Option<Analytics>> {
        let mut conn = self.conn()?;
        Ok(analytics::table
            .order(analytics::id.desc())
            .first::<Analytics>(&mut conn)
            .optional()?)
    }

    fn update_analytics(&self) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let total_users: i64 = users::table.count().get_result(&mut conn)?;
        let total_bots: i64 = bots::table.count().get_result(&mut conn)?;
        let bots_online: i64 = bots::table
            .filter(bots::status.eq(BotStatus::Online.as_str()))
            .count()
            .get_result(&mut conn)?;
        diesel::insert_into(analytics::table)
            .values((
                analytics::total_users.eq(total_users as i32),
                analytics::total_bots.eq(total_bots as i32),
                analytics::bots_online.eq(bots_online as i32),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    fn get_session(&self, sid: &str) -> StorageResult<Option<Session>> {
        let mut conn = self.conn()?;
        let session = sessions::table
            .find(sid)
            .first::<Session>(&mut conn)
            .optional()?;
        match session {
            Some(s) if s.expire <= Utc::now() => {
                diesel::delete(sessions::table.find(sid)).execute(&mut conn)?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn put_session(&self, session: NewSession) -> StorageResult<()> {
        let mut conn = self.conn()?;
        diesel::insert_into(sessions::table)
            .values(&session)
            .on_conflict(sessions::sid)
            .do_update()
            .set((
                sessions::sess.eq(&session.sess),
                sessions::expire.eq(session.expire),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    fn delete_session(&self, sid: &str) -> StorageResult<()> {
        let mut conn = self.conn()?;
        diesel::delete(sessions::table.find(sid)).execute(&mut conn)?;
        Ok(())
    }
}
