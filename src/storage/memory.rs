use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{default_templates, BotStore, StorageResult};
use crate::shared::models::{
    Analytics, Bot, NewBot, NewSession, Session, Template, UpsertUser, User,
};

/// Hash-map backed store for unit tests. Mirrors the database behavior
/// closely enough for lifecycle and handler tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    bots: HashMap<i32, Bot>,
    templates: HashMap<String, Template>,
    users: HashMap<String, User>,
    analytics: Vec<Analytics>,
    sessions: HashMap<String, Session>,
    next_bot_id: i32,
}

impl MemoryStore {
    pub fn new() -> Self {
        let store = Self::default();
        {
            let mut inner = store.inner.lock().unwrap();
            inner.next_bot_id = 1;
            for template in default_templates() {
                inner.templates.insert(template.id.clone(), template);
            }
        }
        store
    }

    fn recompute_analytics(inner: &mut Inner) {
        let snapshot = Analytics {
            id: inner.analytics.len() as i32 + 1,
            total_users: inner.users.len() as i32,
            total_bots: inner.bots.len() as i32,
            bots_online: inner
                .bots
                .values()
                .filter(|b| b.status == "online")
                .count() as i32,
            updated_at: Utc::now(),
        };
        inner.analytics.push(snapshot);
    }
}

impl BotStore for MemoryStore {
    fn get_bot(&self, id: i32) -> StorageResult<Option<Bot>> {
        Ok(self.inner.lock().unwrap().bots.get(&id).cloned())
    }

    fn get_bot_by_token(&self, token: &str) -> StorageResult<Option<Bot>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .bots
            .values()
            .find(|b| b.token == token)
            .cloned())
    }

    fn get_all_bots(&self) -> StorageResult<Vec<Bot>> {
        let mut bots: Vec<Bot> = self.inner.lock().unwrap().bots.values().cloned().collect();
        bots.sort_by_key(|b| b.id);
        Ok(bots)
    }

    fn get_user_bots(&self, user_id: &str) -> StorageResult<Vec<Bot>> {
        let mut bots: Vec<Bot> = self
            .inner
            .lock()
            .unwrap()
            .bots
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bots.sort_by_key(|b| b.id);
        Ok(bots)
    }

    fn create_bot(&self, bot: NewBot) -> StorageResult<Bot> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_bot_id;
        inner.next_bot_id += 1;
        let created = Bot {
            id,
            user_id: bot.user_id,
            name: bot.name,
            token: bot.token,
            template_id: bot.template_id,
            status: bot.status,
            config: bot.config,
            invite_url: None,
            discord_bot_id: None,
            guild_count: 0,
            created_at: Utc::now(),
            last_seen: None,
        };
        inner.bots.insert(id, created.clone());
        Self::recompute_analytics(&mut inner);
        Ok(created)
    }

    fn update_bot_status(
        &self,
        id: i32,
        status: &str,
        last_seen: Option<DateTime<Utc>>,
    ) -> StorageResult<Option<Bot>> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.bots.get_mut(&id).map(|b| {
            b.status = status.to_string();
            if last_seen.is_some() {
                b.last_seen = last_seen;
            }
            b.clone()
        }))
    }

    fn update_bot_invite_url(&self, id: i32, invite_url: &str) -> StorageResult<Option<Bot>> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.bots.get_mut(&id).map(|b| {
            b.invite_url = Some(invite_url.to_string());
            b.clone()
        }))
    }

    fn update_bot_guild_count(&self, id: i32, guild_count: i32) -> StorageResult<Option<Bot>> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.bots.get_mut(&id).map(|b| {
            b.guild_count = guild_count;
            b.clone()
        }))
    }

    fn update_bot_vendor_id(&self, id: i32, vendor_id: &str) -> StorageResult<Option<Bot>> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.bots.get_mut(&id).map(|b| {
            b.discord_bot_id = Some(vendor_id.to_string());
            b.clone()
        }))
    }

    fn delete_bot(&self, id: i32) -> StorageResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        let deleted = inner.bots.remove(&id).is_some();
        if deleted {
            Self::recompute_analytics(&mut inner);
        }
        Ok(deleted)
    }

    fn get_template(&self, id: &str) -> StorageResult<Option<Template>> {
        Ok(self.inner.lock().unwrap().templates.get(id).cloned())
    }

    fn get_all_templates(&self) -> StorageResult<Vec<Template>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .templates
            .values()
            .cloned()
            .collect())
    }

    fn get_templates_by_category(&self, category: &str) -> StorageResult<Vec<Template>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .templates
            .values()
            .filter(|t| t.category == category)
            .cloned()
            .collect())
    }

    fn create_template(&self, template: Template) -> StorageResult<Template> {
        self.inner
            .lock()
            .unwrap()
            .templates
            .insert(template.id.clone(), template.clone());
        Ok(template)
    }

    fn get_user(&self, id: &str) -> StorageResult<Option<User>> {
        Ok(self.inner.lock().unwrap().users.get(id).cloned())
    }

    fn get_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    fn get_user_by_provider_id(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> StorageResult<Option<User>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .values()
            .find(|u| u.provider == provider && u.provider_id.as_deref() == Some(provider_id))
            .cloned())
    }

    fn upsert_user(&self, user: UpsertUser) -> StorageResult<User> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let created_at = inner
            .users
            .get(&user.id)
            .map(|u| u.created_at)
            .unwrap_or(now);
        let stored = User {
            id: user.id.clone(),
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            profile_image_url: user.profile_image_url,
            provider: user.provider,
            provider_id: user.provider_id,
            password_hash: user.password_hash,
            created_at,
            updated_at: now,
        };
        inner.users.insert(stored.id.clone(), stored.clone());
        Self::recompute_analytics(&mut inner);
        Ok(stored)
    }

    fn get_analytics(&self) -> StorageResult<Option<Analytics>> {
        Ok(self.inner.lock().unwrap().analytics.last().cloned())
    }

    fn update_analytics(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::recompute_analytics(&mut inner);
        Ok(())
    }

    fn get_session(&self, sid: &str) -> StorageResult<Option<Session>> {
        let mut inner = self.inner.lock().unwrap();
        let expired = inner.sessions.get(sid).map(|s| s.expire <= Utc::now());
        match expired {
            Some(true) => {
                inner.sessions.remove(sid);
                Ok(None)
            }
            Some(false) => Ok(inner.sessions.get(sid).cloned()),
            None => Ok(None),
        }
    }

    fn put_session(&self, session: NewSession) -> StorageResult<()> {
        self.inner.lock().unwrap().sessions.insert(
            session.sid.clone(),
            Session {
                sid: session.sid,
                sess: session.sess,
                expire: session.expire,
            },
        );
        Ok(())
    }

    fn delete_session(&self, sid: &str) -> StorageResult<()> {
        self.inner.lock().unwrap().sessions.remove(sid);
        Ok(())
    }
}
