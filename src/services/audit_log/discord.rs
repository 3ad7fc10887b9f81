use super::correlator::{AuditAction, AuditLogEntry, AuditLogSource, AuditQueryError};
use super::diff::{MemberSnapshot, UserSnapshot};
use super::listener::RoleDirectory;
use crate::services::cache::ObjectCacheService;
use ::serenity::http::HttpError;
use ::serenity::cache::Cache;
use ::serenity::model::event::GuildMemberUpdateEvent;
use ::serenity::model::guild::audit_log::{Action, AuditLogEntry as RawAuditLogEntry, MemberAction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use std::collections::HashMap;
use std::num::NonZeroU16;
use std::sync::Arc;

const MISSING_PERMISSIONS: isize = 50013;

fn discriminator_label(discriminator: Option<NonZeroU16>) -> String {
    match discriminator {
        Some(d) => format!("{:04}", d.get()),
        None => "0".to_string(),
    }
}

fn timestamp_to_utc(timestamp: serenity::Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.unix_timestamp(), 0)
}

impl From<&serenity::User> for UserSnapshot {
    fn from(user: &serenity::User) -> Self {
        Self {
            id: user.id,
            username: user.name.clone(),
            discriminator: discriminator_label(user.discriminator),
            global_name: user.global_name.clone(),
            bot: user.bot,
        }
    }
}

impl From<&serenity::Member> for MemberSnapshot {
    fn from(member: &serenity::Member) -> Self {
        Self {
            user: (&member.user).into(),
            nick: member.nick.clone(),
            roles: member.roles.iter().copied().collect(),
            joined_at: member.joined_at.and_then(timestamp_to_utc),
            pending: member.pending,
        }
    }
}

// The raw gateway payload, used when the updated member is not cached.
impl From<&GuildMemberUpdateEvent> for MemberSnapshot {
    fn from(event: &GuildMemberUpdateEvent) -> Self {
        Self {
            user: (&event.user).into(),
            nick: event.nick.clone(),
            roles: event.roles.iter().copied().collect(),
            joined_at: timestamp_to_utc(event.joined_at),
            pending: event.pending,
        }
    }
}

impl From<AuditAction> for Action {
    fn from(action: AuditAction) -> Self {
        match action {
            AuditAction::MemberUpdate => Action::Member(MemberAction::Update),
            AuditAction::MemberRoleUpdate => Action::Member(MemberAction::RoleUpdate),
        }
    }
}

fn audit_action(action: &Action) -> Option<AuditAction> {
    match action {
        Action::Member(MemberAction::Update) => Some(AuditAction::MemberUpdate),
        Action::Member(MemberAction::RoleUpdate) => Some(AuditAction::MemberRoleUpdate),
        _ => None,
    }
}

fn classify_error(error: ::serenity::Error) -> AuditQueryError {
    if let ::serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) = &error {
        if response.status_code.as_u16() == 403 || response.error.code == MISSING_PERMISSIONS {
            return AuditQueryError::PermissionDenied;
        }
    }
    AuditQueryError::Unavailable(error.to_string())
}

fn convert_entry(
    entry: &RawAuditLogEntry,
    users: &HashMap<serenity::UserId, serenity::User>,
) -> Option<AuditLogEntry> {
    Some(AuditLogEntry {
        actor_id: entry.user_id,
        actor_name: users.get(&entry.user_id).map(|u| UserSnapshot::from(u).tag().to_string()),
        action: audit_action(&entry.action)?,
        target_id: entry.target_id.map(|id| id.get()),
        created_at: timestamp_to_utc(entry.id.created_at())?,
        reason: entry.reason.clone(),
    })
}

/// Reads audit entries over the REST API.
pub struct HttpAuditLogSource {
    http: Arc<serenity::Http>,
}

impl HttpAuditLogSource {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl AuditLogSource for HttpAuditLogSource {
    async fn recent_entries(
        &self,
        guild_id: serenity::GuildId,
        action: AuditAction,
        limit: u8,
    ) -> Result<Vec<AuditLogEntry>, AuditQueryError> {
        let logs = guild_id
            .audit_logs(&self.http, Some(action.into()), None, None, Some(limit))
            .await
            .map_err(classify_error)?;

        Ok(logs
            .entries
            .iter()
            .filter_map(|entry| convert_entry(entry, &logs.users))
            .collect())
    }
}

/// Role names from the gateway cache, falling back to recently deleted roles.
pub struct CacheRoleDirectory {
    cache: Arc<Cache>,
    deleted: Arc<ObjectCacheService>,
}

impl CacheRoleDirectory {
    pub fn new(cache: Arc<Cache>, deleted: Arc<ObjectCacheService>) -> Self {
        Self { cache, deleted }
    }
}

impl RoleDirectory for CacheRoleDirectory {
    fn role_name(&self, guild_id: serenity::GuildId, role_id: serenity::RoleId) -> Option<String> {
        let cached = self
            .cache
            .guild(guild_id)
            .and_then(|guild| guild.roles.get(&role_id).map(|role| role.name.clone()));

        cached.or_else(|| self.deleted.role_name(guild_id, role_id))
    }
}
