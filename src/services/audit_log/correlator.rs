use super::settings::PipelineSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    MemberUpdate,
    MemberRoleUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLogEntry {
    pub actor_id: serenity::UserId,
    pub actor_name: Option<String>,
    pub action: AuditAction,
    pub target_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuditQueryError {
    #[error("missing permission to view the audit log")]
    PermissionDenied,
    #[error("audit log unavailable: {0}")]
    Unavailable(String),
}

/// Read access to a guild's audit log.
#[async_trait]
pub trait AuditLogSource: Send + Sync {
    /// Newest entries of one action type, most recent first.
    async fn recent_entries(
        &self,
        guild_id: serenity::GuildId,
        action: AuditAction,
        limit: u8,
    ) -> Result<Vec<AuditLogEntry>, AuditQueryError>;
}

/// Who caused a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    User {
        id: serenity::UserId,
        name: Option<String>,
        reason: Option<String>,
    },
    Unknown,
}

impl Actor {
    pub fn projection(&self) -> Value {
        match self {
            Actor::User { id, name, .. } => json!({
                "id": id.get(),
                "username": name.clone().unwrap_or_else(|| id.get().to_string()),
            }),
            Actor::Unknown => json!({ "id": 0, "username": "Unknown#0000" }),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Actor::User { reason, .. } => reason.as_deref(),
            Actor::Unknown => None,
        }
    }
}

impl From<AuditLogEntry> for Actor {
    fn from(entry: AuditLogEntry) -> Self {
        Actor::User {
            id: entry.actor_id,
            name: entry.actor_name,
            reason: entry.reason,
        }
    }
}

/// Picks the newest entry for `target_id` that is no older than `window`.
pub fn select_entry<'a>(
    entries: &'a [AuditLogEntry],
    action: AuditAction,
    target_id: u64,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> Option<&'a AuditLogEntry> {
    let cutoff = now - window;
    entries
        .iter()
        .filter(|e| e.action == action && e.target_id == Some(target_id))
        .filter(|e| e.created_at >= cutoff)
        .max_by_key(|e| e.created_at)
}

pub struct AuditCorrelator {
    source: Arc<dyn AuditLogSource>,
    settings: PipelineSettings,
}

impl AuditCorrelator {
    pub fn new(source: Arc<dyn AuditLogSource>, settings: PipelineSettings) -> Self {
        Self { source, settings }
    }

    /// Resolves the moderator behind a change to `target_id`.
    /// Never fails: anything short of a matching entry is `Actor::Unknown`.
    pub async fn find_actor(
        &self,
        guild_id: serenity::GuildId,
        action: AuditAction,
        target_id: serenity::UserId,
    ) -> Actor {
        // The window is anchored to arrival, not to whichever retry finds the entry.
        let observed_at = Utc::now();
        let lookup = self.find_entry(guild_id, action, target_id, observed_at);

        match timeout(self.settings.audit_timeout, lookup).await {
            Ok(Ok(Some(entry))) => entry.into(),
            Ok(Ok(None)) => {
                debug!(
                    "No {:?} audit entry for {} in guild {}",
                    action, target_id, guild_id
                );
                Actor::Unknown
            }
            Ok(Err(AuditQueryError::PermissionDenied)) => {
                debug!("Cannot read audit log in guild {}", guild_id);
                Actor::Unknown
            }
            Ok(Err(e)) => {
                warn!("Audit log lookup failed in guild {}: {}", guild_id, e);
                Actor::Unknown
            }
            Err(_) => {
                warn!(
                    "Audit log lookup for {} in guild {} timed out after {:?}",
                    target_id, guild_id, self.settings.audit_timeout
                );
                Actor::Unknown
            }
        }
    }

    async fn find_entry(
        &self,
        guild_id: serenity::GuildId,
        action: AuditAction,
        target_id: serenity::UserId,
        observed_at: DateTime<Utc>,
    ) -> Result<Option<AuditLogEntry>, AuditQueryError> {
        let attempts = self.settings.audit_attempts.max(1);
        let mut last_error = None;
        let mut fetched = false;

        for attempt in 1..=attempts {
            match self
                .source
                .recent_entries(guild_id, action, self.settings.audit_fetch_limit)
                .await
            {
                Ok(entries) => {
                    fetched = true;
                    if let Some(entry) = select_entry(
                        &entries,
                        action,
                        target_id.get(),
                        observed_at,
                        self.settings.recency_window,
                    ) {
                        return Ok(Some(entry.clone()));
                    }
                }
                Err(AuditQueryError::PermissionDenied) => {
                    return Err(AuditQueryError::PermissionDenied);
                }
                Err(e) => {
                    warn!(
                        "Audit log fetch {}/{} failed in guild {}: {}",
                        attempt, attempts, guild_id, e
                    );
                    last_error = Some(e);
                }
            }

            if attempt < attempts {
                sleep(self.settings.audit_retry_delay).await;
            }
        }

        match last_error {
            Some(e) if !fetched => Err(e),
            _ => Ok(None),
        }
    }
}
