use super::diff::Delta;
use super::record::LogType;
use dashmap::DashMap;
use poise::serenity_prelude as serenity;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

type IgnoreKey = (serenity::GuildId, LogType, u64);

/// Pending one-shot ignores, keyed by guild, log type and subject.
///
/// Every registration is consumed by at most one delta. Registrations that
/// are never consumed expire, so a failed moderation action cannot hide an
/// unrelated change later on.
pub struct IgnoreRegistry {
    // Expiry instants, oldest registration first.
    entries: DashMap<IgnoreKey, VecDeque<Instant>>,
    default_ttl: Duration,
}

impl IgnoreRegistry {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    pub fn register(
        &self,
        guild_id: serenity::GuildId,
        log_type: LogType,
        subject_id: u64,
        ttl: Option<Duration>,
    ) {
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);
        self.entries
            .entry((guild_id, log_type, subject_id))
            .or_default()
            .push_back(expires_at);
    }

    /// Atomically takes one live registration for the key.
    pub fn try_consume(&self, guild_id: serenity::GuildId, log_type: LogType, subject_id: u64) -> bool {
        let key = (guild_id, log_type, subject_id);
        let now = Instant::now();
        let mut consumed = false;

        if let Some(mut pending) = self.entries.get_mut(&key) {
            while let Some(expires_at) = pending.pop_front() {
                if expires_at > now {
                    consumed = true;
                    break;
                }
            }
        }

        self.entries.remove_if(&key, |_, pending| pending.is_empty());
        consumed
    }

    /// Drops expired registrations. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.entries.retain(|_, pending| {
            let before = pending.len();
            pending.retain(|expires_at| *expires_at > now);
            removed += before - pending.len();
            !pending.is_empty()
        });

        removed
    }

    pub fn pending(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    pub fn start_sweeper(self: Arc<Self>) {
        tokio::spawn(async move {
            info!("Ignore registry sweeper started.");
            loop {
                sleep(Duration::from_secs(30)).await;
                let removed = self.purge_expired();
                if removed > 0 {
                    debug!("Dropped {} expired ignore entries", removed);
                }
            }
        });
    }
}

/// Log types checked for a delta, in priority order.
fn candidate_types(delta: &Delta) -> Vec<LogType> {
    match delta {
        Delta::RolesAdded(_) => vec![LogType::MemberRoleChanges, LogType::MemberRoleAdd],
        Delta::RolesRemoved(_) => vec![LogType::MemberRoleChanges, LogType::MemberRoleRemove],
        Delta::RolesChanged { .. } => vec![
            LogType::MemberRoleChanges,
            LogType::MemberRoleAdd,
            LogType::MemberRoleRemove,
        ],
        other => vec![other.log_type()],
    }
}

/// Decides whether a delta is logged, consuming the ignore entry that
/// silenced it.
pub struct SuppressionGate {
    registry: Arc<IgnoreRegistry>,
}

impl SuppressionGate {
    pub fn new(registry: Arc<IgnoreRegistry>) -> Self {
        Self { registry }
    }

    pub fn should_suppress(&self, guild_id: serenity::GuildId, log_type: LogType, subject_id: u64) -> bool {
        self.registry.try_consume(guild_id, log_type, subject_id)
    }

    /// Returns the log type whose ignore entry was consumed, if any.
    /// At most one entry is consumed per delta; role changes try the combined
    /// type first, then additions, then removals.
    pub fn check(&self, guild_id: serenity::GuildId, subject_id: u64, delta: &Delta) -> Option<LogType> {
        candidate_types(delta)
            .into_iter()
            .find(|log_type| self.should_suppress(guild_id, *log_type, subject_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::audit_log::diff::tests::roles;

    fn guild() -> serenity::GuildId {
        serenity::GuildId::new(1)
    }

    fn registry() -> Arc<IgnoreRegistry> {
        Arc::new(IgnoreRegistry::new(Duration::from_secs(30)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumed_exactly_once() {
        let registry = registry();
        registry.register(guild(), LogType::MemberRoleAdd, 42, None);

        assert!(registry.try_consume(guild(), LogType::MemberRoleAdd, 42));
        assert!(!registry.try_consume(guild(), LogType::MemberRoleAdd, 42));
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_do_not_bleed() {
        let registry = registry();
        registry.register(guild(), LogType::MemberRoleAdd, 42, None);

        assert!(!registry.try_consume(guild(), LogType::MemberRoleAdd, 43));
        assert!(!registry.try_consume(guild(), LogType::MemberRoleRemove, 42));
        assert!(!registry.try_consume(serenity::GuildId::new(2), LogType::MemberRoleAdd, 42));
        assert_eq!(registry.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_registrations_stack() {
        let registry = registry();
        registry.register(guild(), LogType::MemberNickChange, 42, None);
        registry.register(guild(), LogType::MemberNickChange, 42, None);

        assert!(registry.try_consume(guild(), LogType::MemberNickChange, 42));
        assert!(registry.try_consume(guild(), LogType::MemberNickChange, 42));
        assert!(!registry.try_consume(guild(), LogType::MemberNickChange, 42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_never_suppress() {
        let registry = registry();
        registry.register(guild(), LogType::MemberRoleAdd, 42, Some(Duration::from_secs(5)));
        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(!registry.try_consume(guild(), LogType::MemberRoleAdd, 42));
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let registry = registry();
        registry.register(guild(), LogType::MemberRoleAdd, 42, Some(Duration::from_secs(5)));
        registry.register(guild(), LogType::MemberRoleAdd, 42, Some(Duration::from_secs(60)));
        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(registry.purge_expired(), 1);
        assert_eq!(registry.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_combined_type_covers_single_direction() {
        let registry = registry();
        let gate = SuppressionGate::new(registry.clone());
        registry.register(guild(), LogType::MemberRoleChanges, 42, None);

        let added_only = Delta::RolesAdded(roles(&[3]));
        assert_eq!(gate.check(guild(), 42, &added_only), Some(LogType::MemberRoleChanges));
        assert_eq!(gate.check(guild(), 42, &added_only), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_combined_type_wins_over_narrow_types() {
        let registry = registry();
        let gate = SuppressionGate::new(registry.clone());
        registry.register(guild(), LogType::MemberRoleAdd, 42, None);
        registry.register(guild(), LogType::MemberRoleChanges, 42, None);

        let changed = Delta::RolesChanged {
            added: roles(&[3]),
            removed: roles(&[1]),
        };
        assert_eq!(gate.check(guild(), 42, &changed), Some(LogType::MemberRoleChanges));
        // the narrower entry is still pending for the next event
        assert_eq!(registry.pending(), 1);
        assert_eq!(gate.check(guild(), 42, &changed), Some(LogType::MemberRoleAdd));
    }

    #[tokio::test(start_paused = true)]
    async fn test_direction_specific_types() {
        let registry = registry();
        let gate = SuppressionGate::new(registry.clone());
        registry.register(guild(), LogType::MemberRoleAdd, 42, None);

        let removed_only = Delta::RolesRemoved(roles(&[1]));
        assert_eq!(gate.check(guild(), 42, &removed_only), None);
        assert_eq!(registry.pending(), 1);

        let changed = Delta::RolesChanged {
            added: roles(&[3]),
            removed: roles(&[1]),
        };
        assert_eq!(gate.check(guild(), 42, &changed), Some(LogType::MemberRoleAdd));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_consumers_take_one_entry() {
        let registry = registry();
        registry.register(guild(), LogType::MemberRoleAdd, 42, None);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.try_consume(guild(), LogType::MemberRoleAdd, 42) })
            })
            .collect();

        let mut consumed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                consumed += 1;
            }
        }
        assert_eq!(consumed, 1);
    }
}
