use dashmap::DashMap;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

const RETENTION: Duration = Duration::from_secs(90);

/// Short-lived names of roles deleted from a guild.
///
/// Deleting a role strips it from every member, and the resulting member
/// updates arrive after the role is gone from the gateway cache. Keeping the
/// name around for a while lets those updates still show it.
pub struct ObjectCacheService {
    // Map: (GuildID, RoleID) -> (Name, Timestamp)
    roles: Arc<DashMap<(u64, u64), (String, Instant)>>,
}

impl ObjectCacheService {
    pub fn new() -> Self {
        let roles = Arc::new(DashMap::new());
        let cleaner_roles = Arc::clone(&roles);

        // Spawn cleanup task
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_secs(30)).await;
                prune(&cleaner_roles, Instant::now());
            }
        });

        Self { roles }
    }

    pub fn store_role(&self, guild_id: serenity::GuildId, role: &serenity::Role) {
        self.remember(guild_id, role.id, role.name.clone());
    }

    fn remember(&self, guild_id: serenity::GuildId, role_id: serenity::RoleId, name: String) {
        self.roles
            .insert((guild_id.get(), role_id.get()), (name, Instant::now()));
    }

    pub fn role_name(&self, guild_id: serenity::GuildId, role_id: serenity::RoleId) -> Option<String> {
        self.roles
            .get(&(guild_id.get(), role_id.get()))
            .filter(|entry| entry.1.elapsed() < RETENTION)
            .map(|entry| entry.0.clone())
    }
}

fn prune(roles: &DashMap<(u64, u64), (String, Instant)>, now: Instant) {
    roles.retain(|_, (_, stored_at)| now.duration_since(*stored_at) < RETENTION);
}
