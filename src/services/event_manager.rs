use crate::{Data, Error};
use poise::serenity_prelude as serenity;
use tracing::{error, info};

/// Framework hook for non-command Discord events.
pub async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    // 1. Core / Service handling
    match event {
        serenity::FullEvent::Ready { data_about_bot, .. } => {
            info!("Logged in as {}", data_about_bot.user.name);
        }
        serenity::FullEvent::GuildCreate { guild, is_new, .. } => {
            if is_new.unwrap_or(false) {
                info!("Joined new guild: {} ({})", guild.name, guild.id);
            }
        }
        serenity::FullEvent::GuildDelete { incomplete, .. } => {
            info!("Left guild: {}", incomplete.id);
        }
        serenity::FullEvent::GuildRoleDelete {
            guild_id,
            removed_role_data_if_available,
            ..
        } => {
            if let Some(role) = removed_role_data_if_available {
                data.cache.store_role(*guild_id, role);
            }
        }
        _ => {}
    }

    // 2. Module dispatch. Handlers are awaited in place rather than spawned so
    // that events reach each module in gateway order.
    for (module_id, handler) in &data.event_handlers {
        if let Err(e) = handler(ctx, event, data).await {
            error!("Error in event handler for module {}: {:?}", module_id, e);
        }
    }

    Ok(())
}
