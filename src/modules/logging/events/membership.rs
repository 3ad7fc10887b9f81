use crate::Data;
use crate::services::audit_log::{AuditLogPipeline, EventOutcome, MemberSnapshot, UserSnapshot};
use poise::serenity_prelude as serenity;

pub async fn handle_member_update(
    ctx: &serenity::Context,
    old_if_available: Option<&serenity::Member>,
    new: Option<&serenity::Member>,
    event: &serenity::GuildMemberUpdateEvent,
    data: &Data,
) -> EventOutcome {
    let before = old_if_available.map(MemberSnapshot::from);
    // Without a cached member the gateway payload is the "after" state.
    let after = new
        .map(MemberSnapshot::from)
        .unwrap_or_else(|| MemberSnapshot::from(event));
    let current_user_id = ctx.cache.current_user().id;

    member_update(&data.pipeline, event.guild_id, current_user_id, before, &after).await
}

/// Logs a profile change in every cached guild the user belongs to.
pub async fn handle_user_update(
    ctx: &serenity::Context,
    old_data: Option<&serenity::CurrentUser>,
    new: &serenity::CurrentUser,
    data: &Data,
) {
    let before = old_data.map(|user| UserSnapshot::from(&**user));
    let after = UserSnapshot::from(&**new);

    let guilds: Vec<_> = ctx
        .cache
        .guilds()
        .into_iter()
        .filter(|guild_id| ctx.cache.member(*guild_id, after.id).is_some())
        .collect();

    user_update(&data.pipeline, &guilds, before.as_ref(), &after).await;
}

async fn member_update(
    pipeline: &AuditLogPipeline,
    guild_id: serenity::GuildId,
    current_user_id: serenity::UserId,
    mut before: Option<MemberSnapshot>,
    after: &MemberSnapshot,
) -> EventOutcome {
    // The bot's own profile changes also arrive as a user update and are logged there.
    if after.user.id == current_user_id {
        if let Some(before) = before.as_mut() {
            before.user = after.user.clone();
        }
    }

    pipeline
        .handle_member_update(guild_id, before.as_ref(), after)
        .await
}

async fn user_update(
    pipeline: &AuditLogPipeline,
    guilds: &[serenity::GuildId],
    before: Option<&UserSnapshot>,
    after: &UserSnapshot,
) {
    for guild_id in guilds {
        pipeline.handle_user_update(*guild_id, before, after).await;
    }
}
