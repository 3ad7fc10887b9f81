use crate::services::audit_log::{
    Actor, IgnoreRegistry, LogRecord, LogType, MEMBER_EXCLUDED_FIELDS, MemberSnapshot,
};
use crate::services::audit_log::normalize::{normalize, projection_to_json};
use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use serde_json::{Map, Value};

#[poise::command(
    slash_command,
    guild_only,
    subcommands("add", "remove"),
    subcommand_required,
    required_permissions = "MANAGE_ROLES",
    default_member_permissions = "MANAGE_ROLES"
)]
pub async fn role(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Give a role to a member
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Member to give the role to"] member: serenity::Member,
    #[description = "Role to give"] role: serenity::Role,
) -> Result<(), Error> {
    if member.roles.contains(&role.id) {
        ctx.say(format!("<@{}> already has **{}**.", member.user.id, role.name))
            .await?;
        return Ok(());
    }

    apply_role_change(ctx, &member, &role, LogType::MemberRoleAdd).await?;
    ctx.say(format!("Added **{}** to <@{}>.", role.name, member.user.id))
        .await?;

    Ok(())
}

/// Take a role away from a member
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Member to take the role from"] member: serenity::Member,
    #[description = "Role to take"] role: serenity::Role,
) -> Result<(), Error> {
    if !member.roles.contains(&role.id) {
        ctx.say(format!("<@{}> does not have **{}**.", member.user.id, role.name))
            .await?;
        return Ok(());
    }

    apply_role_change(ctx, &member, &role, LogType::MemberRoleRemove).await?;
    ctx.say(format!("Removed **{}** from <@{}>.", role.name, member.user.id))
        .await?;

    Ok(())
}

/// Applies the change with the gateway echo silenced, then logs it with the
/// invoking moderator attached.
async fn apply_role_change(
    ctx: Context<'_>,
    member: &serenity::Member,
    role: &serenity::Role,
    log_type: LogType,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or_else(|| anyhow::anyhow!("Role commands are only available in guilds"))?;
    let data = ctx.data();
    let subject_id = member.user.id.get();

    data.ignores.register(guild_id, log_type, subject_id, None);

    let result = match log_type {
        LogType::MemberRoleRemove => member.remove_role(ctx.http(), role.id).await,
        _ => member.add_role(ctx.http(), role.id).await,
    };

    if let Err(e) = result {
        // Nothing will echo back, so the ignore must not linger.
        release_ignore(&data.ignores, guild_id, log_type, subject_id);
        return Err(e.into());
    }

    let moderator = Actor::User {
        id: ctx.author().id,
        name: Some(ctx.author().name.clone()),
        reason: None,
    };
    data.sink.emit(
        guild_id,
        role_command_record(log_type, &MemberSnapshot::from(member), &role.name, &moderator),
    );

    Ok(())
}

fn release_ignore(ignores: &IgnoreRegistry, guild_id: serenity::GuildId, log_type: LogType, subject_id: u64) {
    ignores.try_consume(guild_id, log_type, subject_id);
}

fn role_command_record(
    log_type: LogType,
    member: &MemberSnapshot,
    role_name: &str,
    moderator: &Actor,
) -> LogRecord {
    let mut payload = Map::new();
    payload.insert(
        "member".into(),
        projection_to_json(&normalize(member, MEMBER_EXCLUDED_FIELDS)),
    );
    payload.insert("roles".into(), Value::String(role_name.to_string()));
    payload.insert("mod".into(), moderator.projection());

    LogRecord::new(log_type, member.user.id.get(), payload)
}
