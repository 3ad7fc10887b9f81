use crate::Error;
use crate::db::entities::{
    guild_configs,
    module_configs::{self, LoggingModuleConfig, ModuleType},
};
use crate::services::audit_log::{LogRecord, LogSink, LogType};
use poise::serenity_prelude as serenity;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy)]
pub enum LogLevel {
    Info,
    Audit,
}

impl LogLevel {
    pub fn icon(&self) -> &'static str {
        match self {
            LogLevel::Info => "ℹ️",
            LogLevel::Audit => "📝",
        }
    }

    pub fn color(&self) -> u32 {
        match self {
            LogLevel::Info => 0x3498db,  // Blue
            LogLevel::Audit => 0x95a5a6, // Gray
        }
    }

    fn for_log_type(log_type: LogType) -> Self {
        match log_type {
            LogType::MemberNickChange | LogType::MemberUsernameChange => LogLevel::Info,
            LogType::MemberRoleAdd | LogType::MemberRoleRemove | LogType::MemberRoleChanges => {
                LogLevel::Audit
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Destination {
    Skip,
    Channel(serenity::ChannelId),
    GuildDefault,
}

/// Priority: member log channel > module log channel > general guild log channel.
fn module_destination(module: Option<&module_configs::Model>, log_type: LogType) -> Destination {
    let Some(module) = module else {
        return Destination::Skip;
    };
    if !module.enabled {
        return Destination::Skip;
    }

    let config = logging_config(module);
    if !config.allows(log_type) {
        return Destination::Skip;
    }

    match config
        .member_log_channel_id
        .or(module.log_channel_id)
        .filter(|id| *id > 0)
    {
        Some(id) => Destination::Channel(serenity::ChannelId::new(id as u64)),
        None => Destination::GuildDefault,
    }
}

fn logging_config(module: &module_configs::Model) -> LoggingModuleConfig {
    match serde_json::from_value(module.config.clone()) {
        Ok(config) => config,
        Err(e) => {
            warn!(
                "Invalid logging config for guild {}, member logging stays off: {}",
                module.guild_id, e
            );
            LoggingModuleConfig::default()
        }
    }
}

fn field_label(key: &str) -> &str {
    match key {
        "member" => "Member",
        "user" => "User",
        "mod" => "Moderator",
        "oldNick" => "Old nickname",
        "newNick" => "New nickname",
        "oldName" => "Old name",
        "newName" => "New name",
        "roles" => "Roles",
        "addedRoles" => "Added roles",
        "removedRoles" => "Removed roles",
        "reason" => "Reason",
        other => other,
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Object(user) => match user.get("id").and_then(Value::as_u64) {
            Some(id) if id > 0 => format!("<@{}>", id),
            _ => user
                .get("username")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string(),
        },
        Value::String(s) if s.is_empty() => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_fields(record: &LogRecord) -> Vec<(String, String, bool)> {
    record
        .payload()
        .iter()
        .map(|(key, value)| (field_label(key).to_string(), render_value(value), true))
        .collect()
}

pub struct LoggerService {
    db: DatabaseConnection,
}

impl LoggerService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Sends a record to the guild's member log channel.
    /// If logging is off for the guild or the record's type, it does nothing.
    pub async fn log_record(
        &self,
        http: &serenity::Http,
        guild_id: serenity::GuildId,
        record: &LogRecord,
    ) -> Result<(), Error> {
        let module = module_configs::Entity::find_by_id((guild_id.get() as i64, ModuleType::Logging))
            .one(&self.db)
            .await?;

        let channel_id = match module_destination(module.as_ref(), record.log_type()) {
            Destination::Skip => return Ok(()),
            Destination::Channel(id) => id,
            Destination::GuildDefault => {
                let g_config = guild_configs::Entity::find_by_id(guild_id.get() as i64)
                    .one(&self.db)
                    .await?;

                match g_config.and_then(|c| c.log_channel_id).filter(|id| *id > 0) {
                    Some(id) => serenity::ChannelId::new(id as u64),
                    None => return Ok(()), // No log channel configured
                }
            }
        };

        let level = LogLevel::for_log_type(record.log_type());
        let mut embed = serenity::CreateEmbed::new()
            .title(format!("{} {}", level.icon(), record.log_type().title()))
            .description(format!("<@{}>", record.subject_id()))
            .colour(level.color())
            .fields(render_fields(record))
            .footer(serenity::CreateEmbedFooter::new(record.log_type().as_str()));

        if let Ok(timestamp) = serenity::Timestamp::from_unix_timestamp(record.timestamp().timestamp()) {
            embed = embed.timestamp(timestamp);
        }

        let message = serenity::CreateMessage::new()
            .embed(embed)
            .allowed_mentions(serenity::CreateAllowedMentions::new());

        channel_id.send_message(http, message).await?;
        debug!("Delivered {} log to channel {}", record.log_type(), channel_id);

        Ok(())
    }
}

/// Hands records to [`LoggerService`] on a background task.
pub struct DiscordLogSink {
    http: Arc<serenity::Http>,
    logger: Arc<LoggerService>,
}

impl DiscordLogSink {
    pub fn new(http: Arc<serenity::Http>, logger: Arc<LoggerService>) -> Self {
        Self { http, logger }
    }
}

impl LogSink for DiscordLogSink {
    fn emit(&self, guild_id: serenity::GuildId, record: LogRecord) {
        let http = self.http.clone();
        let logger = self.logger.clone();

        tokio::spawn(async move {
            if let Err(e) = logger.log_record(&http, guild_id, &record).await {
                error!(
                    "Failed to deliver {} log in guild {}: {:?}",
                    record.log_type(),
                    guild_id,
                    e
                );
            }
        });
    }
}
