use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Serialized through [`LogType::as_str`], which is the only place the names are spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum LogType {
    MemberNickChange,
    MemberUsernameChange,
    MemberRoleAdd,
    MemberRoleRemove,
    MemberRoleChanges,
}

impl LogType {
    pub const ALL: [LogType; 5] = [
        LogType::MemberNickChange,
        LogType::MemberUsernameChange,
        LogType::MemberRoleAdd,
        LogType::MemberRoleRemove,
        LogType::MemberRoleChanges,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::MemberNickChange => "MEMBER_NICK_CHANGE",
            LogType::MemberUsernameChange => "MEMBER_USERNAME_CHANGE",
            LogType::MemberRoleAdd => "MEMBER_ROLE_ADD",
            LogType::MemberRoleRemove => "MEMBER_ROLE_REMOVE",
            LogType::MemberRoleChanges => "MEMBER_ROLE_CHANGES",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            LogType::MemberNickChange => "Nickname Changed",
            LogType::MemberUsernameChange => "Username Changed",
            LogType::MemberRoleAdd => "Roles Added",
            LogType::MemberRoleRemove => "Roles Removed",
            LogType::MemberRoleChanges => "Roles Changed",
        }
    }
}

impl From<LogType> for &'static str {
    fn from(log_type: LogType) -> Self {
        log_type.as_str()
    }
}

impl TryFrom<String> for LogType {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        LogType::ALL
            .into_iter()
            .find(|log_type| log_type.as_str() == name)
            .ok_or_else(|| format!("unknown log type `{}`", name))
    }
}

impl std::fmt::Display for LogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finished log entry. Fields are fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    log_type: LogType,
    subject_id: u64,
    payload: Map<String, Value>,
    timestamp: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(log_type: LogType, subject_id: u64, payload: Map<String, Value>) -> Self {
        Self {
            log_type,
            subject_id,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn log_type(&self) -> LogType {
        self.log_type
    }

    pub fn subject_id(&self) -> u64 {
        self.subject_id
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Destination for finished records. Delivery is fire-and-forget: the
/// caller never learns whether the record made it out.
pub trait LogSink: Send + Sync {
    fn emit(&self, guild_id: serenity::GuildId, record: LogRecord);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_uses_display_names() {
        for log_type in LogType::ALL {
            let json = serde_json::to_value(log_type).unwrap();
            assert_eq!(json, Value::from(log_type.as_str()));
            assert_eq!(serde_json::from_value::<LogType>(json).unwrap(), log_type);
        }
    }

    #[test]
    fn test_unknown_name_rejected() {
        assert!(serde_json::from_value::<LogType>(Value::from("MEMBER_AVATAR_CHANGE")).is_err());
        assert!(serde_json::from_value::<LogType>(Value::from("member_role_add")).is_err());
    }
}
