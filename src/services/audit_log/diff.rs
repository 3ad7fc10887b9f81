use super::correlator::AuditAction;
use super::normalize::{Field, Normalize, Scalar};
use super::record::LogType;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use std::collections::BTreeSet;

/// Display value used for a member without a nickname.
pub const NO_NICKNAME: &str = "<none>";

/// Member fields that never make it into a log payload.
pub const MEMBER_EXCLUDED_FIELDS: &[&str] = &["roles", "user"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSnapshot {
    pub id: serenity::UserId,
    pub username: String,
    pub discriminator: String,
    pub global_name: Option<String>,
    pub bot: bool,
}

impl UserSnapshot {
    pub fn tag(&self) -> UserTag {
        UserTag {
            username: self.username.clone(),
            discriminator: self.discriminator.clone(),
        }
    }
}

impl Normalize for UserSnapshot {
    fn fields(&self) -> Vec<(&'static str, Field)> {
        vec![
            ("id", Field::Scalar(Scalar::Int(self.id.get() as i64))),
            ("username", Field::Scalar(self.username.clone().into())),
            ("discriminator", Field::Scalar(self.discriminator.clone().into())),
            ("global_name", Field::Scalar(self.global_name.clone().into())),
            ("bot", Field::Scalar(self.bot.into())),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSnapshot {
    pub user: UserSnapshot,
    pub nick: Option<String>,
    pub roles: BTreeSet<serenity::RoleId>,
    pub joined_at: Option<DateTime<Utc>>,
    pub pending: bool,
}

impl Normalize for MemberSnapshot {
    fn fields(&self) -> Vec<(&'static str, Field)> {
        vec![
            ("id", Field::Scalar(Scalar::Int(self.user.id.get() as i64))),
            ("nick", Field::Scalar(self.nick.clone().into())),
            (
                "joined_at",
                Field::Scalar(self.joined_at.map(|t| t.to_rfc3339()).into()),
            ),
            ("pending", Field::Scalar(self.pending.into())),
            ("roles", Field::Collection),
            ("user", Field::Nested),
        ]
    }
}

/// `username#discriminator` at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTag {
    pub username: String,
    pub discriminator: String,
}

impl std::fmt::Display for UserTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.username, self.discriminator)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    NicknameChanged {
        old: String,
        new: String,
    },
    UsernameChanged {
        old: UserTag,
        new: UserTag,
    },
    RolesAdded(BTreeSet<serenity::RoleId>),
    RolesRemoved(BTreeSet<serenity::RoleId>),
    RolesChanged {
        added: BTreeSet<serenity::RoleId>,
        removed: BTreeSet<serenity::RoleId>,
    },
}

impl Delta {
    pub fn log_type(&self) -> LogType {
        match self {
            Delta::NicknameChanged { .. } => LogType::MemberNickChange,
            Delta::UsernameChanged { .. } => LogType::MemberUsernameChange,
            Delta::RolesAdded(_) => LogType::MemberRoleAdd,
            Delta::RolesRemoved(_) => LogType::MemberRoleRemove,
            Delta::RolesChanged { .. } => LogType::MemberRoleChanges,
        }
    }

    /// Audit action that would record this change, if a moderator can cause it.
    /// Username changes are made by the user themselves and have none.
    pub fn audit_action(&self) -> Option<AuditAction> {
        match self {
            Delta::NicknameChanged { .. } => Some(AuditAction::MemberUpdate),
            Delta::RolesAdded(_) | Delta::RolesRemoved(_) | Delta::RolesChanged { .. } => {
                Some(AuditAction::MemberRoleUpdate)
            }
            Delta::UsernameChanged { .. } => None,
        }
    }

    /// Undoes this change on `member`, turning an "after" snapshot back into
    /// the "before" one.
    pub fn revert(&self, member: &mut MemberSnapshot) {
        match self {
            Delta::NicknameChanged { old, .. } => {
                member.nick = (old != NO_NICKNAME).then(|| old.clone());
            }
            Delta::UsernameChanged { old, .. } => {
                member.user.username = old.username.clone();
                member.user.discriminator = old.discriminator.clone();
            }
            Delta::RolesAdded(added) => {
                member.roles.retain(|r| !added.contains(r));
            }
            Delta::RolesRemoved(removed) => {
                member.roles.extend(removed.iter().copied());
            }
            Delta::RolesChanged { added, removed } => {
                member.roles.retain(|r| !added.contains(r));
                member.roles.extend(removed.iter().copied());
            }
        }
    }
}

fn nick_label(nick: Option<&str>) -> String {
    nick.unwrap_or(NO_NICKNAME).to_string()
}

fn nickname_delta(before: &MemberSnapshot, after: &MemberSnapshot) -> Option<Delta> {
    let old = nick_label(before.nick.as_deref());
    let new = nick_label(after.nick.as_deref());
    (old != new).then_some(Delta::NicknameChanged { old, new })
}

fn role_delta(before: &MemberSnapshot, after: &MemberSnapshot) -> Option<Delta> {
    let added: BTreeSet<_> = after.roles.difference(&before.roles).copied().collect();
    let removed: BTreeSet<_> = before.roles.difference(&after.roles).copied().collect();

    match (added.is_empty(), removed.is_empty()) {
        (true, true) => None,
        (false, true) => Some(Delta::RolesAdded(added)),
        (true, false) => Some(Delta::RolesRemoved(removed)),
        (false, false) => Some(Delta::RolesChanged { added, removed }),
    }
}

fn username_delta(before: &UserSnapshot, after: &UserSnapshot) -> Option<Delta> {
    if before.username == after.username && before.discriminator == after.discriminator {
        return None;
    }
    Some(Delta::UsernameChanged {
        old: before.tag(),
        new: after.tag(),
    })
}

/// Deltas between two member snapshots, in nickname, roles, username order.
pub fn diff_member(before: &MemberSnapshot, after: &MemberSnapshot) -> Vec<Delta> {
    [
        nickname_delta(before, after),
        role_delta(before, after),
        username_delta(&before.user, &after.user),
    ]
    .into_iter()
    .flatten()
    .collect()
}

pub fn diff_user(before: &UserSnapshot, after: &UserSnapshot) -> Vec<Delta> {
    username_delta(before, after).into_iter().collect()
}
