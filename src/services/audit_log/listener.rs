use super::correlator::{Actor, AuditCorrelator, AuditLogSource};
use super::diff::{Delta, MEMBER_EXCLUDED_FIELDS, MemberSnapshot, UserSnapshot, diff_member, diff_user};
use super::ignore::{IgnoreRegistry, SuppressionGate};
use super::normalize::{normalize, projection_to_json};
use super::record::{LogRecord, LogSink, LogType};
use super::settings::PipelineSettings;
use dashmap::DashMap;
use futures::future::join_all;
use poise::serenity_prelude as serenity;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Looks up display names for role ids.
pub trait RoleDirectory: Send + Sync {
    fn role_name(&self, guild_id: serenity::GuildId, role_id: serenity::RoleId) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    Suppressed(LogType),
    Emitted(LogType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// No cached "before" state, nothing to compare against.
    NoPriorState,
    NoChange,
    Processed(Vec<DeltaOutcome>),
}

/// Who a batch of deltas is about, pre-rendered for payloads.
struct Subject {
    id: serenity::UserId,
    member: Option<Value>,
    user: Value,
}

/// Turns raw change notifications into correlated, suppressible log records.
pub struct AuditLogPipeline {
    gate: SuppressionGate,
    correlator: AuditCorrelator,
    roles: Arc<dyn RoleDirectory>,
    sink: Arc<dyn LogSink>,
    guild_locks: DashMap<serenity::GuildId, Arc<Mutex<()>>>,
}

impl AuditLogPipeline {
    pub fn new(
        settings: PipelineSettings,
        audit_source: Arc<dyn AuditLogSource>,
        roles: Arc<dyn RoleDirectory>,
        ignores: Arc<IgnoreRegistry>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            gate: SuppressionGate::new(ignores),
            correlator: AuditCorrelator::new(audit_source, settings),
            roles,
            sink,
            guild_locks: DashMap::new(),
        }
    }

    pub async fn handle_member_update(
        &self,
        guild_id: serenity::GuildId,
        before: Option<&MemberSnapshot>,
        after: &MemberSnapshot,
    ) -> EventOutcome {
        let Some(before) = before else {
            debug!(
                "Member update for {} in guild {} without prior state",
                after.user.id, guild_id
            );
            return EventOutcome::NoPriorState;
        };

        let subject = Subject {
            id: after.user.id,
            member: Some(projection_to_json(&normalize(after, MEMBER_EXCLUDED_FIELDS))),
            user: projection_to_json(&normalize(&after.user, &[])),
        };

        self.process(guild_id, subject, diff_member(before, after)).await
    }

    /// Profile-level update for a user known to be in `guild_id`.
    pub async fn handle_user_update(
        &self,
        guild_id: serenity::GuildId,
        before: Option<&UserSnapshot>,
        after: &UserSnapshot,
    ) -> EventOutcome {
        let Some(before) = before else {
            debug!("User update for {} without prior state", after.id);
            return EventOutcome::NoPriorState;
        };

        let subject = Subject {
            id: after.id,
            member: None,
            user: projection_to_json(&normalize(after, &[])),
        };

        self.process(guild_id, subject, diff_user(before, after)).await
    }

    async fn process(&self, guild_id: serenity::GuildId, subject: Subject, deltas: Vec<Delta>) -> EventOutcome {
        if deltas.is_empty() {
            debug!("No loggable change for {} in guild {}", subject.id, guild_id);
            return EventOutcome::NoChange;
        }

        // One event per guild at a time, so suppression and emission follow arrival order.
        let lock = self.guild_locks.entry(guild_id).or_default().clone();
        let _guard = lock.lock().await;

        let checked: Vec<(Delta, Option<LogType>)> = deltas
            .into_iter()
            .map(|delta| {
                let suppressed_by = self.gate.check(guild_id, subject.id.get(), &delta);
                (delta, suppressed_by)
            })
            .collect();

        let subject_id = subject.id;
        let actors = join_all(checked.iter().map(|(delta, suppressed_by)| async move {
            match (suppressed_by, delta.audit_action()) {
                (None, Some(action)) => Some(self.correlator.find_actor(guild_id, action, subject_id).await),
                _ => None,
            }
        }))
        .await;

        let mut outcomes = Vec::with_capacity(checked.len());
        for ((delta, suppressed_by), actor) in checked.into_iter().zip(actors) {
            let log_type = delta.log_type();

            if let Some(ignored_as) = suppressed_by {
                debug!(
                    "Suppressed {} for {} in guild {} (ignored as {})",
                    log_type, subject.id, guild_id, ignored_as
                );
                outcomes.push(DeltaOutcome::Suppressed(log_type));
                continue;
            }

            let record = self.build_record(guild_id, &subject, &delta, actor.as_ref());
            self.sink.emit(guild_id, record);
            debug!("Emitted {} for {} in guild {}", log_type, subject.id, guild_id);
            outcomes.push(DeltaOutcome::Emitted(log_type));
        }

        EventOutcome::Processed(outcomes)
    }

    fn role_labels(&self, guild_id: serenity::GuildId, roles: &BTreeSet<serenity::RoleId>) -> String {
        roles
            .iter()
            .map(|id| {
                self.roles
                    .role_name(guild_id, *id)
                    .unwrap_or_else(|| format!("Unknown ({})", id))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn build_record(
        &self,
        guild_id: serenity::GuildId,
        subject: &Subject,
        delta: &Delta,
        actor: Option<&Actor>,
    ) -> LogRecord {
        let mut payload = Map::new();
        let member = || subject.member.clone().unwrap_or_else(|| subject.user.clone());

        match delta {
            Delta::NicknameChanged { old, new } => {
                payload.insert("member".into(), member());
                payload.insert("oldNick".into(), Value::String(old.clone()));
                payload.insert("newNick".into(), Value::String(new.clone()));
            }
            Delta::UsernameChanged { old, new } => {
                payload.insert("user".into(), subject.user.clone());
                payload.insert("oldName".into(), Value::String(old.to_string()));
                payload.insert("newName".into(), Value::String(new.to_string()));
            }
            Delta::RolesAdded(roles) | Delta::RolesRemoved(roles) => {
                payload.insert("member".into(), member());
                payload.insert("roles".into(), Value::String(self.role_labels(guild_id, roles)));
            }
            Delta::RolesChanged { added, removed } => {
                payload.insert("member".into(), member());
                payload.insert("addedRoles".into(), Value::String(self.role_labels(guild_id, added)));
                payload.insert(
                    "removedRoles".into(),
                    Value::String(self.role_labels(guild_id, removed)),
                );
            }
        }

        if let Some(actor) = actor {
            payload.insert("mod".into(), actor.projection());
            if let Some(reason) = actor.reason() {
                payload.insert("reason".into(), Value::String(reason.to_string()));
            }
        }

        LogRecord::new(delta.log_type(), subject.id.get(), payload)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::audit_log::correlator::AuditAction;
    use crate::services::audit_log::correlator::tests::{ScriptedSource, entry};
    use crate::services::audit_log::diff::tests::member;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) records: StdMutex<Vec<(serenity::GuildId, LogRecord)>>,
    }

    impl RecordingSink {
        pub(crate) fn types(&self) -> Vec<LogType> {
            self.records.lock().unwrap().iter().map(|(_, r)| r.log_type()).collect()
        }

        pub(crate) fn last(&self) -> LogRecord {
            self.records.lock().unwrap().last().unwrap().1.clone()
        }
    }

    impl LogSink for RecordingSink {
        fn emit(&self, guild_id: serenity::GuildId, record: LogRecord) {
            self.records.lock().unwrap().push((guild_id, record));
        }
    }

    pub(crate) struct NamedRoles;

    impl RoleDirectory for NamedRoles {
        fn role_name(&self, _guild_id: serenity::GuildId, role_id: serenity::RoleId) -> Option<String> {
            // role 99 no longer exists
            (role_id.get() != 99).then(|| format!("role-{}", role_id.get()))
        }
    }

    fn guild() -> serenity::GuildId {
        serenity::GuildId::new(1)
    }

    struct Harness {
        pipeline: AuditLogPipeline,
        ignores: Arc<IgnoreRegistry>,
        sink: Arc<RecordingSink>,
        source: Arc<ScriptedSource>,
    }

    fn harness(source: ScriptedSource) -> Harness {
        let source = Arc::new(source);
        let ignores = Arc::new(IgnoreRegistry::new(Duration::from_secs(30)));
        let sink = Arc::new(RecordingSink::default());
        let pipeline = AuditLogPipeline::new(
            PipelineSettings::default(),
            source.clone(),
            Arc::new(NamedRoles),
            ignores.clone(),
            sink.clone(),
        );
        Harness {
            pipeline,
            ignores,
            sink,
            source,
        }
    }

    fn quiet_audit_log() -> ScriptedSource {
        ScriptedSource::new(vec![Ok(vec![])])
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_before_is_ignored() {
        let h = harness(quiet_audit_log());
        let outcome = h
            .pipeline
            .handle_member_update(guild(), None, &member(Some("Bob"), &[1]))
            .await;

        assert_eq!(outcome, EventOutcome::NoPriorState);
        assert!(h.sink.types().is_empty());
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_change_touches_nothing() {
        let h = harness(quiet_audit_log());
        h.ignores.register(guild(), LogType::MemberRoleChanges, 42, None);
        let snapshot = member(Some("Bob"), &[1, 2]);

        let outcome = h
            .pipeline
            .handle_member_update(guild(), Some(&snapshot), &snapshot)
            .await;

        assert_eq!(outcome, EventOutcome::NoChange);
        assert_eq!(h.ignores.pending(), 1);
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_role_change_attributed_to_moderator() {
        let h = harness(ScriptedSource::new(vec![Ok(vec![entry(
            AuditAction::MemberRoleUpdate,
            42,
            7,
            1,
        )])]));

        let outcome = h
            .pipeline
            .handle_member_update(guild(), Some(&member(None, &[1, 2])), &member(None, &[2, 3]))
            .await;

        assert_eq!(
            outcome,
            EventOutcome::Processed(vec![DeltaOutcome::Emitted(LogType::MemberRoleChanges)])
        );
        let record = h.sink.last();
        assert_eq!(record.subject_id(), 42);
        assert_eq!(record.get("addedRoles"), Some(&Value::from("role-3")));
        assert_eq!(record.get("removedRoles"), Some(&Value::from("role-1")));
        assert_eq!(record.get("mod").and_then(|m| m.get("id")), Some(&Value::from(7u64)));
        assert!(record.get("member").and_then(|m| m.get("roles")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_role_gets_placeholder() {
        let h = harness(quiet_audit_log());
        h.pipeline
            .handle_member_update(guild(), Some(&member(None, &[])), &member(None, &[99]))
            .await;

        let record = h.sink.last();
        assert_eq!(record.log_type(), LogType::MemberRoleAdd);
        assert_eq!(record.get("roles"), Some(&Value::from("Unknown (99)")));
        assert_eq!(record.get("mod"), Some(&Actor::Unknown.projection()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignore_consumed_once_across_duplicate_events() {
        let h = harness(quiet_audit_log());
        h.ignores.register(guild(), LogType::MemberRoleAdd, 42, None);
        let before = member(None, &[1]);
        let after = member(None, &[1, 2]);

        let first = h.pipeline.handle_member_update(guild(), Some(&before), &after).await;
        let second = h.pipeline.handle_member_update(guild(), Some(&before), &after).await;

        assert_eq!(
            first,
            EventOutcome::Processed(vec![DeltaOutcome::Suppressed(LogType::MemberRoleAdd)])
        );
        assert_eq!(
            second,
            EventOutcome::Processed(vec![DeltaOutcome::Emitted(LogType::MemberRoleAdd)])
        );
        assert_eq!(h.sink.types(), vec![LogType::MemberRoleAdd]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_combined_ignore_suppresses_additions() {
        let h = harness(quiet_audit_log());
        h.ignores.register(guild(), LogType::MemberRoleChanges, 42, None);

        let outcome = h
            .pipeline
            .handle_member_update(guild(), Some(&member(None, &[1])), &member(None, &[1, 2]))
            .await;

        assert_eq!(
            outcome,
            EventOutcome::Processed(vec![DeltaOutcome::Suppressed(LogType::MemberRoleAdd)])
        );
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deltas_are_independent_and_ordered() {
        let h = harness(quiet_audit_log());
        h.ignores.register(guild(), LogType::MemberNickChange, 42, None);

        let before = member(None, &[1]);
        let mut after = member(Some("Bob"), &[]);
        after.user.username = "robert".into();

        let outcome = h.pipeline.handle_member_update(guild(), Some(&before), &after).await;

        assert_eq!(
            outcome,
            EventOutcome::Processed(vec![
                DeltaOutcome::Suppressed(LogType::MemberNickChange),
                DeltaOutcome::Emitted(LogType::MemberRoleRemove),
                DeltaOutcome::Emitted(LogType::MemberUsernameChange),
            ])
        );
        assert_eq!(
            h.sink.types(),
            vec![LogType::MemberRoleRemove, LogType::MemberUsernameChange]
        );
        // only the role delta is correlated
        assert_eq!(
            h.source.calls.load(Ordering::SeqCst),
            PipelineSettings::default().audit_attempts as usize
        );

        let username = h.sink.last();
        assert_eq!(username.get("oldName"), Some(&Value::from("bob#0")));
        assert_eq!(username.get("newName"), Some(&Value::from("robert#0")));
        assert!(username.get("mod").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nickname_record() {
        let h = harness(quiet_audit_log());
        h.pipeline
            .handle_member_update(guild(), Some(&member(None, &[])), &member(Some("Bob"), &[]))
            .await;

        let record = h.sink.last();
        assert_eq!(record.log_type(), LogType::MemberNickChange);
        assert_eq!(record.get("oldNick"), Some(&Value::from("<none>")));
        assert_eq!(record.get("newNick"), Some(&Value::from("Bob")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_update() {
        let h = harness(quiet_audit_log());
        let before = member(None, &[]).user;
        let mut after = before.clone();

        assert_eq!(
            h.pipeline.handle_user_update(guild(), Some(&before), &after).await,
            EventOutcome::NoChange
        );
        assert_eq!(
            h.pipeline.handle_user_update(guild(), None, &after).await,
            EventOutcome::NoPriorState
        );

        after.discriminator = "0001".into();
        assert_eq!(
            h.pipeline.handle_user_update(guild(), Some(&before), &after).await,
            EventOutcome::Processed(vec![DeltaOutcome::Emitted(LogType::MemberUsernameChange)])
        );
        assert_eq!(h.sink.last().get("newName"), Some(&Value::from("bob#0001")));
    }
}
