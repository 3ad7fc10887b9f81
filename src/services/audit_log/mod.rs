//! Member change logging.
//!
//! A raw update is reduced to snapshots, diffed into deltas, filtered through
//! the ignore registry, attributed via the guild audit log and handed to a
//! [`LogSink`].

pub mod correlator;
pub mod diff;
pub mod discord;
pub mod ignore;
pub mod listener;
pub mod normalize;
pub mod record;
pub mod settings;

pub use correlator::{Actor, AuditAction, AuditLogSource};
pub use diff::{MEMBER_EXCLUDED_FIELDS, MemberSnapshot, UserSnapshot};
pub use ignore::IgnoreRegistry;
pub use listener::{AuditLogPipeline, EventOutcome, RoleDirectory};
pub use record::{LogRecord, LogSink, LogType};
pub use settings::PipelineSettings;
