pub mod audit_log;
pub mod cache;
pub mod event_manager;
pub mod logger;
