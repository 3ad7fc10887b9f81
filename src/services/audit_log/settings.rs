use std::time::Duration;

/// Tunables for the audit log pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Hard cap on a single actor lookup, retries included.
    pub audit_timeout: Duration,
    /// Audit entries older than this are never attributed to an event.
    pub recency_window: chrono::Duration,
    /// Audit entries can trail the gateway event, so a miss is retried.
    pub audit_attempts: u32,
    pub audit_retry_delay: Duration,
    pub audit_fetch_limit: u8,
    /// Lifetime of an ignore entry registered without an explicit TTL.
    pub ignore_ttl: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            audit_timeout: Duration::from_secs(5),
            recency_window: chrono::Duration::minutes(2),
            audit_attempts: 3,
            audit_retry_delay: Duration::from_secs(1),
            audit_fetch_limit: 5,
            ignore_ttl: Duration::from_secs(30),
        }
    }
}
