//! Engine-wide constants

/// Actor recorded when the escalation sweeper approves on an approver's behalf
pub const SYSTEM_ACTOR: &str = "system@approvals";

/// Prefix of the placeholder stored for role steps that don't resolve to exactly one person
pub const ROLE_PLACEHOLDER_PREFIX: &str = "role:";

/// Default seconds between escalation sweeps
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Default hours between reminders for a request still pending
pub const DEFAULT_REMINDER_INTERVAL_HOURS: u32 = 24;

/// Default cap on reminders per request
pub const DEFAULT_MAX_REMINDERS: u32 = 3;
