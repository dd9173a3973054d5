//! Automation state mirroring a provider-managed TaskRouter task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Automation state for a task owned end-to-end by the provider's
/// workload broker. The provider is the source of truth for assignment;
/// this row carries only what the automation pipeline needs: descriptive
/// hints parsed from the task attributes, the owning worker, and the
/// greeting-epoch marks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct FlexTask {
    /// Provider-assigned task identifier (primary key).
    pub task_sid: String,
    /// Conversation the task is transported over; indexed for reverse lookup.
    pub conversation_sid: Option<String>,
    /// Channel hint parsed from the task attributes.
    pub channel_type: Option<String>,
    /// Customer display name hint.
    pub customer_name: Option<String>,
    /// Customer messaging address hint.
    pub customer_address: Option<String>,
    /// Customer `from` hint.
    pub customer_from: Option<String>,
    /// Worker owning the accepted reservation.
    pub worker_sid: Option<String>,
    /// Worker display name (resolved or fallback).
    pub worker_name: Option<String>,
    /// Last observed provider assignment status.
    pub task_assignment_status: Option<String>,
    /// Last observed raw task attributes (opaque JSON).
    pub task_attributes: Option<String>,
    /// Greeting send timestamp; opens a new epoch when rewritten.
    pub greeting_sent_at: Option<DateTime<Utc>>,
    /// Ping send timestamp; at most one per epoch.
    pub ping_sent_at: Option<DateTime<Utc>>,
    /// Closure-message send timestamp; at most one per epoch.
    pub inactive_sent_at: Option<DateTime<Utc>>,
    /// Most recent inbound customer activity.
    pub last_customer_activity_at: Option<DateTime<Utc>>,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl FlexTask {
    /// Whether the customer has spoken since the current greeting epoch.
    #[must_use]
    pub fn customer_replied_after_greeting(&self) -> bool {
        match (self.greeting_sent_at, self.last_customer_activity_at) {
            (Some(greeted), Some(activity)) => activity > greeted,
            _ => false,
        }
    }
}

/// Observed provider state written on every poll.
///
/// Separated from [`FlexTask`] because the upsert must not touch the
/// greeting-epoch marks the timers own.
#[derive(Debug, Clone, Default)]
pub struct FlexTaskBaseState {
    pub conversation_sid: Option<String>,
    pub channel_type: Option<String>,
    pub customer_name: Option<String>,
    pub customer_address: Option<String>,
    pub customer_from: Option<String>,
    pub worker_sid: Option<String>,
    pub worker_name: Option<String>,
    pub task_assignment_status: Option<String>,
    pub task_attributes: Option<String>,
}
