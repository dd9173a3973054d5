//! Internal SMS-handoff task model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for an internal task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task created by the bot flow, no operator yet.
    Open,
    /// Operator assigned; the automation pipeline owns it.
    Assigned,
    /// Task finished (inactivity, manual close).
    Closed,
}

impl TaskStatus {
    /// Stable string form used in persistence and query parameters.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Assigned => "assigned",
            Self::Closed => "closed",
        }
    }

    /// Parse the persisted string form.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "open" => Some(Self::Open),
            "assigned" => Some(Self::Assigned),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// An SMS-mediated customer↔operator handoff, orchestrated entirely in
/// our own persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InternalTask {
    /// Unique record identifier.
    pub id: String,
    /// Customer display name.
    pub customer_name: String,
    /// Customer messaging address (SMS number).
    pub customer_contact: String,
    /// Assigned operator identifier; `None` until assignment.
    pub operator_id: Option<String>,
    /// Assigned operator display name.
    pub operator_name: Option<String>,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// First assignment timestamp; never rewritten.
    pub assigned_at: Option<DateTime<Utc>>,
    /// Greeting send timestamp; opens a new epoch when rewritten.
    pub greeting_sent_at: Option<DateTime<Utc>>,
    /// Ping send timestamp; at most one per epoch.
    pub ping_sent_at: Option<DateTime<Utc>>,
    /// Closure-message send timestamp; at most one per epoch.
    pub inactive_sent_at: Option<DateTime<Utc>>,
    /// Most recent inbound customer activity.
    pub last_customer_activity_at: Option<DateTime<Utc>>,
    /// Close timestamp; set iff status is `Closed`.
    pub closed_at: Option<DateTime<Utc>>,
    /// Close reason; set iff status is `Closed`.
    pub close_reason: Option<String>,
}

impl InternalTask {
    /// Construct a new open task with a generated identifier.
    #[must_use]
    pub fn new(customer_name: String, customer_contact: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            customer_name,
            customer_contact,
            operator_id: None,
            operator_name: None,
            status: TaskStatus::Open,
            created_at: now,
            updated_at: now,
            assigned_at: None,
            greeting_sent_at: None,
            ping_sent_at: None,
            inactive_sent_at: None,
            last_customer_activity_at: None,
            closed_at: None,
            close_reason: None,
        }
    }

    /// Whether the customer has spoken since the current greeting epoch
    /// opened. With no greeting there is no epoch and the answer is false.
    #[must_use]
    pub fn customer_replied_after_greeting(&self) -> bool {
        match (self.greeting_sent_at, self.last_customer_activity_at) {
            (Some(greeted), Some(activity)) => activity > greeted,
            _ => false,
        }
    }
}
