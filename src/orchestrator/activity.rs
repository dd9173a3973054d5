//! Inbound customer-activity sinks.
//!
//! Called by the webhook layer on every inbound message. Recording
//! activity cancels the task's armed deadlines so no ping or closure
//! goes out after the customer has spoken. Repository failures are
//! swallowed: the webhook must always answer success or the provider
//! enters a retry loop.

use chrono::Utc;
use tracing::{debug, info, warn};

use super::engine::AutomationEngine;

impl AutomationEngine {
    /// Record customer activity for an internal task, by contact number.
    ///
    /// When the customer has several assigned tasks, only the most
    /// recently updated one is touched.
    pub async fn mark_activity_by_contact(&self, customer_contact: &str) {
        let task = match self
            .tasks
            .find_latest_assigned_by_contact(customer_contact)
            .await
        {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!(customer_contact, "inbound with no assigned task");
                return;
            }
            Err(err) => {
                warn!(customer_contact, %err, "activity lookup failed");
                return;
            }
        };

        if let Err(err) = self.tasks.mark_customer_activity(&task.id, Utc::now()).await {
            warn!(task_id = %task.id, %err, "failed to persist customer activity");
            return;
        }
        self.scheduler().cancel(&task.id);
        info!(task_id = %task.id, "customer activity recorded");
    }

    /// Record customer activity for a flex task, by conversation sid.
    ///
    /// The author is classified before anything is written: when the
    /// customer's address is known the author must match it; otherwise
    /// anyone who is not the automation author and not the stored worker
    /// counts as the customer. Operator and automation messages are
    /// ignored.
    pub async fn mark_activity_by_conversation(
        &self,
        conversation_sid: &str,
        author: Option<&str>,
    ) {
        let Some(author) = author.map(str::trim).filter(|a| !a.is_empty()) else {
            debug!(conversation_sid, "inbound without author; ignored");
            return;
        };

        let row = match self.flex_tasks.get_by_conversation_sid(conversation_sid).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                debug!(conversation_sid, "inbound for unknown conversation");
                return;
            }
            Err(err) => {
                warn!(conversation_sid, %err, "conversation lookup failed");
                return;
            }
        };

        let known_addresses: Vec<&str> = [
            row.customer_address.as_deref(),
            row.customer_from.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .collect();

        let is_customer = if known_addresses.is_empty() {
            let is_automation = author.eq_ignore_ascii_case(&self.config.automation_author);
            let is_worker = [row.worker_name.as_deref(), row.worker_sid.as_deref()]
                .into_iter()
                .flatten()
                .any(|w| author.eq_ignore_ascii_case(w.trim()));
            !is_automation && !is_worker
        } else {
            known_addresses
                .iter()
                .any(|addr| author.eq_ignore_ascii_case(addr))
        };

        if !is_customer {
            debug!(conversation_sid, author, "non-customer author; ignored");
            return;
        }

        if let Err(err) = self
            .flex_tasks
            .mark_customer_activity(&row.task_sid, Utc::now())
            .await
        {
            warn!(task_sid = %row.task_sid, %err, "failed to persist customer activity");
            return;
        }
        self.scheduler().cancel(&row.task_sid);
        info!(task_sid = %row.task_sid, "customer activity recorded");
    }
}
