//! Operator-facing handoff commands.
//!
//! These back the HTTP surface: validate the task's lifecycle state,
//! persist the transition, run the side effect, and hand back the
//! refreshed row. Domain failures surface as typed errors for the HTTP
//! layer to map onto 400 responses.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::models::task::{InternalTask, TaskStatus};
use crate::templates;
use crate::{AppError, Result};

use super::engine::AutomationEngine;

impl AutomationEngine {
    /// Create a new open task for a customer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` on blank inputs and
    /// `AppError::Db` on persistence failure.
    pub async fn create_task(
        &self,
        customer_name: &str,
        customer_contact: &str,
    ) -> Result<InternalTask> {
        let customer_name = customer_name.trim();
        let customer_contact = customer_contact.trim();
        if customer_name.is_empty() || customer_contact.is_empty() {
            return Err(AppError::InvalidState(
                "customer name and contact are required".into(),
            ));
        }
        let task = InternalTask::new(customer_name.to_owned(), customer_contact.to_owned());
        self.tasks.create(&task).await?;
        info!(task_id = %task.id, "task created");
        Ok(task)
    }

    /// Fetch a task or fail with `NotFound`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the task does not exist.
    pub async fn get_task(&self, task_id: &str) -> Result<InternalTask> {
        self.tasks
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {task_id} not found")))
    }

    /// List tasks for the admin read surface.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: u32,
    ) -> Result<Vec<InternalTask>> {
        self.tasks.list(status, limit).await
    }

    /// Assign an operator to a task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for a missing task and
    /// `AppError::InvalidState` for a closed one.
    pub async fn assign(
        &self,
        task_id: &str,
        operator_id: &str,
        operator_name: &str,
    ) -> Result<InternalTask> {
        let task = self.get_task(task_id).await?;
        if task.status == TaskStatus::Closed {
            return Err(AppError::InvalidState(format!(
                "task {task_id} is closed"
            )));
        }
        self.tasks
            .assign(task_id, operator_id, operator_name, Utc::now())
            .await?;
        info!(task_id, operator_id, "task assigned");
        self.get_task(task_id).await
    }

    /// Assign and immediately greet the customer.
    ///
    /// The whole call fails when the greeting cannot be sent; nothing is
    /// recorded in that case and the caller may retry.
    ///
    /// # Errors
    ///
    /// Returns assignment errors, `AppError::InvalidState` when no
    /// provider is configured, or `AppError::Provider` when the send
    /// fails.
    pub async fn start_handoff(
        self: &Arc<Self>,
        task_id: &str,
        operator_id: &str,
        operator_name: &str,
        send_greeting: bool,
    ) -> Result<InternalTask> {
        let task = self.assign(task_id, operator_id, operator_name).await?;
        if !send_greeting {
            return Ok(task);
        }

        let Some(provider) = self.provider.clone() else {
            return Err(AppError::InvalidState(
                "messaging provider not configured".into(),
            ));
        };
        let body = templates::greeting_body(&task.customer_name, operator_name);
        provider.send_sms(&task.customer_contact, &body).await?;

        let now = Utc::now();
        self.tasks.set_greeting_sent(task_id, now).await?;
        info!(task_id, "handoff greeting sent");
        self.arm_internal(task_id, now);
        self.get_task(task_id).await
    }

    /// Record a greeting that was already sent out-of-band and arm the
    /// inactivity deadlines for the new epoch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` unless the task is assigned.
    pub async fn register_greeting(self: &Arc<Self>, task_id: &str) -> Result<InternalTask> {
        let task = self.get_task(task_id).await?;
        if task.status != TaskStatus::Assigned {
            return Err(AppError::InvalidState(format!(
                "task {task_id} is not assigned"
            )));
        }
        let now = Utc::now();
        self.tasks.set_greeting_sent(task_id, now).await?;
        info!(task_id, "greeting registered");
        self.arm_internal(task_id, now);
        self.get_task(task_id).await
    }

    /// Record customer activity and cancel the task's deadlines.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for a missing task.
    pub async fn mark_activity(&self, task_id: &str) -> Result<InternalTask> {
        self.get_task(task_id).await?;
        self.tasks.mark_customer_activity(task_id, Utc::now()).await?;
        self.scheduler().cancel(task_id);
        self.get_task(task_id).await
    }

    /// Close a task manually.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for a missing task and
    /// `AppError::InvalidState` for an already-closed one.
    pub async fn close_task(&self, task_id: &str, reason: &str) -> Result<InternalTask> {
        let task = self.get_task(task_id).await?;
        if task.status == TaskStatus::Closed {
            return Err(AppError::InvalidState(format!(
                "task {task_id} is already closed"
            )));
        }
        let reason = if reason.trim().is_empty() {
            "manual"
        } else {
            reason.trim()
        };
        self.tasks.close(task_id, reason, Utc::now()).await?;
        self.scheduler().cancel(task_id);
        info!(task_id, reason, "task closed");
        self.get_task(task_id).await
    }
}
