//! Capability-typed façade over the messaging provider.
//!
//! The [`MessagingPort`] trait decouples the automation engine from the
//! vendor REST API: the engine sees nine narrow operations and nothing
//! else, so tests drive the full pipeline through a fake implementation.
//! Transient errors are propagated, not retried inside the port.

pub mod twilio;

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use crate::Result;

/// Boxed future alias used by the port's object-safe methods.
pub type PortFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A TaskRouter workspace.
#[derive(Debug, Clone, Deserialize)]
pub struct Workspace {
    /// Provider workspace identifier.
    pub sid: String,
    /// Human-readable workspace name.
    #[serde(default)]
    pub friendly_name: String,
}

/// A TaskRouter task as observed from the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTask {
    /// Provider task identifier.
    pub sid: String,
    /// Current assignment status (`assigned`, `reserved`, ...).
    #[serde(default)]
    pub assignment_status: String,
    /// Raw task attributes JSON.
    #[serde(default)]
    pub attributes: String,
}

/// A worker's accepted claim on a task.
#[derive(Debug, Clone, Deserialize)]
pub struct Reservation {
    /// Provider reservation identifier.
    pub sid: String,
    /// Worker holding the reservation.
    #[serde(default)]
    pub worker_sid: String,
    /// Worker display name as the broker knows it.
    #[serde(default)]
    pub worker_name: String,
}

/// A TaskRouter worker record.
#[derive(Debug, Clone, Deserialize)]
pub struct Worker {
    /// Provider worker identifier.
    pub sid: String,
    /// Human-readable worker name.
    #[serde(default)]
    pub friendly_name: String,
    /// Raw worker attributes JSON.
    #[serde(default)]
    pub attributes: String,
}

/// A member of a conversation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Participant {
    /// Provider participant identifier.
    #[serde(default)]
    pub sid: String,
    /// Chat identity, present for identity-bound participants.
    #[serde(default)]
    pub identity: Option<String>,
    /// Raw participant attributes JSON.
    #[serde(default)]
    pub attributes: Option<String>,
    /// Messaging binding address, present for SMS/WhatsApp participants.
    #[serde(default)]
    pub messaging_address: Option<String>,
}

/// Narrow interface to the messaging provider.
///
/// Implementations must be cheap to clone behind an `Arc` and safe to
/// call concurrently. Every method surfaces the provider's failure as an
/// [`AppError::Provider`](crate::AppError::Provider); callers decide
/// whether to retry on a later tick.
pub trait MessagingPort: Send + Sync {
    /// Send an SMS to a customer number.
    fn send_sms<'a>(&'a self, to: &'a str, body: &'a str) -> PortFuture<'a, ()>;

    /// Post a message into a conversation under the given author.
    fn post_conversation_message<'a>(
        &'a self,
        conversation_sid: &'a str,
        author: &'a str,
        body: &'a str,
    ) -> PortFuture<'a, ()>;

    /// List the participants of a conversation.
    fn list_conversation_participants<'a>(
        &'a self,
        conversation_sid: &'a str,
        limit: u32,
    ) -> PortFuture<'a, Vec<Participant>>;

    /// Fetch a single worker record.
    fn fetch_worker<'a>(
        &'a self,
        workspace_sid: &'a str,
        worker_sid: &'a str,
    ) -> PortFuture<'a, Worker>;

    /// List the account's TaskRouter workspaces.
    fn list_workspaces(&self) -> PortFuture<'_, Vec<Workspace>>;

    /// List tasks in the given assignment statuses.
    fn list_assigned_tasks<'a>(
        &'a self,
        workspace_sid: &'a str,
        statuses: &'a [&'a str],
        limit: u32,
    ) -> PortFuture<'a, Vec<ProviderTask>>;

    /// List accepted reservations for a task.
    fn list_accepted_reservations<'a>(
        &'a self,
        workspace_sid: &'a str,
        task_sid: &'a str,
        limit: u32,
    ) -> PortFuture<'a, Vec<Reservation>>;

    /// Close a conversation.
    fn close_conversation<'a>(&'a self, conversation_sid: &'a str) -> PortFuture<'a, ()>;

    /// Mark a TaskRouter task completed.
    fn complete_task<'a>(
        &'a self,
        workspace_sid: &'a str,
        task_sid: &'a str,
        reason: &'a str,
    ) -> PortFuture<'a, ()>;
}
