//! Flex pipeline: automation over provider-managed tasks.
//!
//! Tasks live in the provider's workload broker and are transported over
//! its Conversations API; this side only mirrors the observed state and
//! supplies the automated messages. Rows are upserted on every poll so a
//! restart loses nothing but in-flight timers, which the next tick
//! re-derives from the greeting marks.

use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::models::flex_task::{FlexTask, FlexTaskBaseState};
use crate::provider::{MessagingPort, Reservation, Worker};
use crate::templates;
use crate::Result;

use super::engine::AutomationEngine;
use super::identity::{self, IdentityHints};

/// Customer display name used when the attributes carry none.
const FALLBACK_CUSTOMER_NAME: &str = "cliente";
/// Worker display name used when neither reservation nor worker record
/// carries one.
const FALLBACK_WORKER_NAME: &str = "Atendente";

impl AutomationEngine {
    /// One flex pass. Returns whether any provider task was processed,
    /// which in `auto` mode decides whether the internal pipeline runs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Provider` on enumeration failures and
    /// `AppError::Db` on persistence failures. Per-task provider errors
    /// are logged and skipped.
    pub async fn process_flex(self: &Arc<Self>) -> Result<bool> {
        let Some(provider) = self.provider.clone() else {
            self.warn_provider_missing();
            return Ok(false);
        };
        let Some(workspace_sid) = self.resolve_workspace(provider.as_ref()).await? else {
            return Ok(false);
        };

        let provider_tasks = provider
            .list_assigned_tasks(
                &workspace_sid,
                &["assigned", "reserved"],
                self.config.flex_poll_limit,
            )
            .await?;
        if provider_tasks.is_empty() {
            return Ok(false);
        }

        let mut processed = 0usize;
        for provider_task in provider_tasks {
            let attributes = parse_attributes(&provider_task.attributes);
            let Some(conversation_sid) = conversation_sid_from(&attributes) else {
                // Not a Conversations-transported task (voice, legacy chat).
                continue;
            };

            let reservation = match provider
                .list_accepted_reservations(&workspace_sid, &provider_task.sid, 1)
                .await
            {
                Ok(reservations) => match reservations.into_iter().next() {
                    Some(reservation) => reservation,
                    None => continue,
                },
                Err(err) => {
                    warn!(task_sid = %provider_task.sid, %err, "reservation listing failed");
                    continue;
                }
            };

            let state = self
                .observed_state(
                    provider.as_ref(),
                    &workspace_sid,
                    &provider_task.sid,
                    &provider_task.assignment_status,
                    &provider_task.attributes,
                    &attributes,
                    conversation_sid,
                    &reservation,
                )
                .await;
            self.flex_tasks
                .upsert_base_state(&provider_task.sid, &state, Utc::now())
                .await?;
            processed += 1;

            let Some(row) = self.flex_tasks.get_by_task_sid(&provider_task.sid).await? else {
                continue;
            };

            if let Some(greeted_at) = row.greeting_sent_at {
                if row.customer_replied_after_greeting() || row.inactive_sent_at.is_some() {
                    self.scheduler.cancel(&row.task_sid);
                    continue;
                }
                if !self.scheduler.has(&row.task_sid) {
                    self.arm_flex(&row.task_sid, greeted_at);
                }
                continue;
            }

            self.greet_flex_task(provider.as_ref(), &row).await;
        }

        Ok(processed > 0)
    }

    /// Send the flex greeting once a worker participant is resolvable.
    async fn greet_flex_task(self: &Arc<Self>, provider: &dyn MessagingPort, row: &FlexTask) {
        let Some(conversation_sid) = row.conversation_sid.as_deref() else {
            return;
        };

        let hints = IdentityHints {
            worker_name: row.worker_name.clone(),
            customer_address: row.customer_address.clone(),
            customer_from: row.customer_from.clone(),
        };
        let author = match identity::resolve_worker_participant(
            provider,
            conversation_sid,
            row.worker_sid.as_deref(),
            &hints,
        )
        .await
        {
            Ok(Some(author)) => author,
            Ok(None) => {
                // The operator may not have joined the conversation yet;
                // warn once and let a later tick retry.
                let newly_warned = self
                    .lock_participant_warned()
                    .insert(row.task_sid.clone());
                if newly_warned {
                    warn!(
                        task_sid = %row.task_sid,
                        conversation_sid,
                        "worker participant not resolved; greeting deferred"
                    );
                }
                return;
            }
            Err(err) => {
                warn!(task_sid = %row.task_sid, %err, "participant listing failed");
                return;
            }
        };

        let customer_name = display_customer_name(row);
        let worker_name = row
            .worker_name
            .as_deref()
            .unwrap_or(FALLBACK_WORKER_NAME);
        let body = templates::greeting_body(&customer_name, worker_name);
        if let Err(err) = provider
            .post_conversation_message(conversation_sid, &author, &body)
            .await
        {
            warn!(task_sid = %row.task_sid, %err, "greeting post failed; retrying next tick");
            return;
        }

        let now = Utc::now();
        if let Err(err) = self.flex_tasks.set_greeting_sent(&row.task_sid, now).await {
            warn!(task_sid = %row.task_sid, %err, "failed to persist greeting mark");
            return;
        }
        info!(task_sid = %row.task_sid, "flex greeting sent");
        self.lock_participant_warned().remove(&row.task_sid);
        self.arm_flex(&row.task_sid, now);
    }

    /// Arm (or re-arm) the flex deadline pair anchored at `greeted_at`.
    pub(crate) fn arm_flex(self: &Arc<Self>, task_sid: &str, greeted_at: DateTime<Utc>) {
        let ping_engine = Arc::clone(self);
        let inactive_engine = Arc::clone(self);
        self.scheduler.schedule(
            task_sid,
            greeted_at,
            Arc::new(move |sid| {
                let engine = Arc::clone(&ping_engine);
                Box::pin(async move { engine.on_flex_ping(sid).await })
            }),
            Arc::new(move |sid| {
                let engine = Arc::clone(&inactive_engine);
                Box::pin(async move { engine.on_flex_inactive(sid).await })
            }),
        );
    }

    /// Flex ping deadline: post the are-you-there message as the worker.
    ///
    /// Skips when the worker identity cannot be resolved; the inactivity
    /// deadline still covers the epoch.
    async fn on_flex_ping(self: Arc<Self>, task_sid: String) {
        let Some(provider) = self.provider.clone() else {
            return;
        };
        let Some(row) = self.reread_flex_epoch(&task_sid).await else {
            return;
        };
        if row.ping_sent_at.is_some() {
            return;
        }
        let Some(conversation_sid) = row.conversation_sid.as_deref() else {
            return;
        };

        let hints = IdentityHints {
            worker_name: row.worker_name.clone(),
            customer_address: row.customer_address.clone(),
            customer_from: row.customer_from.clone(),
        };
        let author = match identity::resolve_worker_participant(
            provider.as_ref(),
            conversation_sid,
            row.worker_sid.as_deref(),
            &hints,
        )
        .await
        {
            Ok(Some(author)) => author,
            Ok(None) => {
                warn!(task_sid, "worker participant not resolved; ping skipped");
                return;
            }
            Err(err) => {
                warn!(task_sid, %err, "participant listing failed; ping skipped");
                return;
            }
        };

        let body = templates::ping_body(&display_customer_name(&row));
        if let Err(err) = provider
            .post_conversation_message(conversation_sid, &author, &body)
            .await
        {
            warn!(task_sid, %err, "flex ping post failed");
            return;
        }
        info!(task_sid, "flex ping sent");
        if let Err(err) = self.flex_tasks.mark_ping_sent(&task_sid, Utc::now()).await {
            warn!(task_sid, %err, "failed to persist flex ping mark");
        }
    }

    /// Flex inactivity deadline: post the closure, then tear down the
    /// conversation and complete the provider task (each gated by config).
    ///
    /// Falls back to the automation author when no worker identity
    /// resolves, so an epoch can always terminate.
    async fn on_flex_inactive(self: Arc<Self>, task_sid: String) {
        let Some(provider) = self.provider.clone() else {
            return;
        };
        let Some(row) = self.reread_flex_epoch(&task_sid).await else {
            return;
        };
        if row.inactive_sent_at.is_some() {
            return;
        }
        let Some(conversation_sid) = row.conversation_sid.as_deref() else {
            return;
        };

        let hints = IdentityHints {
            worker_name: row.worker_name.clone(),
            customer_address: row.customer_address.clone(),
            customer_from: row.customer_from.clone(),
        };
        let author = match identity::resolve_worker_participant(
            provider.as_ref(),
            conversation_sid,
            row.worker_sid.as_deref(),
            &hints,
        )
        .await
        {
            Ok(Some(author)) => author,
            Ok(None) => self.config.automation_author.clone(),
            Err(err) => {
                warn!(task_sid, %err, "participant listing failed; closure deferred");
                return;
            }
        };

        let body = templates::closure_body(&display_customer_name(&row));
        if let Err(err) = provider
            .post_conversation_message(conversation_sid, &author, &body)
            .await
        {
            warn!(task_sid, %err, "flex closure post failed; retrying next tick");
            return;
        }
        if let Err(err) = self
            .flex_tasks
            .mark_inactive_sent(&task_sid, Utc::now())
            .await
        {
            // Without the mark the next tick re-arms and retries; tearing
            // down now would strand the row half-closed.
            warn!(task_sid, %err, "failed to persist flex inactive mark");
            return;
        }
        info!(task_sid, "flex task closed for inactivity");

        if self.config.close_conversation {
            if let Err(err) = provider.close_conversation(conversation_sid).await {
                warn!(task_sid, %err, "conversation close failed");
            }
        }
        if self.config.complete_task {
            let workspace_sid = self.lock_workspace_sid().clone();
            match workspace_sid {
                Some(workspace_sid) => {
                    if let Err(err) = provider
                        .complete_task(&workspace_sid, &task_sid, "inactivity")
                        .await
                    {
                        warn!(task_sid, %err, "task completion failed");
                    }
                }
                None => warn!(task_sid, "workspace unknown; task completion skipped"),
            }
        }

        self.scheduler.cancel(&task_sid);
    }

    /// Re-read a flex row and keep only live, silent epochs.
    async fn reread_flex_epoch(&self, task_sid: &str) -> Option<FlexTask> {
        let row = match self.flex_tasks.get_by_task_sid(task_sid).await {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(err) => {
                warn!(task_sid, %err, "flex callback could not re-read task");
                return None;
            }
        };
        if row.greeting_sent_at.is_none() || row.customer_replied_after_greeting() {
            return None;
        }
        Some(row)
    }

    /// The TaskRouter workspace: configured, cached, or auto-detected.
    ///
    /// Detection accepts a single workspace, or a single workspace whose
    /// friendly name contains "flex"; anything else warns once and
    /// disables the flex pipeline for the process.
    async fn resolve_workspace(&self, provider: &dyn MessagingPort) -> Result<Option<String>> {
        if let Some(sid) = self.lock_workspace_sid().clone() {
            return Ok(Some(sid));
        }

        let workspaces = provider.list_workspaces().await?;
        let detected = if workspaces.len() == 1 {
            Some(workspaces[0].sid.clone())
        } else {
            let mut flex_named = workspaces
                .iter()
                .filter(|w| w.friendly_name.to_lowercase().contains("flex"));
            match (flex_named.next(), flex_named.next()) {
                (Some(only), None) => Some(only.sid.clone()),
                _ => None,
            }
        };

        match detected {
            Some(sid) => {
                info!(workspace_sid = %sid, "TaskRouter workspace detected");
                *self.lock_workspace_sid() = Some(sid.clone());
                Ok(Some(sid))
            }
            None => {
                if !self.workspace_warned.swap(true, Ordering::SeqCst) {
                    warn!(
                        count = workspaces.len(),
                        "could not determine TaskRouter workspace; set TWILIO_WORKSPACE_SID"
                    );
                }
                Ok(None)
            }
        }
    }

    /// Assemble the observed base state for the upsert, resolving the
    /// worker display name through the stored row, the per-process cache,
    /// or a one-shot worker fetch.
    #[allow(clippy::too_many_arguments)]
    async fn observed_state(
        &self,
        provider: &dyn MessagingPort,
        workspace_sid: &str,
        task_sid: &str,
        assignment_status: &str,
        raw_attributes: &str,
        attributes: &Value,
        conversation_sid: &str,
        reservation: &Reservation,
    ) -> FlexTaskBaseState {
        let fallback_name = {
            let trimmed = reservation.worker_name.trim();
            if trimmed.is_empty() {
                FALLBACK_WORKER_NAME.to_owned()
            } else {
                trimmed.to_owned()
            }
        };

        let stored_name = match self.flex_tasks.get_by_task_sid(task_sid).await {
            Ok(row) => row.and_then(|r| r.worker_name),
            Err(err) => {
                warn!(task_sid, %err, "stored worker name lookup failed");
                None
            }
        };

        let worker_name = self
            .resolve_worker_display_name(
                provider,
                workspace_sid,
                &reservation.worker_sid,
                stored_name,
                &fallback_name,
            )
            .await;

        FlexTaskBaseState {
            conversation_sid: Some(conversation_sid.to_owned()),
            channel_type: attr_str(attributes, &["channelType"])
                .or_else(|| attr_str(attributes, &["channel_type"]))
                .map(str::to_owned),
            customer_name: Some(customer_name_from(attributes)),
            customer_address: attr_str(attributes, &["customerAddress"])
                .or_else(|| attr_str(attributes, &["customers", "address"]))
                .map(str::to_owned),
            customer_from: attr_str(attributes, &["from"]).map(str::to_owned),
            worker_sid: Some(reservation.worker_sid.clone()),
            worker_name: Some(worker_name),
            task_assignment_status: Some(assignment_status.to_owned()),
            task_attributes: Some(raw_attributes.to_owned()),
        }
    }

    /// Resolve the operator display name shown in the greeting.
    async fn resolve_worker_display_name(
        &self,
        provider: &dyn MessagingPort,
        workspace_sid: &str,
        worker_sid: &str,
        stored_name: Option<String>,
        fallback_name: &str,
    ) -> String {
        if let Some(stored) = stored_name {
            if !is_fallback_name(&stored, fallback_name) {
                return stored;
            }
        }
        if worker_sid.is_empty() {
            return fallback_name.to_owned();
        }
        if let Some(cached) = self.lock_worker_names().get(worker_sid).cloned() {
            return cached;
        }

        let resolved = match provider.fetch_worker(workspace_sid, worker_sid).await {
            Ok(worker) => worker_display_name(&worker).unwrap_or_else(|| fallback_name.to_owned()),
            Err(err) => {
                warn!(worker_sid, %err, "worker fetch failed; using fallback name");
                fallback_name.to_owned()
            }
        };
        self.lock_worker_names()
            .insert(worker_sid.to_owned(), resolved.clone());
        resolved
    }

    fn lock_worker_names(
        &self,
    ) -> std::sync::MutexGuard<'_, std::collections::HashMap<String, String>> {
        self.worker_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_participant_warned(
        &self,
    ) -> std::sync::MutexGuard<'_, std::collections::HashSet<String>> {
        self.participant_warned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_workspace_sid(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.workspace_sid
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Parse raw task attributes, treating malformed JSON as empty.
fn parse_attributes(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

/// Walk a JSON path and return the trimmed non-empty string at the end.
fn attr_str<'a>(root: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = root;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// Conversation sid from the attributes; only `CH`-prefixed values count.
fn conversation_sid_from(attributes: &Value) -> Option<&str> {
    attr_str(attributes, &["conversationSid"]).filter(|sid| sid.starts_with("CH"))
}

/// Customer display name precedence:
/// `customers.name` → `friendlyName` → `from` → `"cliente"`.
fn customer_name_from(attributes: &Value) -> String {
    attr_str(attributes, &["customers", "name"])
        .or_else(|| attr_str(attributes, &["friendlyName"]))
        .or_else(|| attr_str(attributes, &["from"]))
        .unwrap_or(FALLBACK_CUSTOMER_NAME)
        .to_owned()
}

fn display_customer_name(row: &FlexTask) -> String {
    row.customer_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(FALLBACK_CUSTOMER_NAME)
        .to_owned()
}

fn is_fallback_name(name: &str, fallback_name: &str) -> bool {
    let trimmed = name.trim();
    trimmed.is_empty() || trimmed == fallback_name || trimmed == FALLBACK_WORKER_NAME
}

/// Worker display name from the worker record:
/// `attributes.full_name | fullName | fullname | name`, then
/// `friendlyName`.
fn worker_display_name(worker: &Worker) -> Option<String> {
    let attributes = parse_attributes(&worker.attributes);
    ["full_name", "fullName", "fullname", "name"]
        .iter()
        .find_map(|key| attr_str(&attributes, &[key]))
        .map(str::to_owned)
        .or_else(|| {
            let friendly = worker.friendly_name.trim();
            (!friendly.is_empty()).then(|| friendly.to_owned())
        })
}
