//! Reconciliation engine: loop, source selection, internal pipeline.
//!
//! One tick reads the open handoffs from persistence, sends whatever
//! messages are due, and (re)arms the inactivity deadlines. Every remote
//! failure is logged and retried on a later tick; a tick never poisons a
//! row because of a provider response.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{AutomationConfig, TaskSource};
use crate::models::task::TaskStatus;
use crate::persistence::db::Database;
use crate::persistence::flex_repo::FlexTaskRepo;
use crate::persistence::task_repo::TaskRepo;
use crate::provider::MessagingPort;
use crate::templates;
use crate::Result;

use super::scheduler::{InactivityScheduler, TimerAction};

/// Process-wide automation state: repositories, the provider port, the
/// deadline scheduler, and the caches shared by the pipelines.
pub struct AutomationEngine {
    pub(crate) config: AutomationConfig,
    pub(crate) tasks: TaskRepo,
    pub(crate) flex_tasks: FlexTaskRepo,
    pub(crate) provider: Option<Arc<dyn MessagingPort>>,
    pub(crate) scheduler: Arc<InactivityScheduler>,
    tick_running: AtomicBool,
    /// Resolved worker display names, keyed by worker sid.
    pub(crate) worker_names: Mutex<HashMap<String, String>>,
    /// Task sids already warned about a missing worker participant.
    pub(crate) participant_warned: Mutex<HashSet<String>>,
    provider_warned: AtomicBool,
    pub(crate) workspace_warned: AtomicBool,
    /// Cached TaskRouter workspace sid (configured or auto-detected).
    pub(crate) workspace_sid: Mutex<Option<String>>,
}

impl AutomationEngine {
    /// Build the engine over a connected database and optional provider.
    #[must_use]
    pub fn new(
        config: AutomationConfig,
        db: Arc<Database>,
        provider: Option<Arc<dyn MessagingPort>>,
        workspace_sid: Option<String>,
    ) -> Arc<Self> {
        let scheduler = Arc::new(InactivityScheduler::new(
            config.ping_offset(),
            config.inactive_offset(),
        ));
        Arc::new(Self {
            config,
            tasks: TaskRepo::new(Arc::clone(&db)),
            flex_tasks: FlexTaskRepo::new(db),
            provider,
            scheduler,
            tick_running: AtomicBool::new(false),
            worker_names: Mutex::new(HashMap::new()),
            participant_warned: Mutex::new(HashSet::new()),
            provider_warned: AtomicBool::new(false),
            workspace_warned: AtomicBool::new(false),
            workspace_sid: Mutex::new(workspace_sid),
        })
    }

    /// The deadline scheduler (exposed for shutdown and tests).
    #[must_use]
    pub fn scheduler(&self) -> &Arc<InactivityScheduler> {
        &self.scheduler
    }

    /// The internal task repository.
    #[must_use]
    pub fn task_repo(&self) -> &TaskRepo {
        &self.tasks
    }

    /// The flex task repository.
    #[must_use]
    pub fn flex_repo(&self) -> &FlexTaskRepo {
        &self.flex_tasks
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    /// One reconciliation pass. Non-overlapping: a tick that observes a
    /// previous tick still running returns immediately.
    pub async fn tick(self: &Arc<Self>) {
        if self.tick_running.swap(true, Ordering::SeqCst) {
            debug!("previous tick still running; skipping");
            return;
        }
        if let Err(err) = self.run_tick().await {
            error!(%err, "reconciliation tick failed");
        }
        self.tick_running.store(false, Ordering::SeqCst);
    }

    async fn run_tick(self: &Arc<Self>) -> Result<()> {
        match self.config.source {
            TaskSource::Internal => self.process_internal().await,
            TaskSource::Flex => {
                self.process_flex().await?;
                Ok(())
            }
            TaskSource::Auto => match self.process_flex().await {
                Ok(true) => Ok(()),
                Ok(false) => self.process_internal().await,
                Err(err) => {
                    warn!(%err, "flex processing failed; falling back to internal");
                    self.process_internal().await
                }
            },
        }
    }

    /// Walk the assigned internal tasks: greet, re-arm, or cancel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on a persistence failure; remote send
    /// failures are logged and retried on the next tick.
    pub async fn process_internal(self: &Arc<Self>) -> Result<()> {
        let batch = self
            .tasks
            .find_by_status(TaskStatus::Assigned, self.config.batch_size)
            .await?;

        for task in batch {
            if task.status != TaskStatus::Assigned || task.operator_id.is_none() {
                continue;
            }

            if let Some(greeted_at) = task.greeting_sent_at {
                // Already greeted: the epoch either ended (customer spoke,
                // closure committed) or its deadlines must be armed.
                if task.customer_replied_after_greeting() || task.inactive_sent_at.is_some() {
                    self.scheduler.cancel(&task.id);
                    continue;
                }
                if !self.scheduler.has(&task.id) {
                    self.arm_internal(&task.id, greeted_at);
                }
                continue;
            }

            let Some(provider) = self.provider.clone() else {
                self.warn_provider_missing();
                continue;
            };
            let operator_name = task.operator_name.as_deref().unwrap_or_default();
            let body = templates::greeting_body(&task.customer_name, operator_name);
            match provider.send_sms(&task.customer_contact, &body).await {
                Ok(()) => {
                    let now = Utc::now();
                    self.tasks.set_greeting_sent(&task.id, now).await?;
                    info!(task_id = %task.id, "greeting sent");
                    self.arm_internal(&task.id, now);
                }
                Err(err) => {
                    warn!(task_id = %task.id, %err, "greeting send failed; retrying next tick");
                }
            }
        }

        Ok(())
    }

    /// Arm (or re-arm) the internal deadline pair anchored at `greeted_at`.
    pub(crate) fn arm_internal(self: &Arc<Self>, task_id: &str, greeted_at: DateTime<Utc>) {
        self.scheduler.schedule(
            task_id,
            greeted_at,
            self.internal_action(Self::on_internal_ping),
            self.internal_action(Self::on_internal_inactive),
        );
    }

    /// Wrap an engine method as a scheduler callback.
    fn internal_action<F, Fut>(self: &Arc<Self>, method: F) -> TimerAction
    where
        F: Fn(Arc<Self>, String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let engine = Arc::clone(self);
        Arc::new(move |task_id: String| Box::pin(method(Arc::clone(&engine), task_id)))
    }

    /// Ping deadline: re-read the row and send only if the epoch is still
    /// silent and unpinged.
    async fn on_internal_ping(self: Arc<Self>, task_id: String) {
        let Some(provider) = self.provider.clone() else {
            return;
        };
        let task = match self.tasks.get_by_id(&task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(err) => {
                warn!(task_id, %err, "ping callback could not re-read task");
                return;
            }
        };
        if task.status != TaskStatus::Assigned
            || task.greeting_sent_at.is_none()
            || task.ping_sent_at.is_some()
            || task.customer_replied_after_greeting()
        {
            return;
        }

        let body = templates::ping_body(&task.customer_name);
        if let Err(err) = provider.send_sms(&task.customer_contact, &body).await {
            // The inactivity deadline still covers this epoch.
            warn!(task_id, %err, "ping send failed");
            return;
        }
        info!(task_id, "ping sent");
        if let Err(err) = self.tasks.mark_ping_sent(&task_id, Utc::now()).await {
            warn!(task_id, %err, "failed to persist ping mark");
        }
    }

    /// Inactivity deadline: re-read the row, send the closure and commit
    /// the close. A failed send leaves the row untouched so the next tick
    /// re-arms an overdue pair and retries immediately.
    async fn on_internal_inactive(self: Arc<Self>, task_id: String) {
        let Some(provider) = self.provider.clone() else {
            return;
        };
        let task = match self.tasks.get_by_id(&task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(err) => {
                warn!(task_id, %err, "inactive callback could not re-read task");
                return;
            }
        };
        if task.status != TaskStatus::Assigned
            || task.greeting_sent_at.is_none()
            || task.inactive_sent_at.is_some()
            || task.customer_replied_after_greeting()
        {
            return;
        }

        let body = templates::closure_body(&task.customer_name);
        if let Err(err) = provider.send_sms(&task.customer_contact, &body).await {
            warn!(task_id, %err, "closure send failed; retrying next tick");
            return;
        }
        match self.tasks.close_due_to_inactivity(&task_id, Utc::now()).await {
            Ok(()) => info!(task_id, "task closed for inactivity"),
            Err(err) => warn!(task_id, %err, "failed to persist inactivity close"),
        }
        self.scheduler.cancel(&task_id);
    }

    pub(crate) fn warn_provider_missing(&self) {
        if !self.provider_warned.swap(true, Ordering::SeqCst) {
            warn!("messaging provider not configured; outbound automation disabled");
        }
    }
}

/// Spawn the reconciliation dispatcher.
///
/// Fires [`AutomationEngine::tick`] every `poll_interval_ms` until the
/// token is cancelled. Ticks are awaited in sequence here; the engine's
/// own non-overlap flag additionally protects external callers.
#[must_use]
pub fn spawn_automation_loop(
    engine: Arc<AutomationEngine>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_millis(engine.config.poll_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("automation loop shutting down");
                    break;
                }
                _ = interval.tick() => engine.tick().await,
            }
        }
    })
}
