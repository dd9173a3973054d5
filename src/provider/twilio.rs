//! Live Twilio REST implementation of the messaging port.
//!
//! Three API families are involved: the classic Messages API for SMS,
//! the Conversations API for chat transport, and TaskRouter for the
//! workload broker. All calls authenticate with account-sid basic auth
//! and rely on the HTTP client's default timeout; retry policy belongs
//! to the caller.

use reqwest::Client;
use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::{AppError, Result};

use super::{MessagingPort, Participant, PortFuture, ProviderTask, Reservation, Worker, Workspace};

const SMS_API: &str = "https://api.twilio.com/2010-04-01";
const CONVERSATIONS_API: &str = "https://conversations.twilio.com/v1";
const TASKROUTER_API: &str = "https://taskrouter.twilio.com/v1";

/// Twilio-backed implementation of [`MessagingPort`].
pub struct TwilioClient {
    http: Client,
    account_sid: String,
    auth_token: String,
    phone_number: String,
}

impl TwilioClient {
    /// Build a client from provider credentials.
    #[must_use]
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            http: Client::new(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            phone_number: config.phone_number.clone(),
        }
    }

    /// POST a form-encoded write and discard the response body.
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<()> {
        let response = self
            .http
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await?;
        ensure_success(url, response).await?;
        Ok(())
    }

    /// GET a JSON document.
    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?;
        let response = ensure_success(url, response).await?;
        response.json::<T>().await.map_err(|err| {
            AppError::Provider(format!("unexpected response shape from {url}: {err}"))
        })
    }
}

/// Fail with the status and a body snippet on non-2xx responses.
async fn ensure_success(url: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    Err(AppError::Provider(format!(
        "{url} returned {status}: {snippet}"
    )))
}

#[derive(Deserialize)]
struct WorkspacePage {
    #[serde(default)]
    workspaces: Vec<Workspace>,
}

#[derive(Deserialize)]
struct TaskPage {
    #[serde(default)]
    tasks: Vec<ProviderTask>,
}

#[derive(Deserialize)]
struct ReservationPage {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Deserialize)]
struct ParticipantPage {
    #[serde(default)]
    participants: Vec<WireParticipant>,
}

#[derive(Deserialize)]
struct WireParticipant {
    #[serde(default)]
    sid: String,
    #[serde(default)]
    identity: Option<String>,
    #[serde(default)]
    attributes: Option<String>,
    #[serde(default)]
    messaging_binding: Option<MessagingBinding>,
}

#[derive(Deserialize)]
struct MessagingBinding {
    #[serde(default)]
    address: Option<String>,
}

impl From<WireParticipant> for Participant {
    fn from(wire: WireParticipant) -> Self {
        Self {
            sid: wire.sid,
            identity: wire.identity,
            attributes: wire.attributes,
            messaging_address: wire.messaging_binding.and_then(|b| b.address),
        }
    }
}

impl MessagingPort for TwilioClient {
    fn send_sms<'a>(&'a self, to: &'a str, body: &'a str) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let url = format!("{SMS_API}/Accounts/{}/Messages.json", self.account_sid);
            self.post_form(
                &url,
                &[("To", to), ("From", self.phone_number.as_str()), ("Body", body)],
            )
            .await
        })
    }

    fn post_conversation_message<'a>(
        &'a self,
        conversation_sid: &'a str,
        author: &'a str,
        body: &'a str,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let url = format!("{CONVERSATIONS_API}/Conversations/{conversation_sid}/Messages");
            self.post_form(&url, &[("Author", author), ("Body", body)])
                .await
        })
    }

    fn list_conversation_participants<'a>(
        &'a self,
        conversation_sid: &'a str,
        limit: u32,
    ) -> PortFuture<'a, Vec<Participant>> {
        Box::pin(async move {
            let url = format!(
                "{CONVERSATIONS_API}/Conversations/{conversation_sid}/Participants?PageSize={limit}"
            );
            let page: ParticipantPage = self.get_json(&url).await?;
            Ok(page.participants.into_iter().map(Participant::from).collect())
        })
    }

    fn fetch_worker<'a>(
        &'a self,
        workspace_sid: &'a str,
        worker_sid: &'a str,
    ) -> PortFuture<'a, Worker> {
        Box::pin(async move {
            let url = format!("{TASKROUTER_API}/Workspaces/{workspace_sid}/Workers/{worker_sid}");
            self.get_json(&url).await
        })
    }

    fn list_workspaces(&self) -> PortFuture<'_, Vec<Workspace>> {
        Box::pin(async move {
            let url = format!("{TASKROUTER_API}/Workspaces");
            let page: WorkspacePage = self.get_json(&url).await?;
            Ok(page.workspaces)
        })
    }

    fn list_assigned_tasks<'a>(
        &'a self,
        workspace_sid: &'a str,
        statuses: &'a [&'a str],
        limit: u32,
    ) -> PortFuture<'a, Vec<ProviderTask>> {
        Box::pin(async move {
            let url = format!(
                "{TASKROUTER_API}/Workspaces/{workspace_sid}/Tasks?AssignmentStatus={}&PageSize={limit}",
                statuses.join(",")
            );
            let page: TaskPage = self.get_json(&url).await?;
            Ok(page.tasks)
        })
    }

    fn list_accepted_reservations<'a>(
        &'a self,
        workspace_sid: &'a str,
        task_sid: &'a str,
        limit: u32,
    ) -> PortFuture<'a, Vec<Reservation>> {
        Box::pin(async move {
            let url = format!(
                "{TASKROUTER_API}/Workspaces/{workspace_sid}/Tasks/{task_sid}/Reservations\
                 ?ReservationStatus=accepted&PageSize={limit}"
            );
            let page: ReservationPage = self.get_json(&url).await?;
            Ok(page.reservations)
        })
    }

    fn close_conversation<'a>(&'a self, conversation_sid: &'a str) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let url = format!("{CONVERSATIONS_API}/Conversations/{conversation_sid}");
            self.post_form(&url, &[("State", "closed")]).await
        })
    }

    fn complete_task<'a>(
        &'a self,
        workspace_sid: &'a str,
        task_sid: &'a str,
        reason: &'a str,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let url = format!("{TASKROUTER_API}/Workspaces/{workspace_sid}/Tasks/{task_sid}");
            self.post_form(
                &url,
                &[("AssignmentStatus", "completed"), ("Reason", reason)],
            )
            .await
        })
    }
}
