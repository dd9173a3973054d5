//! Worker-participant identity resolution.
//!
//! The provider attributes a conversation message to its author by chat
//! identity. Before the automation can greet on behalf of an operator it
//! must find which participant in the conversation *is* that operator.
//! Matching runs through an ordered rule list over the participant
//! snapshot; the first hit wins.

use serde_json::Value;

use crate::provider::{MessagingPort, Participant};
use crate::Result;

const PARTICIPANT_PAGE_LIMIT: u32 = 50;

/// Descriptive hints that help classify participants.
#[derive(Debug, Default, Clone)]
pub struct IdentityHints {
    /// Worker display name, if known.
    pub worker_name: Option<String>,
    /// Customer messaging address, if known.
    pub customer_address: Option<String>,
    /// Customer `from` hint, if known.
    pub customer_from: Option<String>,
}

/// List the conversation's participants and resolve the worker identity.
///
/// Returns `Ok(None)` when no rule matches; the caller decides whether
/// to warn and retry on a later tick.
///
/// # Errors
///
/// Returns `AppError::Provider` if the participant listing fails.
pub async fn resolve_worker_participant(
    provider: &dyn MessagingPort,
    conversation_sid: &str,
    worker_sid: Option<&str>,
    hints: &IdentityHints,
) -> Result<Option<String>> {
    let participants = provider
        .list_conversation_participants(conversation_sid, PARTICIPANT_PAGE_LIMIT)
        .await?;
    Ok(resolve_from_participants(&participants, worker_sid, hints))
}

/// Pick the worker's identity string from a participant snapshot.
///
/// Priority order:
/// 1. identity equals the worker sid (case-insensitive, trimmed);
/// 2. identity equals the worker display name;
/// 3. JSON attributes carry a worker-sid field equal to the worker sid;
/// 4. the raw attributes string contains the worker sid;
/// 5. the single participant that is not the customer.
#[must_use]
pub fn resolve_from_participants(
    participants: &[Participant],
    worker_sid: Option<&str>,
    hints: &IdentityHints,
) -> Option<String> {
    if let Some(worker_sid) = non_empty(worker_sid) {
        if let Some(identity) = find_by_identity(participants, worker_sid) {
            return Some(identity);
        }
    }

    if let Some(worker_name) = non_empty(hints.worker_name.as_deref()) {
        if let Some(identity) = find_by_identity(participants, worker_name) {
            return Some(identity);
        }
    }

    if let Some(worker_sid) = non_empty(worker_sid) {
        if let Some(identity) = find_by_attribute_sid(participants, worker_sid) {
            return Some(identity);
        }
        if let Some(identity) = find_by_attribute_substring(participants, worker_sid) {
            return Some(identity);
        }
    }

    find_sole_non_customer(participants, hints)
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

/// Rule 1/2 — exact identity match, case-insensitive and trimmed.
fn find_by_identity(participants: &[Participant], needle: &str) -> Option<String> {
    participants.iter().find_map(|p| {
        let identity = p.identity.as_deref()?.trim();
        (!identity.is_empty() && identity.eq_ignore_ascii_case(needle))
            .then(|| identity.to_owned())
    })
}

/// Rule 3 — a worker-sid field inside the participant's JSON attributes.
fn find_by_attribute_sid(participants: &[Participant], worker_sid: &str) -> Option<String> {
    participants.iter().find_map(|p| {
        let identity = non_empty(p.identity.as_deref())?;
        let attributes: Value = serde_json::from_str(p.attributes.as_deref()?).ok()?;
        let matched = ["workerSid", "worker_sid", "worker_id", "workerId"]
            .iter()
            .filter_map(|key| attributes.get(key))
            .filter_map(Value::as_str)
            .any(|value| value.trim().eq_ignore_ascii_case(worker_sid));
        matched.then(|| identity.to_owned())
    })
}

/// Rule 4 — the raw attributes string mentions the worker sid at all.
fn find_by_attribute_substring(participants: &[Participant], worker_sid: &str) -> Option<String> {
    participants.iter().find_map(|p| {
        let identity = non_empty(p.identity.as_deref())?;
        p.attributes
            .as_deref()
            .is_some_and(|raw| raw.contains(worker_sid))
            .then(|| identity.to_owned())
    })
}

/// Rule 5 — exactly one participant that is not the customer.
fn find_sole_non_customer(participants: &[Participant], hints: &IdentityHints) -> Option<String> {
    let customer_addresses: Vec<&str> = [
        hints.customer_address.as_deref(),
        hints.customer_from.as_deref(),
    ]
    .into_iter()
    .filter_map(non_empty)
    .collect();

    let mut candidates = participants.iter().filter_map(|p| {
        if is_customer(p, &customer_addresses) {
            return None;
        }
        non_empty(p.identity.as_deref()).map(str::to_owned)
    });

    let first = candidates.next()?;
    // Ambiguous when a second non-customer exists; refuse to guess.
    candidates.next().is_none().then_some(first)
}

fn is_customer(participant: &Participant, customer_addresses: &[&str]) -> bool {
    let matches_customer = |value: Option<&str>| {
        non_empty(value).is_some_and(|v| {
            customer_addresses
                .iter()
                .any(|addr| addr.eq_ignore_ascii_case(v))
        })
    };
    matches_customer(participant.identity.as_deref())
        || matches_customer(participant.messaging_address.as_deref())
}
