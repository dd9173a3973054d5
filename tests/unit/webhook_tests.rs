//! Unit tests for inbound webhook payload parsing.

use task_autopilot::http::webhook::InboundEvent;

#[test]
fn json_body_with_provider_casing() {
    let event = InboundEvent::parse(
        Some("application/json"),
        r#"{"From":"+5511999990001","ConversationSid":"CH123","Author":"Bia"}"#,
    );
    assert_eq!(event.from.as_deref(), Some("+5511999990001"));
    assert_eq!(event.conversation_sid.as_deref(), Some("CH123"));
    assert_eq!(event.author.as_deref(), Some("Bia"));
}

#[test]
fn json_body_with_lowercase_first_letter() {
    let event = InboundEvent::parse(
        Some("application/json; charset=utf-8"),
        r#"{"from":"+5511","conversationSid":"CH9","author":"ana"}"#,
    );
    assert_eq!(event.from.as_deref(), Some("+5511"));
    assert_eq!(event.conversation_sid.as_deref(), Some("CH9"));
    assert_eq!(event.author.as_deref(), Some("ana"));
}

#[test]
fn form_body_decodes_escapes() {
    let event = InboundEvent::parse(
        Some("application/x-www-form-urlencoded"),
        "From=%2B5511999990001&Body=Ol%C3%A1+mundo&Author=Maria+Clara",
    );
    assert_eq!(event.from.as_deref(), Some("+5511999990001"));
    assert_eq!(event.author.as_deref(), Some("Maria Clara"));
    assert!(event.conversation_sid.is_none());
}

#[test]
fn missing_content_type_falls_back_to_form() {
    let event = InboundEvent::parse(None, "ConversationSid=CH42&Author=cliente");
    assert_eq!(event.conversation_sid.as_deref(), Some("CH42"));
    assert_eq!(event.author.as_deref(), Some("cliente"));
}

#[test]
fn missing_content_type_still_reads_json() {
    let event = InboundEvent::parse(None, r#"{"ConversationSid":"CH77"}"#);
    assert_eq!(event.conversation_sid.as_deref(), Some("CH77"));
}

#[test]
fn malformed_body_yields_empty_event() {
    let event = InboundEvent::parse(Some("application/json"), "{not json");
    assert_eq!(event, InboundEvent::default());

    let event = InboundEvent::parse(Some("application/x-www-form-urlencoded"), "");
    assert_eq!(event, InboundEvent::default());
}

#[test]
fn blank_fields_are_ignored() {
    let event = InboundEvent::parse(
        Some("application/x-www-form-urlencoded"),
        "From=&Author=%20&ConversationSid=CH1",
    );
    assert!(event.from.is_none());
    assert!(event.author.is_none());
    assert_eq!(event.conversation_sid.as_deref(), Some("CH1"));
}
