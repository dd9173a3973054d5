//! Inbound webhook payload parsing.
//!
//! The provider posts either JSON or form-urlencoded bodies depending on
//! the product (Messaging vs. Conversations scoped webhooks), and the
//! field casing varies between them (`From` vs. `from`). Parsing is
//! tolerant: unknown fields are ignored, keys match case-insensitively,
//! and a malformed body yields an empty event rather than an error.

use serde_json::Value;

/// Recognized fields of an inbound provider event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Sender address for SMS-scoped events.
    pub from: Option<String>,
    /// Conversation sid for Conversations-scoped events.
    pub conversation_sid: Option<String>,
    /// Message author for Conversations-scoped events.
    pub author: Option<String>,
}

impl InboundEvent {
    /// Parse a webhook body, dispatching on the content type.
    ///
    /// With no usable content type, JSON is tried first and the form
    /// decoder is the fallback.
    #[must_use]
    pub fn parse(content_type: Option<&str>, body: &str) -> Self {
        let content_type = content_type.unwrap_or_default();
        if content_type.contains("json") {
            return Self::from_json(body);
        }
        if content_type.contains("form-urlencoded") {
            return Self::from_form(body);
        }
        let event = Self::from_json(body);
        if event == Self::default() {
            Self::from_form(body)
        } else {
            event
        }
    }

    fn from_json(body: &str) -> Self {
        let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
            return Self::default();
        };
        let mut event = Self::default();
        for (key, value) in map {
            let Some(value) = value.as_str() else {
                continue;
            };
            event.absorb(&key, value);
        }
        event
    }

    fn from_form(body: &str) -> Self {
        let mut event = Self::default();
        for pair in body.split('&') {
            let Some((key, raw_value)) = pair.split_once('=') else {
                continue;
            };
            event.absorb(key, &decode_component(raw_value));
        }
        event
    }

    fn absorb(&mut self, key: &str, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        if key.eq_ignore_ascii_case("from") {
            self.from = Some(value.to_owned());
        } else if key.eq_ignore_ascii_case("conversationsid") {
            self.conversation_sid = Some(value.to_owned());
        } else if key.eq_ignore_ascii_case("author") {
            self.author = Some(value.to_owned());
        }
    }
}

/// Decode one form-urlencoded component (`+` and `%XX` escapes).
fn decode_component(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let high = char::from(bytes[i + 1]).to_digit(16);
                let low = char::from(bytes[i + 2]).to_digit(16);
                if let (Some(high), Some(low)) = (high, low) {
                    out.push((high * 16 + low) as u8);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
