//! Automated message copy for the handoff lifecycle.
//!
//! Pure functions so the bodies can be asserted byte-for-byte in tests.
//! The copy is customer-facing Portuguese and must not be reworded
//! without product sign-off.

/// Greeting posted when an operator takes over the conversation.
#[must_use]
pub fn greeting_body(customer_name: &str, operator_name: &str) -> String {
    format!(
        "Olá, {customer_name}. Meu nome é {operator_name} e irei dar continuidade ao seu atendimento.\u{1f609}\u{2764}"
    )
}

/// Are-you-still-there ping sent when the customer stays silent.
#[must_use]
pub fn ping_body(customer_name: &str) -> String {
    format!("Olá, {customer_name}. Você ainda está no chat?")
}

/// Closing message sent when the inactivity deadline elapses.
#[must_use]
pub fn closure_body(customer_name: &str) -> String {
    format!(
        "Olá, {customer_name}. Identificamos que você está inativo e seu chat será encerrado por inatividade."
    )
}
