//! The message copy is a product contract — asserted byte-for-byte.

use task_autopilot::templates;

#[test]
fn greeting_copy_is_exact() {
    assert_eq!(
        templates::greeting_body("Ana", "Bia"),
        "Olá, Ana. Meu nome é Bia e irei dar continuidade ao seu atendimento.😉❤"
    );
}

#[test]
fn ping_copy_is_exact() {
    assert_eq!(
        templates::ping_body("Ana"),
        "Olá, Ana. Você ainda está no chat?"
    );
}

#[test]
fn closure_copy_is_exact() {
    assert_eq!(
        templates::closure_body("Ana"),
        "Olá, Ana. Identificamos que você está inativo e seu chat será encerrado por inatividade."
    );
}
