use pretty_assertions::assert_eq;
use tea_common::{panic as tea_panic, Diagnostics, Position, Span, TeaError};

#[test]
fn sema_error_format_matches_reference_compiler() {
    let mut diags = Diagnostics::new();
    let span = Span::single(Position::new(1, 30, 29), 0);
    diags.add(tea_common::Diagnostic::sema_error(
        "bad",
        "return type mismatch, expected 'int', got 'double'",
        span,
    ));

    assert_eq!(diags.error_count(), 1);
    assert_eq!(
        diags.messages[0].message,
        "Function 'bad': return type mismatch, expected 'int', got 'double'. line 1, column 30"
    );
}

#[test]
fn diagnostics_batch_becomes_semantic_error_only_when_nonempty() {
    let diags = Diagnostics::new();
    assert!(diags.into_result().is_ok());

    let mut diags = Diagnostics::new();
    diags.error("oops", Span::single(Position::start(), 0));
    match diags.into_result() {
        Err(TeaError::Semantic { errors }) => assert_eq!(errors.len(), 1),
        other => panic!("expected a Semantic error, got {other:?}"),
    }
}

#[test]
fn panic_sink_is_caught_at_the_boundary_not_the_process() {
    let result = tea_panic::catch(|| {
        tea_panic::panic("boom");
    });
    assert!(result.is_err());
    assert_eq!(result.unwrap_err().message, "boom");
}
