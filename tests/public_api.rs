// Downstream code importing the whole crate root
use swap_flow::*;

#[test]
fn test_glob_import_leaves_crate_paths_unambiguous() {
    assert!(!swap_flow::VERSION.is_empty());
    assert!(matches!(
        swap_flow::parse_command("cancel"),
        Ok(ConsoleCommand::Intent(UserIntent::Cancel))
    ));
    assert_eq!(FlowState::Idle.name(), "Idle");
    assert_eq!(
        SwapError::AmountTooLow.kind().message_key(),
        "swap.form.from.errors.exchangeAmountTooLow"
    );
}
