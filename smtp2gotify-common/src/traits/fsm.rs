/// A state machine advanced by discrete inputs.
///
/// Transitions consume the current state and return the next one; anything
/// the machine learns along the way is recorded in `Context`.
pub trait FiniteStateMachine: Sized {
    type Input;
    type Context;

    #[must_use]
    fn transition(self, input: Self::Input, context: &mut Self::Context) -> Self;

    /// Whether no further input will be accepted.
    fn is_terminal(&self) -> bool {
        false
    }
}
