use thiserror::Error;

use crate::StateId;

/// Errors raised while converting a call stack into a prediction context.
///
/// These all indicate a malformed automaton or call stack; the graph
/// operations themselves never fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("no ATN state numbered {0}")]
    UnknownState(StateId),
    #[error("ATN state {0} has no rule transition")]
    MissingRuleTransition(StateId),
    #[error("non-root call frame has no invoking state")]
    InvalidInvokingState,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
