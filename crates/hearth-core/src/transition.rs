use serde::Serialize;

/// Result of a forward-only state transition.
///
/// Repeating a transition that already happened is not an error: the caller
/// gets the aggregate back as `AlreadyTerminal` and nothing changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "record", rename_all = "snake_case")]
pub enum Transition<T> {
    Applied(T),
    AlreadyTerminal(T),
}

impl<T> Transition<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }

    pub fn value(&self) -> &T {
        match self {
            Transition::Applied(value) | Transition::AlreadyTerminal(value) => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Transition::Applied(value) | Transition::AlreadyTerminal(value) => value,
        }
    }
}
