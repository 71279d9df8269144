//! Opaque status tokens and the sets a reconciler compares them against.

use std::collections::BTreeSet;
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// A resource-type-specific status token.
///
/// The engine attaches no meaning to observed tokens beyond set membership.
/// [`State::Absent`] is the one sentinel it recognizes: the control plane
/// answered "no such resource" (HTTP 404 or equivalent).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// The resource does not exist.
    Absent,
    /// A status reported by the provider.
    Observed(String),
}

impl State {
    /// Create an observed state token.
    pub fn new(token: impl Into<String>) -> Self {
        Self::Observed(token.into())
    }

    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// The raw token, or `"absent"` for the sentinel.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Absent => "absent",
            Self::Observed(token) => token,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "<absent>"),
            Self::Observed(token) => write!(f, "{token}"),
        }
    }
}

impl From<&str> for State {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for State {
    fn from(token: String) -> Self {
        Self::Observed(token)
    }
}

/// An immutable set of states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSet(BTreeSet<State>);

impl StateSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Add a state, consuming and returning the set.
    #[must_use]
    pub fn with(mut self, state: impl Into<State>) -> Self {
        self.0.insert(state.into());
        self
    }

    #[must_use]
    pub fn contains(&self, state: &State) -> bool {
        self.0.contains(state)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &State> {
        self.0.iter()
    }

    /// States present in both sets.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Vec<State> {
        self.0.intersection(&other.0).cloned().collect()
    }

    #[must_use]
    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.0.is_disjoint(&other.0)
    }
}

impl<S: Into<State>> FromIterator<S> for StateSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for StateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.iter().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_absent_never_equals_observed_token() {
        assert_ne!(State::Absent, State::new("absent"));
        assert_eq!(State::Absent.as_str(), "absent");
        assert!(State::Absent.is_absent());
        assert!(!State::new("absent").is_absent());
    }

    #[test]
    fn test_state_set_membership() {
        let set: StateSet = ["available", "failed"].into_iter().collect();
        assert!(set.contains(&State::new("available")));
        assert!(!set.contains(&State::new("provisioning")));
        assert!(!set.contains(&State::Absent));

        let set = set.with(State::Absent);
        assert!(set.contains(&State::Absent));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_state_set_display() {
        let set: StateSet = ["b", "a"].into_iter().collect();
        assert_eq!(set.to_string(), "{a, b}");
        assert_eq!(StateSet::new().with(State::Absent).to_string(), "{<absent>}");
    }

    proptest! {
        #[test]
        fn intersection_is_empty_iff_disjoint(
            left in proptest::collection::vec("[a-d]", 0..4),
            right in proptest::collection::vec("[a-d]", 0..4),
        ) {
            let left: StateSet = left.into_iter().collect();
            let right: StateSet = right.into_iter().collect();
            prop_assert_eq!(left.is_disjoint(&right), left.intersection(&right).is_empty());
        }
    }
}
