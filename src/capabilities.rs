//! Host capability predicates used to filter grids and figure sizes.
//!
//! Requirements are whitespace-separated tokens (`"offline"`, `"no-video"`).
//! Layout code never asks the environment directly; it is handed a
//! [`Capabilities`] implementation and only checks token lists against it.

extern crate alloc;

use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;

/// Predicate over requirement tokens.
pub trait Capabilities {
    /// True when every token in `requirements` is satisfied.
    fn meets_requirements(&self, requirements: &[String]) -> bool;
}

/// Accepts every requirement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllCapabilities;

impl Capabilities for AllCapabilities {
    fn meets_requirements(&self, _requirements: &[String]) -> bool {
        true
    }
}

/// Fixed set of supported tokens.
///
/// A token prefixed with `no-` is met when the unprefixed token is absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    tokens: BTreeSet<String>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, token: &str) -> Self {
        self.tokens.insert(token.to_ascii_lowercase());
        self
    }

    pub fn insert(&mut self, token: &str) {
        self.tokens.insert(token.to_ascii_lowercase());
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }
}

impl Capabilities for CapabilitySet {
    fn meets_requirements(&self, requirements: &[String]) -> bool {
        requirements.iter().all(|req| {
            let req = req.to_ascii_lowercase();
            match req.strip_prefix("no-") {
                Some(negated) => !self.tokens.contains(negated),
                None => self.tokens.contains(&req),
            }
        })
    }
}

impl<F> Capabilities for F
where
    F: Fn(&[String]) -> bool,
{
    fn meets_requirements(&self, requirements: &[String]) -> bool {
        self(requirements)
    }
}

/// Split a `data-requires` style attribute into tokens.
pub fn parse_requirements(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| s.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reqs(raw: &str) -> Vec<String> {
        parse_requirements(Some(raw))
    }

    #[test]
    fn all_capabilities_accepts_anything() {
        assert!(AllCapabilities.meets_requirements(&reqs("offline video")));
    }

    #[test]
    fn capability_set_handles_negation() {
        let caps = CapabilitySet::new().with("offline");
        assert!(caps.meets_requirements(&[]));
        assert!(caps.meets_requirements(&reqs("offline")));
        assert!(!caps.meets_requirements(&reqs("offline video")));
        assert!(caps.meets_requirements(&reqs("no-video")));
        assert!(!caps.meets_requirements(&reqs("no-offline")));
    }

    #[test]
    fn closures_act_as_predicates() {
        let only_empty = |r: &[String]| r.is_empty();
        assert!(only_empty.meets_requirements(&[]));
        assert!(!only_empty.meets_requirements(&reqs("x")));
    }
}
