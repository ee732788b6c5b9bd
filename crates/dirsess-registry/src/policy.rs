//! Anonymous-access gate.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::RegistryError;

pub const ANONYMOUS_DISABLED: &str = "anonymous binds disabled";

/// Source of the server-wide anonymous-access switch.
///
/// Read on every call; the registry never caches the answer.
pub trait AccessSettings: Send + Sync {
    fn is_anonymous_access_allowed(&self) -> bool;
}

/// Runtime-togglable anonymous-access switch.
#[derive(Debug)]
pub struct AnonymousAccessFlag(AtomicBool);

impl AnonymousAccessFlag {
    pub fn new(allowed: bool) -> Self {
        Self(AtomicBool::new(allowed))
    }

    pub fn set(&self, allowed: bool) {
        self.0.store(allowed, Ordering::Release);
    }
}

impl Default for AnonymousAccessFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl AccessSettings for AnonymousAccessFlag {
    fn is_anonymous_access_allowed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of an access check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    /// Anonymous access is disabled but root-DSE discovery is exempt.
    Bypass,
    Deny,
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        !matches!(self, Self::Deny)
    }
}

/// Stateless decision function for anonymous-access admissibility.
pub struct AccessPolicy;

impl AccessPolicy {
    pub fn decide(anonymous: bool, anonymous_allowed: bool, root_discovery: bool) -> AccessDecision {
        match (anonymous, anonymous_allowed, root_discovery) {
            (false, _, _) => AccessDecision::Allow,
            (true, true, _) => AccessDecision::Allow,
            (true, false, true) => AccessDecision::Bypass,
            (true, false, false) => AccessDecision::Deny,
        }
    }

    pub fn enforce(
        anonymous: bool,
        anonymous_allowed: bool,
        root_discovery: bool,
    ) -> Result<AccessDecision, RegistryError> {
        match Self::decide(anonymous, anonymous_allowed, root_discovery) {
            AccessDecision::Deny => Err(RegistryError::AccessDenied(ANONYMOUS_DISABLED.into())),
            decision => Ok(decision),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_table() {
        assert_eq!(AccessPolicy::decide(false, false, false), AccessDecision::Allow);
        assert_eq!(AccessPolicy::decide(false, true, true), AccessDecision::Allow);
        assert_eq!(AccessPolicy::decide(true, true, false), AccessDecision::Allow);
        assert_eq!(AccessPolicy::decide(true, true, true), AccessDecision::Allow);
        assert_eq!(AccessPolicy::decide(true, false, true), AccessDecision::Bypass);
        assert_eq!(AccessPolicy::decide(true, false, false), AccessDecision::Deny);
    }

    #[test]
    fn enforce_denies_with_message() {
        let err = AccessPolicy::enforce(true, false, false).unwrap_err();
        assert!(matches!(err, RegistryError::AccessDenied(ref m) if m == ANONYMOUS_DISABLED));
        assert!(AccessPolicy::enforce(true, false, true).unwrap().is_allowed());
    }

    #[test]
    fn flag_is_read_fresh() {
        let flag = AnonymousAccessFlag::default();
        assert!(flag.is_anonymous_access_allowed());
        flag.set(false);
        assert!(!flag.is_anonymous_access_allowed());
        flag.set(true);
        assert!(flag.is_anonymous_access_allowed());
    }
}
