//! Session → bound security context.

use std::sync::Arc;

use dashmap::DashMap;
use dirsess_core::{Control, SecurityContext, SessionId};

use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::policy::{AccessPolicy, AccessSettings};

/// Concurrent map from session to its currently bound context.
///
/// Shard guards are never held across context construction.
pub struct SessionTable {
    contexts: DashMap<SessionId, Arc<SecurityContext>>,
    config: Arc<RegistryConfig>,
    settings: Arc<dyn AccessSettings>,
}

impl SessionTable {
    pub fn new(config: Arc<RegistryConfig>, settings: Arc<dyn AccessSettings>) -> Self {
        Self {
            contexts: DashMap::new(),
            config,
            settings,
        }
    }

    fn bound(&self, session: &SessionId) -> Option<Arc<SecurityContext>> {
        self.contexts.get(session).map(|c| Arc::clone(c.value()))
    }

    /// Context for an ordinary operation.
    ///
    /// Returns `Ok(None)` when nothing is bound and `allow_anonymous` is false;
    /// the caller has to bind first. Anonymous contexts built here are never
    /// stored, so each call constructs its own.
    pub fn get_context(
        &self,
        session: &SessionId,
        controls: &[Control],
        allow_anonymous: bool,
    ) -> Result<Option<Arc<SecurityContext>>, RegistryError> {
        let allowed = self.settings.is_anonymous_access_allowed();

        if let Some(ctx) = self.bound(session) {
            AccessPolicy::enforce(ctx.is_anonymous(), allowed, false)?;
            return Ok(Some(ctx));
        }

        if !allow_anonymous {
            return Ok(None);
        }

        AccessPolicy::enforce(true, allowed, false)?;
        let ctx = self.config.anonymous_context(controls)?;
        tracing::trace!(session_id = %session, "built implicit anonymous context");
        Ok(Some(Arc::new(ctx)))
    }

    /// Context for root-DSE discovery. Skips the anonymous-access check.
    pub fn get_root_context(
        &self,
        session: &SessionId,
        controls: &[Control],
    ) -> Result<Arc<SecurityContext>, RegistryError> {
        if let Some(ctx) = self.bound(session) {
            return Ok(ctx);
        }
        Ok(Arc::new(self.config.anonymous_context(controls)?))
    }

    /// Install or replace the bound context. Returns the one it replaced.
    ///
    /// Operations already dispatched keep the `Arc` they were handed.
    pub fn set_context(
        &self,
        session: &SessionId,
        context: Arc<SecurityContext>,
    ) -> Option<Arc<SecurityContext>> {
        self.contexts.insert(session.clone(), context)
    }

    /// Drop the mapping. Outstanding requests are left alone.
    pub fn remove_context(&self, session: &SessionId) -> Option<Arc<SecurityContext>> {
        self.contexts.remove(session).map(|(_, ctx)| ctx)
    }

    pub fn anonymous_access_allowed(&self) -> bool {
        self.settings.is_anonymous_access_allowed()
    }

    pub fn is_bound(&self, session: &SessionId) -> bool {
        self.contexts.contains_key(session)
    }

    /// Weakly consistent snapshot of sessions holding a bound context.
    pub fn list_sessions(&self) -> Vec<SessionId> {
        self.contexts.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
