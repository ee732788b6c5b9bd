//! Public façade over the session and request tables.
//!
//! The protocol layer calls into this around every connect, dispatched
//! operation and disconnect. The context table, the request table and the
//! session records each have their own locks and no method holds two of
//! them at once.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dirsess_core::{Control, RequestId, SecurityContext, SessionId};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::handle::RequestHandle;
use crate::policy::{AccessPolicy, AccessSettings};
use crate::request_table::{AbandonOutcome, RequestTable};
use crate::session_table::SessionTable;
use crate::stats::{RegistryStats, StatsSnapshot};

struct SessionRecord {
    opened_at: DateTime<Utc>,
    close: CancellationToken,
}

/// Summary of one open session.
#[derive(Clone, Debug, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub opened_at: DateTime<Utc>,
    pub bound: bool,
    pub outstanding: usize,
}

/// Session & outstanding-request registry.
///
/// Built once at server start and shared as `Arc<Registry>`.
pub struct Registry {
    config: Arc<RegistryConfig>,
    contexts: SessionTable,
    requests: RequestTable,
    sessions: DashMap<SessionId, SessionRecord>,
    stats: RegistryStats,
}

impl Registry {
    pub fn new(config: RegistryConfig, settings: Arc<dyn AccessSettings>) -> Self {
        let config = Arc::new(config);
        Self {
            contexts: SessionTable::new(Arc::clone(&config), settings),
            config,
            requests: RequestTable::new(),
            sessions: DashMap::new(),
            stats: RegistryStats::default(),
        }
    }

    pub fn config(&self) -> Arc<RegistryConfig> {
        Arc::clone(&self.config)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // ── Connection lifecycle ────────────────────────────────────────────

    /// Record an accepted connection. The returned token fires when the
    /// server terminates the session.
    pub fn open_session(&self, session: &SessionId) -> CancellationToken {
        let close = CancellationToken::new();
        let previous = self.sessions.insert(
            session.clone(),
            SessionRecord {
                opened_at: Utc::now(),
                close: close.clone(),
            },
        );
        if previous.is_some() {
            tracing::warn!(session_id = %session, "session reopened while still registered");
        }
        self.stats.session_opened();
        tracing::debug!(session_id = %session, "session opened");
        close
    }

    /// Disconnect handling for one session.
    ///
    /// Purges the request map first, so nothing new lands once teardown has
    /// started, then drops the bound context and the session record.
    /// Returns the number of requests cancelled. Safe to call repeatedly.
    pub fn close_session(&self, session: &SessionId) -> usize {
        let cancelled = self.purge_session(session);
        let had_context = self.contexts.remove_context(session).is_some();
        if let Some((_, record)) = self.sessions.remove(session) {
            record.close.cancel();
            self.stats.session_closed();
            tracing::info!(
                session_id = %session,
                cancelled,
                bound = had_context,
                "session closed"
            );
        }
        cancelled
    }

    /// Server-initiated disconnect. Signals the connection to stop and
    /// tears down its state. Unknown sessions return `false`.
    pub fn terminate_session(&self, session: &SessionId) -> bool {
        let Some(close) = self.sessions.get(session).map(|r| r.close.clone()) else {
            return false;
        };
        close.cancel();
        tracing::info!(session_id = %session, "terminating session");
        self.close_session(session);
        true
    }

    /// Terminate every open session. Called at server stop.
    pub fn shutdown(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let closed = ids.iter().filter(|id| self.terminate_session(id)).count();
        // sessions that registered requests without ever being opened
        for id in self.requests.sessions() {
            self.close_session(&id);
        }
        tracing::info!(closed, "registry shut down");
        closed
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let records: Vec<(SessionId, DateTime<Utc>)> = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), e.value().opened_at))
            .collect();
        records
            .into_iter()
            .map(|(id, opened_at)| SessionInfo {
                bound: self.contexts.is_bound(&id),
                outstanding: self.requests.outstanding(&id),
                id,
                opened_at,
            })
            .collect()
    }

    /// Sessions currently holding a bound context.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.contexts.list_sessions()
    }

    // ── Security contexts ───────────────────────────────────────────────

    pub fn get_context(
        &self,
        session: &SessionId,
        controls: &[Control],
        allow_anonymous: bool,
    ) -> Result<Option<Arc<SecurityContext>>, RegistryError> {
        self.contexts
            .get_context(session, controls, allow_anonymous)
            .inspect_err(|e| self.note_denied(session, e))
    }

    pub fn get_root_context(
        &self,
        session: &SessionId,
        controls: &[Control],
    ) -> Result<Arc<SecurityContext>, RegistryError> {
        self.contexts.get_root_context(session, controls)
    }

    pub fn set_context(&self, session: &SessionId, context: Arc<SecurityContext>) {
        let identity = context.identity.name().to_string();
        if self.contexts.set_context(session, context).is_some() {
            tracing::debug!(session_id = %session, identity, "rebound session");
        } else {
            tracing::debug!(session_id = %session, identity, "bound session");
        }
    }

    pub fn remove_context(&self, session: &SessionId) -> Option<Arc<SecurityContext>> {
        self.contexts.remove_context(session)
    }

    /// Current value of the administrative anonymous-access switch.
    pub fn anonymous_access_allowed(&self) -> bool {
        self.contexts.anonymous_access_allowed()
    }

    /// Gate for an explicit bind. An anonymous bind is refused while
    /// anonymous access is disabled.
    pub fn authorize_bind(&self, session: &SessionId, anonymous: bool) -> Result<(), RegistryError> {
        AccessPolicy::enforce(anonymous, self.anonymous_access_allowed(), false)
            .map(|_| ())
            .inspect_err(|e| self.note_denied(session, e))
    }

    fn note_denied(&self, session: &SessionId, err: &RegistryError) {
        if matches!(err, RegistryError::AccessDenied(_)) {
            self.stats.denied();
            tracing::debug!(session_id = %session, "anonymous access denied");
        }
    }

    // ── Outstanding requests ────────────────────────────────────────────

    pub fn register(
        &self,
        session: &SessionId,
        request_id: RequestId,
        handle: RequestHandle,
    ) -> Result<(), RegistryError> {
        self.requests.register(session, request_id, handle)?;
        self.stats.registered();
        Ok(())
    }

    pub fn complete(&self, session: &SessionId, request_id: RequestId) -> Option<RequestHandle> {
        let handle = self.requests.complete(session, request_id)?;
        self.stats.completed();
        Some(handle)
    }

    pub fn lookup(&self, session: &SessionId, request_id: RequestId) -> Option<RequestHandle> {
        self.requests.lookup(session, request_id)
    }

    pub fn snapshot(&self, session: &SessionId) -> HashMap<RequestId, RequestHandle> {
        self.requests.snapshot(session)
    }

    pub fn outstanding(&self, session: &SessionId) -> usize {
        self.requests.outstanding(session)
    }

    pub fn abandon(&self, session: &SessionId, request_id: RequestId) -> AbandonOutcome {
        let outcome = self.requests.abandon(session, request_id);
        match outcome {
            AbandonOutcome::Abandoned => {
                self.stats.abandoned();
                tracing::debug!(session_id = %session, request_id = %request_id, "request abandoned");
            }
            AbandonOutcome::NotCancellable => {
                tracing::debug!(session_id = %session, request_id = %request_id, "abandon target not cancellable");
            }
            AbandonOutcome::NotFound => {}
        }
        outcome
    }

    pub fn purge_session(&self, session: &SessionId) -> usize {
        let cancelled = self.requests.purge_session(session);
        if cancelled > 0 {
            self.stats.purged(cancelled);
            tracing::debug!(session_id = %session, cancelled, "purged outstanding requests");
        }
        cancelled
    }
}
