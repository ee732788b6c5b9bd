//! Session → outstanding requests, and the abandon protocol.
//!
//! Each session owns an inner map behind its own mutex. Handles are always
//! removed from the map under that mutex before their callback runs, so
//! whichever of `complete`, `abandon` or `purge_session` removes a handle
//! owns it and the others see nothing.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dirsess_core::{RequestId, SessionId};
use parking_lot::Mutex;

use crate::error::RegistryError;
use crate::handle::RequestHandle;

/// Result of a client-initiated abandon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbandonOutcome {
    Abandoned,
    /// Already completed, or never existed.
    NotFound,
    /// The target operation cannot be abandoned and was left running.
    NotCancellable,
}

#[derive(Default)]
struct RequestMap {
    closing: bool,
    handles: HashMap<RequestId, RequestHandle>,
}

#[derive(Default)]
struct SessionRequests {
    state: Mutex<RequestMap>,
}

/// Concurrent map from session to its in-flight requests.
#[derive(Default)]
pub struct RequestTable {
    sessions: DashMap<SessionId, Arc<SessionRequests>>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, session: &SessionId) -> Option<Arc<SessionRequests>> {
        self.sessions.get(session).map(|s| Arc::clone(s.value()))
    }

    /// Add a handle, creating the session's map on first use.
    ///
    /// An id that is already outstanding is overwritten. Fails only when the
    /// session is being purged concurrently.
    pub fn register(
        &self,
        session: &SessionId,
        request_id: RequestId,
        handle: RequestHandle,
    ) -> Result<(), RegistryError> {
        let slot = Arc::clone(self.sessions.entry(session.clone()).or_default().value());
        let mut map = slot.state.lock();
        if map.closing {
            return Err(RegistryError::SessionClosing(session.clone()));
        }
        if map.handles.insert(request_id, handle).is_some() {
            tracing::debug!(session_id = %session, request_id = %request_id, "replaced outstanding request");
        }
        Ok(())
    }

    /// Remove a finished request. A second call returns `None`.
    pub fn complete(&self, session: &SessionId, request_id: RequestId) -> Option<RequestHandle> {
        let slot = self.slot(session)?;
        let mut map = slot.state.lock();
        map.handles.remove(&request_id)
    }

    pub fn lookup(&self, session: &SessionId, request_id: RequestId) -> Option<RequestHandle> {
        let slot = self.slot(session)?;
        let map = slot.state.lock();
        map.handles.get(&request_id).cloned()
    }

    /// Copy of the session's outstanding requests for iteration outside the lock.
    pub fn snapshot(&self, session: &SessionId) -> HashMap<RequestId, RequestHandle> {
        match self.slot(session) {
            Some(slot) => slot.state.lock().handles.clone(),
            None => HashMap::new(),
        }
    }

    pub fn outstanding(&self, session: &SessionId) -> usize {
        self.slot(session)
            .map(|slot| slot.state.lock().handles.len())
            .unwrap_or(0)
    }

    /// Cancel one outstanding request.
    ///
    /// Missing ids are a silent no-op. Callback failures are logged, not
    /// returned; the handle is gone either way.
    pub fn abandon(&self, session: &SessionId, request_id: RequestId) -> AbandonOutcome {
        let Some(slot) = self.slot(session) else {
            return AbandonOutcome::NotFound;
        };

        let handle = {
            let mut map = slot.state.lock();
            let cancellable = match map.handles.get(&request_id) {
                None => return AbandonOutcome::NotFound,
                Some(h) => h.is_cancellable(),
            };
            if !cancellable {
                return AbandonOutcome::NotCancellable;
            }
            map.handles.remove(&request_id)
        };

        let Some(handle) = handle else {
            return AbandonOutcome::NotFound;
        };
        if let Err(e) = handle.cancel() {
            tracing::warn!(session_id = %session, request_id = %request_id, error = %e, "abandon callback failed");
        }
        AbandonOutcome::Abandoned
    }

    /// Close the session's map and cancel every handle in it.
    ///
    /// The map stays in the table, marked closing, until every callback has
    /// run, so registrations arriving meanwhile are refused. Once it returns
    /// the id starts over as a fresh session. A purge already in progress
    /// for the same session makes this a no-op. Returns how many handles
    /// were cancelled.
    pub fn purge_session(&self, session: &SessionId) -> usize {
        let Some(slot) = self.slot(session) else {
            return 0;
        };

        let handles = {
            let mut map = slot.state.lock();
            if map.closing {
                return 0;
            }
            map.closing = true;
            std::mem::take(&mut map.handles)
        };

        let mut cancelled = 0;
        for (request_id, handle) in handles {
            match handle.cancel() {
                Ok(true) => cancelled += 1,
                Ok(false) => {}
                Err(e) => {
                    cancelled += 1;
                    tracing::warn!(
                        session_id = %session,
                        request_id = %request_id,
                        error = %e,
                        "cancellation callback failed during purge"
                    );
                }
            }
        }

        self.sessions.remove_if(session, |_, current| Arc::ptr_eq(current, &slot));
        cancelled
    }

    /// Sessions that currently own a request map.
    pub fn sessions(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }
}
