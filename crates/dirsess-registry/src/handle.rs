//! Bookkeeping for one in-flight operation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dirsess_core::{RequestId, SecurityContext};
use tokio_util::sync::CancellationToken;

use crate::error::CancelError;

/// Callback run when a request is abandoned or its session is purged.
pub type CancelFn = Arc<dyn Fn(RequestId) -> Result<(), CancelError> + Send + Sync>;

struct HandleInner {
    request_id: RequestId,
    operation: String,
    cancellable: bool,
    token: CancellationToken,
    on_cancel: Option<CancelFn>,
    fired: AtomicBool,
    context: Option<Arc<SecurityContext>>,
    dispatched_at: Instant,
}

/// Handle for an outstanding request. Clones share the same state, so the
/// cancellation callback runs at most once no matter which clone fires it.
#[derive(Clone)]
pub struct RequestHandle {
    inner: Arc<HandleInner>,
}

/// Builder for [`RequestHandle`].
pub struct RequestHandleBuilder {
    request_id: RequestId,
    operation: String,
    cancellable: bool,
    token: Option<CancellationToken>,
    on_cancel: Option<CancelFn>,
    context: Option<Arc<SecurityContext>>,
}

impl RequestHandleBuilder {
    /// Bind, unbind and abandon itself cannot be abandoned by the client.
    pub fn cancellable(mut self, cancellable: bool) -> Self {
        self.cancellable = cancellable;
        self
    }

    pub fn token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn on_cancel<F>(mut self, f: F) -> Self
    where
        F: Fn(RequestId) -> Result<(), CancelError> + Send + Sync + 'static,
    {
        self.on_cancel = Some(Arc::new(f));
        self
    }

    /// The context the operation was dispatched under.
    pub fn context(mut self, context: Arc<SecurityContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn build(self) -> RequestHandle {
        RequestHandle {
            inner: Arc::new(HandleInner {
                request_id: self.request_id,
                operation: self.operation,
                cancellable: self.cancellable,
                token: self.token.unwrap_or_default(),
                on_cancel: self.on_cancel,
                fired: AtomicBool::new(false),
                context: self.context,
                dispatched_at: Instant::now(),
            }),
        }
    }
}

impl RequestHandle {
    pub fn builder(request_id: impl Into<RequestId>, operation: impl Into<String>) -> RequestHandleBuilder {
        RequestHandleBuilder {
            request_id: request_id.into(),
            operation: operation.into(),
            cancellable: true,
            token: None,
            on_cancel: None,
            context: None,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.inner.request_id
    }

    pub fn operation(&self) -> &str {
        &self.inner.operation
    }

    pub fn is_cancellable(&self) -> bool {
        self.inner.cancellable
    }

    pub fn context(&self) -> Option<&Arc<SecurityContext>> {
        self.inner.context.as_ref()
    }

    /// Token the running operation should select on.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    pub fn age(&self) -> Duration {
        self.inner.dispatched_at.elapsed()
    }

    pub fn same_as(&self, other: &RequestHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Fire cancellation. Returns `Ok(false)` if it had already fired.
    ///
    /// The token is cancelled before the callback runs, and a panicking
    /// callback is reported as [`CancelError::Panicked`].
    pub fn cancel(&self) -> Result<bool, CancelError> {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        self.inner.token.cancel();

        let Some(callback) = self.inner.on_cancel.as_ref() else {
            return Ok(true);
        };
        let id = self.inner.request_id;
        match catch_unwind(AssertUnwindSafe(|| callback(id))) {
            Ok(result) => result.map(|()| true),
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(CancelError::Panicked(msg))
            }
        }
    }
}

impl PartialEq for RequestHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("request_id", &self.inner.request_id)
            .field("operation", &self.inner.operation)
            .field("cancellable", &self.inner.cancellable)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
