//! Directory backend seam.

use std::time::Duration;

use async_trait::async_trait;
use dirsess_core::SecurityContext;
use tokio_util::sync::CancellationToken;

use crate::protocol::Operation;

/// How a dispatched operation ended.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecOutcome {
    Entries(Vec<serde_json::Value>),
    Identity(String),
    Cancelled,
    Failed(String),
}

/// Executes directory operations on behalf of a security context.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(
        &self,
        op: &Operation,
        context: &SecurityContext,
        cancel: CancellationToken,
    ) -> ExecOutcome;
}

/// Backend stand-in that answers after a fixed delay, or stops early when
/// the operation is abandoned.
#[derive(Clone, Debug, Default)]
pub struct DelayedExecutor {
    delay: Duration,
}

impl DelayedExecutor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    fn answer(op: &Operation, context: &SecurityContext) -> ExecOutcome {
        match op {
            Operation::Search { .. } if op.is_root_dse() => ExecOutcome::Entries(vec![serde_json::json!({
                "dn": "",
                "namingContexts": [context.provider_url],
                "supportedControl": ["1.2.840.113556.1.4.319", "2.16.840.1.113730.3.4.2"],
                "supportedLDAPVersion": ["3"],
            })]),
            Operation::Search { base, filter } => ExecOutcome::Entries(vec![serde_json::json!({
                "dn": base,
                "filter": filter.as_deref().unwrap_or("(objectClass=*)"),
                "readBy": context.identity.name(),
            })]),
            Operation::Whoami => ExecOutcome::Identity(context.identity.name().to_string()),
            other => ExecOutcome::Failed(format!("{} is not executed by the backend", other.name())),
        }
    }
}

#[async_trait]
impl OperationExecutor for DelayedExecutor {
    async fn execute(
        &self,
        op: &Operation,
        context: &SecurityContext,
        cancel: CancellationToken,
    ) -> ExecOutcome {
        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return ExecOutcome::Cancelled,
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return ExecOutcome::Cancelled;
        }
        Self::answer(op, context)
    }
}
