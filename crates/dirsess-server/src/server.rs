use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dirsess_core::{ContextFactory, DirectoryContextFactory, SessionId};
use dirsess_registry::{ContextSource, Registry};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::connection::{handle_connection, Services};
use crate::executor::OperationExecutor;
use crate::settings::{ServerSettings, SettingsError};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Bind the listener and start accepting connections. Returns a handle to
/// shut it down.
pub async fn start(
    settings: &ServerSettings,
    registry: Arc<Registry>,
    executor: Arc<dyn OperationExecutor>,
) -> Result<ServerHandle, ServerError> {
    settings.validate()?;

    // Binds go through the installed factory when there is one.
    let factory: Arc<dyn ContextFactory> = match &registry.config().context_source {
        ContextSource::CustomFactory(factory) => Arc::clone(factory),
        ContextSource::DefaultAnonymous => {
            Arc::new(DirectoryContextFactory::new(settings.provider_url.clone()))
        }
    };
    let services = Arc::new(Services {
        registry: Arc::clone(&registry),
        executor,
        factory,
        max_outstanding: settings.max_outstanding_per_session,
        max_line_bytes: settings.max_line_bytes,
    });

    let listener = TcpListener::bind(settings.bind_addr()).await?;
    let local_addr = listener.local_addr()?;
    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();

    tracing::info!(addr = %local_addr, "directory session server started");

    let accept = tokio::spawn(accept_loop(
        listener,
        services,
        shutdown.clone(),
        tracker.clone(),
    ));

    Ok(ServerHandle {
        local_addr,
        registry,
        shutdown,
        tracker,
        accept,
    })
}

async fn accept_loop(
    listener: TcpListener,
    services: Arc<Services>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(error = %e, "set_nodelay failed");
                }
                let session = SessionId::new();
                tracing::info!(session_id = %session, peer = %peer, "connection accepted");
                tracker.spawn(handle_connection(stream, session, Arc::clone(&services)));
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
    tracing::debug!("accept loop stopped");
}

/// Handle returned by [`start`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    accept: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Stop accepting, terminate every session and wait for the connection
    /// tasks to finish. Returns the number of sessions terminated.
    pub async fn shutdown(self) -> usize {
        self.shutdown.cancel();
        if let Err(e) = self.accept.await {
            tracing::warn!(error = %e, "accept task failed");
        }
        let closed = self.registry.shutdown();
        self.tracker.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!("connections still running after shutdown");
        }
        tracing::info!(closed, "directory session server stopped");
        closed
    }
}
