//! Per-connection read loop.
//!
//! Every accepted connection opens a registry session, reads one request per
//! line and closes the session on the way out, whatever ended the loop.

use std::sync::Arc;
use std::time::Duration;

use dirsess_core::{ContextFactory, Control, Credentials, RequestId, SessionId};
use dirsess_registry::{Registry, RegistryError, RequestHandle};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use crate::executor::{ExecOutcome, OperationExecutor};
use crate::protocol::{parse_request, Operation, RequestEnvelope, Response, Status};

const SEND_QUEUE: usize = 256;
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything a connection needs, shared across all of them.
pub struct Services {
    pub registry: Arc<Registry>,
    pub executor: Arc<dyn OperationExecutor>,
    /// Builds contexts for explicit binds.
    pub factory: Arc<dyn ContextFactory>,
    pub max_outstanding: usize,
    pub max_line_bytes: usize,
}

/// Serve one connection until EOF, unbind, a read error, or the session's
/// close signal.
pub async fn handle_connection<S>(stream: S, session: SessionId, services: Arc<Services>)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let close = services.registry.open_session(&session);
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(services.max_line_bytes));
    let (mut sink, mut lines) = framed.split::<String>();
    let (tx, mut rx) = mpsc::channel::<String>(SEND_QUEUE);

    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if sink.send(line).await.is_err() {
                break;
            }
        }
    });

    loop {
        let next = tokio::select! {
            _ = close.cancelled() => {
                tracing::debug!(session_id = %session, "close signalled");
                break;
            }
            next = lines.next() => next,
        };

        let line = match next {
            None => break,
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                send(&tx, Response::error(RequestId(0), "request line too long")).await;
                continue;
            }
            Some(Err(LinesCodecError::Io(e))) => {
                tracing::debug!(session_id = %session, error = %e, "read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = match parse_request(&line) {
            Ok(request) => request,
            Err(e) => {
                send(&tx, Response::error(RequestId(0), format!("malformed request: {e}"))).await;
                continue;
            }
        };
        if !dispatch(&services, &session, request, &tx).await {
            break;
        }
    }

    let cancelled = services.registry.close_session(&session);
    drop(tx);
    let abort = writer.abort_handle();
    if tokio::time::timeout(FLUSH_TIMEOUT, writer).await.is_err() {
        abort.abort();
    }
    tracing::debug!(session_id = %session, cancelled, "connection finished");
}

/// Returns `false` when the connection should stop reading.
async fn dispatch(
    services: &Arc<Services>,
    session: &SessionId,
    request: RequestEnvelope,
    tx: &mpsc::Sender<String>,
) -> bool {
    let RequestEnvelope { id, op, controls } = request;
    tracing::trace!(session_id = %session, request_id = %id, op = op.name(), "request");

    match op {
        Operation::Unbind => {
            tracing::debug!(session_id = %session, "unbind");
            false
        }
        Operation::Abandon { target } => {
            services.registry.abandon(session, target);
            true
        }
        _ if services.registry.lookup(session, id).is_some() => {
            send(tx, Response::error(id, format!("request {id} already outstanding"))).await;
            true
        }
        Operation::Bind { dn, password } => {
            let credentials = if dn.trim().is_empty() {
                Credentials::Anonymous
            } else {
                Credentials::simple(dn, password)
            };
            send(tx, bind(services, session, id, &credentials, &controls)).await;
            true
        }
        op => {
            if let Err(response) = spawn_operation(services, session, id, op, controls, tx) {
                send(tx, response).await;
            }
            true
        }
    }
}

fn bind(
    services: &Services,
    session: &SessionId,
    id: RequestId,
    credentials: &Credentials,
    controls: &[Control],
) -> Response {
    let registry = &services.registry;
    let handle = RequestHandle::builder(id, "bind").cancellable(false).build();
    if let Err(e) = registry.register(session, id, handle) {
        return failure(id, &e);
    }

    let result = registry
        .authorize_bind(session, credentials.is_anonymous())
        .and_then(|()| {
            services
                .factory
                .create(controls, credentials)
                .map_err(RegistryError::from)
        });
    registry.complete(session, id);

    match result {
        Ok(context) => {
            let identity = context.identity.name().to_string();
            registry.set_context(session, Arc::new(context));
            Response::success(id).identity(identity)
        }
        Err(e) => {
            tracing::debug!(session_id = %session, error = %e, kind = e.error_kind(), "bind failed");
            failure(id, &e)
        }
    }
}

/// Register the request and run it on its own task. On refusal the
/// response to send back is returned instead.
fn spawn_operation(
    services: &Arc<Services>,
    session: &SessionId,
    id: RequestId,
    op: Operation,
    controls: Vec<Control>,
    tx: &mpsc::Sender<String>,
) -> Result<(), Response> {
    let registry = &services.registry;
    if registry.outstanding(session) >= services.max_outstanding {
        return Err(Response::busy(id));
    }

    let context = if op.is_root_dse() {
        registry.get_root_context(session, &controls).map(Some)
    } else {
        registry.get_context(session, &controls, true)
    };
    let context = match context {
        Ok(Some(context)) => context,
        Ok(None) => return Err(Response::denied(id, "bind required")),
        Err(e) => return Err(failure(id, &e)),
    };

    let token = CancellationToken::new();
    let handle = RequestHandle::builder(id, op.name())
        .token(token.clone())
        .context(Arc::clone(&context))
        .build();
    registry
        .register(session, id, handle.clone())
        .map_err(|e| failure(id, &e))?;

    let services = Arc::clone(services);
    let session = session.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let outcome = services.executor.execute(&op, &context, token).await;
        let elapsed_ms = handle.age().as_millis() as u64;
        if services.registry.complete(&session, id).is_none() {
            tracing::debug!(session_id = %session, request_id = %id, elapsed_ms, "response suppressed");
            return;
        }
        tracing::trace!(session_id = %session, request_id = %id, elapsed_ms, "operation finished");
        let response = match outcome {
            ExecOutcome::Entries(entries) => Response::success(id).entries(entries),
            ExecOutcome::Identity(name) => Response::success(id).identity(name),
            ExecOutcome::Cancelled => Response::with_status(id, Status::Cancelled, "operation cancelled"),
            ExecOutcome::Failed(message) => Response::error(id, message),
        };
        send(&tx, response).await;
    });
    Ok(())
}

fn failure(id: RequestId, err: &RegistryError) -> Response {
    match err {
        RegistryError::AccessDenied(message) => Response::denied(id, message.clone()),
        other => Response::error(id, other.to_string()),
    }
}

async fn send(tx: &mpsc::Sender<String>, response: Response) {
    if tx.send(response.to_line()).await.is_err() {
        tracing::trace!(request_id = %response.id, "writer gone, response dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dirsess_core::{DirectoryContextFactory, SecurityContext};
    use dirsess_registry::{AnonymousAccessFlag, RegistryConfig};
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    /// Searches below the root block until cancelled; everything else answers
    /// straight away.
    struct PendingExecutor;

    #[async_trait]
    impl OperationExecutor for PendingExecutor {
        async fn execute(
            &self,
            op: &Operation,
            context: &SecurityContext,
            cancel: CancellationToken,
        ) -> ExecOutcome {
            match op {
                Operation::Search { .. } if !op.is_root_dse() => {
                    cancel.cancelled().await;
                    ExecOutcome::Cancelled
                }
                Operation::Whoami => ExecOutcome::Identity(context.identity.name().to_string()),
                _ => ExecOutcome::Entries(vec![serde_json::json!({"dn": ""})]),
            }
        }
    }

    type Client = Framed<DuplexStream, LinesCodec>;

    fn services(allow_anonymous: bool, max_outstanding: usize) -> Arc<Services> {
        let flag = Arc::new(AnonymousAccessFlag::new(allow_anonymous));
        Arc::new(Services {
            registry: Arc::new(Registry::new(RegistryConfig::default(), flag)),
            executor: Arc::new(PendingExecutor),
            factory: Arc::new(DirectoryContextFactory::default()),
            max_outstanding,
            max_line_bytes: 4096,
        })
    }

    fn connect(services: &Arc<Services>, name: &str) -> (Client, SessionId, JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let session = SessionId::from_raw(name);
        let task = tokio::spawn(handle_connection(server, session.clone(), Arc::clone(services)));
        (Framed::new(client, LinesCodec::new()), session, task)
    }

    async fn request(client: &mut Client, line: &str) {
        client.send(line.to_string()).await.unwrap();
    }

    async fn response(client: &mut Client) -> Response {
        let line = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn wait_for_outstanding(services: &Services, session: &SessionId, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while services.registry.outstanding(session) != n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn bind_then_whoami() {
        let svc = services(true, 8);
        let (mut client, _, _task) = connect(&svc, "c1");

        request(&mut client, r#"{"id":1,"op":"bind","dn":"uid=admin,ou=system","password":"secret"}"#).await;
        let resp = response(&mut client).await;
        assert_eq!(resp.status, Status::Success);
        assert_eq!(resp.identity.as_deref(), Some("uid=admin,ou=system"));

        request(&mut client, r#"{"id":2,"op":"whoami"}"#).await;
        let resp = response(&mut client).await;
        assert_eq!(resp.id, RequestId(2));
        assert_eq!(resp.identity.as_deref(), Some("uid=admin,ou=system"));
    }

    #[tokio::test]
    async fn bind_without_password_fails() {
        let svc = services(true, 8);
        let (mut client, session, _task) = connect(&svc, "c1");
        request(&mut client, r#"{"id":1,"op":"bind","dn":"uid=admin,ou=system"}"#).await;
        assert_eq!(response(&mut client).await.status, Status::Error);
        assert!(svc.registry.session_ids().is_empty());
        assert_eq!(svc.registry.outstanding(&session), 0);
    }

    #[tokio::test]
    async fn anonymous_disabled_still_allows_root_dse() {
        let svc = services(false, 8);
        let (mut client, _, _task) = connect(&svc, "c1");

        request(&mut client, r#"{"id":1,"op":"search","base":"ou=system"}"#).await;
        let resp = response(&mut client).await;
        assert_eq!(resp.status, Status::Denied);
        assert_eq!(resp.message.as_deref(), Some("anonymous binds disabled"));

        request(&mut client, r#"{"id":2,"op":"search","base":""}"#).await;
        let resp = response(&mut client).await;
        assert_eq!(resp.status, Status::Success);
        assert_eq!(resp.entries.map(|e| e.len()), Some(1));

        request(&mut client, r#"{"id":3,"op":"bind","dn":""}"#).await;
        assert_eq!(response(&mut client).await.status, Status::Denied);
    }

    #[tokio::test]
    async fn abandoned_request_gets_no_response() {
        let svc = services(true, 8);
        let (mut client, session, _task) = connect(&svc, "c1");

        request(&mut client, r#"{"id":1,"op":"search","base":"ou=system"}"#).await;
        wait_for_outstanding(&svc, &session, 1).await;
        request(&mut client, r#"{"id":2,"op":"abandon","target":1}"#).await;
        request(&mut client, r#"{"id":3,"op":"whoami"}"#).await;

        let resp = response(&mut client).await;
        assert_eq!(resp.id, RequestId(3));
        assert_eq!(svc.registry.outstanding(&session), 0);
        assert_eq!(svc.registry.stats().abandoned, 1);
    }

    #[tokio::test]
    async fn busy_when_too_many_outstanding() {
        let svc = services(true, 1);
        let (mut client, session, _task) = connect(&svc, "c1");

        request(&mut client, r#"{"id":1,"op":"search","base":"ou=a"}"#).await;
        wait_for_outstanding(&svc, &session, 1).await;
        request(&mut client, r#"{"id":2,"op":"search","base":"ou=b"}"#).await;
        let resp = response(&mut client).await;
        assert_eq!(resp.id, RequestId(2));
        assert_eq!(resp.status, Status::Busy);
    }

    #[tokio::test]
    async fn duplicate_id_rejected() {
        let svc = services(true, 8);
        let (mut client, session, _task) = connect(&svc, "c1");

        request(&mut client, r#"{"id":1,"op":"search","base":"ou=a"}"#).await;
        wait_for_outstanding(&svc, &session, 1).await;
        request(&mut client, r#"{"id":1,"op":"whoami"}"#).await;
        let resp = response(&mut client).await;
        assert_eq!(resp.status, Status::Error);
        assert_eq!(svc.registry.outstanding(&session), 1);
    }

    #[tokio::test]
    async fn disconnect_purges_outstanding() {
        let svc = services(true, 8);
        let (mut client, session, task) = connect(&svc, "c1");

        request(&mut client, r#"{"id":1,"op":"bind","dn":"cn=a","password":"x"}"#).await;
        response(&mut client).await;
        request(&mut client, r#"{"id":7,"op":"search","base":"ou=a"}"#).await;
        wait_for_outstanding(&svc, &session, 1).await;

        drop(client);
        task.await.unwrap();

        assert_eq!(svc.registry.outstanding(&session), 0);
        assert!(svc.registry.list_sessions().is_empty());
        assert!(svc.registry.session_ids().is_empty());
        assert_eq!(svc.registry.stats().purged, 1);
    }

    #[tokio::test]
    async fn unbind_closes_session() {
        let svc = services(true, 8);
        let (mut client, session, task) = connect(&svc, "c1");
        request(&mut client, r#"{"id":1,"op":"search","base":"ou=a"}"#).await;
        wait_for_outstanding(&svc, &session, 1).await;
        request(&mut client, r#"{"id":2,"op":"unbind"}"#).await;
        task.await.unwrap();
        assert_eq!(svc.registry.outstanding(&session), 0);
        assert!(client.next().await.is_none());
    }

    #[tokio::test]
    async fn terminate_session_stops_connection() {
        let svc = services(true, 8);
        let (_client, session, task) = connect(&svc, "c1");
        tokio::time::timeout(Duration::from_secs(5), async {
            while svc.registry.list_sessions().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(svc.registry.terminate_session(&session));
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn malformed_line_reports_error_and_continues() {
        let svc = services(true, 8);
        let (mut client, _, _task) = connect(&svc, "c1");
        request(&mut client, "not json").await;
        let resp = response(&mut client).await;
        assert_eq!(resp.id, RequestId(0));
        assert_eq!(resp.status, Status::Error);

        request(&mut client, r#"{"id":5,"op":"whoami"}"#).await;
        assert_eq!(response(&mut client).await.id, RequestId(5));
    }
}
