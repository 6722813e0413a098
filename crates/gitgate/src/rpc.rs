//! Stateless-rpc relay for `POST git-upload-pack` / `git-receive-pack`.
//!
//! The request body is pumped into the subprocess stdin while stdout is
//! streamed back out, with one deliberate stall: the first stdout chunk is
//! held until we know the response status. By the time git produces output
//! it has validated the push syntactically, so that is also the moment the
//! push hook runs. If it denies, nothing of git's output has reached the
//! client yet and the response can still be a clean client error.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::BytesMut;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::process::{drain_stderr, reap, stderr_excerpt, GitRunner, STATELESS_RPC_FLAG};
use crate::push::{negotiate, parse_push_payload, PushEvent, PushOutcome, RequestInfo, ResolveGuard};
use crate::sideband::Messenger;
use crate::types::{PackType, PushHook};

/// Leading request-body bytes kept for push payload parsing: enough for the
/// command list and the head of the pack. The rest flows through uncaptured.
const PAYLOAD_CAPTURE_LIMIT: usize = 64 * 1024;

/// Request-scoped inputs to the relay.
pub(crate) struct RpcContext {
    pub pack_type: PackType,
    pub repo_slug: String,
    pub repo_dir: PathBuf,
    pub username: Option<String>,
    pub request: RequestInfo,
}

/// Runs one pack exchange. `hook` is the push hook to consult, already
/// gated on side-band messages being enabled; it is only invoked for
/// receive-pack requests.
pub(crate) async fn stateless_rpc(
    runner: &GitRunner,
    hook: Option<Arc<dyn PushHook>>,
    push_timeout: Duration,
    context: RpcContext,
    body: Body,
) -> Result<Response, GatewayError> {
    let subcommand = context.pack_type.subcommand();
    let mut git = runner.spawn(&[subcommand, STATELESS_RPC_FLAG], &context.repo_dir)?;

    let hook = hook.filter(|_| context.pack_type == PackType::Receive);
    let capture = hook.as_ref().map(|_| Arc::new(Mutex::new(BytesMut::new())));
    tokio::spawn(pump_body(body, git.stdin, capture.clone()));

    let mut first = BytesMut::with_capacity(8 * 1024);
    let read = git.stdout.read_buf(&mut first).await?;
    if read == 0 {
        let status = git.child.wait().await?;
        let detail = stderr_excerpt(git.stderr).await;
        if status.success() && detail.is_empty() {
            // Exchanges like a fetch negotiation with nothing wanted end
            // with no output at all; that is still a success.
            return Ok(result_response(context.pack_type, Body::empty()));
        }
        return Err(GatewayError::GitFailed {
            subcommand,
            detail: if detail.is_empty() {
                status.to_string()
            } else {
                detail
            },
        });
    }

    if let (Some(hook), Some(capture)) = (hook, capture) {
        let payload = {
            let captured = capture.lock();
            parse_push_payload(&captured)
        };
        let event = PushEvent {
            pack_type: context.pack_type,
            repo_slug: context.repo_slug.clone(),
            repo_dir: context.repo_dir.clone(),
            username: context.username,
            request: context.request,
            payload,
        };
        let (guard, receiver) = ResolveGuard::channel();
        let messenger = Messenger::new(guard);
        debug!(repo_slug = %context.repo_slug, "consulting push hook");

        match negotiate(hook, event, &messenger, receiver, push_timeout).await {
            PushOutcome::Denied { reason } => {
                // The client gets the reason; don't wait for a natural exit.
                if let Err(error) = git.child.start_kill() {
                    warn!(%error, "failed to kill denied receive-pack");
                }
                drain_stderr(git.stderr, "receive-pack");
                reap(git.child, "receive-pack");
                return Err(GatewayError::PushDenied(reason));
            }
            PushOutcome::Accepted => {
                drain_stderr(git.stderr, "receive-pack");
                let (frames, ended) = messenger.take_frames();
                if ended {
                    // The hook closed the band; the push still completes,
                    // but the remaining subprocess output is discarded.
                    reap(git.child, "receive-pack");
                    let mut stdout = git.stdout;
                    tokio::spawn(async move {
                        let _ = tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await;
                    });
                    let head = stream::iter(frames.into_iter().map(Ok::<_, io::Error>));
                    return Ok(result_response(context.pack_type, Body::from_stream(head)));
                }
                reap(git.child, "receive-pack");
                let head = stream::iter(
                    frames
                        .into_iter()
                        .chain([first.freeze()])
                        .map(Ok::<_, io::Error>),
                );
                let body = Body::from_stream(head.chain(ReaderStream::new(git.stdout)));
                return Ok(result_response(context.pack_type, body));
            }
        }
    }

    drain_stderr(git.stderr, subcommand);
    reap(git.child, subcommand);
    let head = stream::iter([Ok::<_, io::Error>(first.freeze())]);
    let body = Body::from_stream(head.chain(ReaderStream::new(git.stdout)));
    Ok(result_response(context.pack_type, body))
}

fn result_response(pack_type: PackType, body: Body) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, pack_type.result_content_type())],
        body,
    )
        .into_response()
}

/// Relays the request body into the subprocess stdin, capturing the leading
/// bytes when a push payload will be parsed. Stdin is shut down only after
/// the body is fully consumed, so git sees EOF exactly once the client is
/// done sending.
async fn pump_body(body: Body, mut stdin: ChildStdin, capture: Option<Arc<Mutex<BytesMut>>>) {
    let mut stream = body.into_data_stream();
    while let Some(next) = stream.next().await {
        let chunk = match next {
            Ok(chunk) => chunk,
            Err(error) => {
                debug!(%error, "request body ended early");
                return;
            }
        };
        if let Some(capture) = &capture {
            let mut captured = capture.lock();
            if captured.len() < PAYLOAD_CAPTURE_LIMIT {
                let take = (PAYLOAD_CAPTURE_LIMIT - captured.len()).min(chunk.len());
                captured.extend_from_slice(&chunk[..take]);
            }
        }
        if let Err(error) = stdin.write_all(&chunk).await {
            // Expected when a push is denied and the subprocess is killed.
            debug!(%error, "git stdin closed before body was consumed");
            return;
        }
    }
    let _ = stdin.shutdown().await;
}
