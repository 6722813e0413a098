//! Push payload parsing and the accept/deny negotiation protocol.
//!
//! A receive-pack body opens with pkt-line commands shaped like
//! `<old-oid> <new-oid> refs/heads/<name>\0<capabilities>` followed by the
//! raw pack stream. The relay captures the leading bytes, this module turns
//! them into a [`PushPayload`], and [`negotiate`] runs the hook that gets to
//! accept or deny the push before any of git's output reaches the client.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method, Uri};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::warn;

use crate::sideband::Messenger;
use crate::types::{PackType, PushHook};

/// Ref namespace a push targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefType {
    /// A branch under `refs/heads/`.
    Head,
    /// A tag under `refs/tags/`.
    Tag,
}

/// Snapshot of the inbound HTTP request, attached to push events so hooks
/// can inspect method, URI and headers without holding the request itself.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

/// The first ref-update command of a push, plus whatever pack bytes were
/// captured alongside it.
#[derive(Debug, Clone)]
pub struct PushPayload {
    /// Object id the ref currently points at (all zeros for a creation).
    pub old_id: String,
    /// Object id the ref will point at (all zeros for a deletion).
    pub new_id: String,
    pub ref_type: RefType,
    /// Name without the `refs/heads/` / `refs/tags/` prefix.
    pub ref_name: String,
    /// Capabilities the client asked for on the first command.
    pub capabilities: Vec<String>,
    /// Leading bytes of the pack stream. Empty for deletions; truncated when
    /// the pack exceeds the capture window.
    pub pack_data: Bytes,
}

/// Everything a push hook learns about a push.
#[derive(Debug, Clone)]
pub struct PushEvent {
    pub pack_type: PackType,
    /// `org/repo` slug the client addressed.
    pub repo_slug: String,
    /// Repository directory the subprocess runs in.
    pub repo_dir: PathBuf,
    /// Authenticated username, when the auth gate saw credentials.
    pub username: Option<String>,
    pub request: RequestInfo,
    /// Parsed first command, when the captured body matched the receive-pack
    /// grammar. A hook must tolerate `None`.
    pub payload: Option<PushPayload>,
}

/// Parses the leading captured bytes of a receive-pack body.
///
/// Returns `None` whenever the first pkt-line is not a complete, well-formed
/// ref-update command targeting `refs/heads/` or `refs/tags/`.
pub fn parse_push_payload(body: &[u8]) -> Option<PushPayload> {
    let prefix = std::str::from_utf8(body.get(..4)?).ok()?;
    let length = usize::from_str_radix(prefix, 16).ok()?;
    if length < 4 || length > body.len() {
        return None;
    }
    let mut line = &body[4..length];
    if let [rest @ .., b'\n'] = line {
        line = rest;
    }

    let nul = line.iter().position(|&byte| byte == 0)?;
    let command = std::str::from_utf8(&line[..nul]).ok()?;
    let capabilities = String::from_utf8_lossy(&line[nul + 1..])
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let mut fields = command.splitn(3, ' ');
    let old_id = fields.next()?;
    let new_id = fields.next()?;
    let full_ref = fields.next()?;
    if !is_object_id(old_id) || !is_object_id(new_id) {
        return None;
    }
    let (ref_type, ref_name) = if let Some(name) = full_ref.strip_prefix("refs/heads/") {
        (RefType::Head, name)
    } else if let Some(name) = full_ref.strip_prefix("refs/tags/") {
        (RefType::Tag, name)
    } else {
        return None;
    };
    if ref_name.is_empty() {
        return None;
    }

    Some(PushPayload {
        old_id: old_id.to_string(),
        new_id: new_id.to_string(),
        ref_type,
        ref_name: ref_name.to_string(),
        capabilities,
        pack_data: find_pack(&body[length..]),
    })
}

fn is_object_id(id: &str) -> bool {
    id.len() == 40 && id.bytes().all(|byte| byte.is_ascii_hexdigit())
}

fn find_pack(rest: &[u8]) -> Bytes {
    match rest.windows(4).position(|window| window == b"PACK") {
        Some(position) => Bytes::copy_from_slice(&rest[position..]),
        None => Bytes::new(),
    }
}

/// How a push settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    Accepted,
    Denied { reason: String },
}

/// Single-resolution slot behind the messenger's accept/deny. The first
/// resolver wins; everyone else finds the slot empty.
#[derive(Clone)]
pub(crate) struct ResolveGuard {
    slot: Arc<Mutex<Option<oneshot::Sender<PushOutcome>>>>,
}

impl ResolveGuard {
    pub fn channel() -> (Self, oneshot::Receiver<PushOutcome>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(sender))),
            },
            receiver,
        )
    }

    /// Settles the push. Returns false if it had already settled.
    pub fn resolve(&self, outcome: PushOutcome) -> bool {
        match self.slot.lock().take() {
            Some(sender) => {
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// Runs the push hook and waits for the push to settle.
///
/// The hook runs on its own task so a stalled hook cannot stall the relay
/// past the timeout. Resolution is first-writer-wins between the hook's
/// accept/deny, auto-accept when the hook returns unsettled, and auto-deny
/// when the timeout fires; a hook that settles early may keep running after
/// this returns.
pub(crate) async fn negotiate(
    hook: Arc<dyn PushHook>,
    event: PushEvent,
    messenger: &Messenger,
    mut receiver: oneshot::Receiver<PushOutcome>,
    timeout: Duration,
) -> PushOutcome {
    let guard = messenger.guard();
    let hook_messenger = messenger.clone();
    let mut hook_task = tokio::spawn(async move { hook.on_push(event, hook_messenger).await });

    tokio::select! {
        outcome = &mut receiver => settled(outcome),
        joined = &mut hook_task => {
            match joined {
                // Hook finished without settling the push: accept.
                Ok(()) => guard.resolve(PushOutcome::Accepted),
                Err(error) => {
                    warn!(%error, "push hook task failed");
                    guard.resolve(PushOutcome::Denied {
                        reason: "push hook failed.".to_string(),
                    })
                }
            };
            settled(receiver.await)
        }
        _ = tokio::time::sleep(timeout) => {
            guard.resolve(PushOutcome::Denied {
                reason: format!(
                    "on_push did not respond within the allowed {} seconds.",
                    timeout.as_secs_f32()
                ),
            });
            settled(receiver.await)
        }
    }
}

fn settled(outcome: Result<PushOutcome, oneshot::error::RecvError>) -> PushOutcome {
    // The sender lives in the guard we hold, so this only fires if a resolve
    // raced us; treat it as a deny rather than panicking.
    outcome.unwrap_or_else(|_| PushOutcome::Denied {
        reason: "push negotiation failed.".to_string(),
    })
}
