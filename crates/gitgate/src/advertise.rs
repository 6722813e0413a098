//! Ref advertisement for `GET info/refs`.

use std::io;
use std::path::Path;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::GatewayError;
use crate::process::{
    drain_stderr, reap, stderr_excerpt, GitRunner, ADVERTISE_REFS_FLAG, STATELESS_RPC_FLAG,
};
use crate::types::PackType;

/// Spawns `<service> --stateless-rpc --advertise-refs` and streams the
/// advertisement: the fixed service preamble and flush packet first, then
/// subprocess stdout verbatim until it closes.
///
/// The first stdout chunk is awaited before committing to a 200 so a
/// subprocess that dies without output (missing repository, bad executable
/// setup) still surfaces as an internal error instead of an empty success.
pub(crate) async fn advertise_refs(
    runner: &GitRunner,
    pack_type: PackType,
    repo_dir: &Path,
) -> Result<Response, GatewayError> {
    let mut git = runner.spawn(
        &[
            pack_type.subcommand(),
            STATELESS_RPC_FLAG,
            ADVERTISE_REFS_FLAG,
        ],
        repo_dir,
    )?;
    // The advertisement takes no input.
    drop(git.stdin);

    let mut first = BytesMut::with_capacity(8 * 1024);
    let read = git.stdout.read_buf(&mut first).await?;
    if read == 0 {
        let status = git.child.wait().await?;
        let detail = stderr_excerpt(git.stderr).await;
        return Err(GatewayError::GitFailed {
            subcommand: pack_type.subcommand(),
            detail: if detail.is_empty() {
                status.to_string()
            } else {
                detail
            },
        });
    }

    drain_stderr(git.stderr, "advertise-refs");
    reap(git.child, "advertise-refs");

    debug!(service = pack_type.subcommand(), "streaming ref advertisement");
    let head = stream::iter([
        Ok::<_, io::Error>(Bytes::from_static(pack_type.advertisement_preamble())),
        Ok(first.freeze()),
    ]);
    let body = Body::from_stream(head.chain(ReaderStream::new(git.stdout)));
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, pack_type.advertisement_content_type()),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}
