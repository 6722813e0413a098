//! Gateway error types and their HTTP mappings.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error};

use crate::auth::BASIC_CHALLENGE;
use crate::types::BoxError;

/// Errors that can occur while serving a git HTTP request.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The path looked like a git endpoint but the operation is not one the
    /// gateway serves (unknown service, unknown trailing segment, or a
    /// method/segment mismatch).
    #[error("unsupported git request")]
    UnsupportedRequest,

    /// Credentials are required for this request but none were sent.
    #[error("authentication required")]
    CredentialsRequired,

    /// An Authorization header was sent but is not well-formed Basic auth.
    #[error("malformed authorization header")]
    MalformedCredentials,

    /// Credentials were presented and the authorizer rejected them.
    #[error("credentials rejected")]
    CredentialsRejected,

    /// The repository resolver failed.
    #[error("repository resolution failed: {0}")]
    Resolver(#[source] BoxError),

    /// The authorizer itself failed (as opposed to rejecting credentials).
    #[error("authorizer failed: {0}")]
    Authorizer(#[source] BoxError),

    /// A push was denied, either by the push hook or because negotiation
    /// timed out. The reason is relayed to the client.
    #[error("push denied: {0}")]
    PushDenied(String),

    /// The git subprocess could not be started.
    #[error("failed to spawn git: {0}")]
    Spawn(#[source] std::io::Error),

    /// The git subprocess exited without producing any output.
    #[error("git {subcommand} produced no output: {detail}")]
    GitFailed {
        subcommand: &'static str,
        detail: String,
    },

    /// I/O failure while talking to the git subprocess.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::UnsupportedRequest | GatewayError::MalformedCredentials => {
                debug!(error = %self, "rejecting git request");
                StatusCode::BAD_REQUEST.into_response()
            }
            GatewayError::CredentialsRequired => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, BASIC_CHALLENGE)],
            )
                .into_response(),
            GatewayError::CredentialsRejected => {
                debug!("rejecting git request: credentials refused");
                StatusCode::FORBIDDEN.into_response()
            }
            GatewayError::PushDenied(reason) => {
                debug!(%reason, "push denied");
                (StatusCode::BAD_REQUEST, reason).into_response()
            }
            GatewayError::Resolver(_)
            | GatewayError::Authorizer(_)
            | GatewayError::Spawn(_)
            | GatewayError::GitFailed { .. }
            | GatewayError::Io(_) => {
                // Detail stays in the log; the body carries nothing.
                error!(error = %self, "git request failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
