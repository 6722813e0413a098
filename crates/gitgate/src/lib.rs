//! Embeddable git smart HTTP gateway.
//!
//! This crate bridges HTTP requests following git's smart HTTP convention
//! (`info/refs?service=…`, `git-upload-pack`, `git-receive-pack`) to a git
//! subprocess, so standard git clients can clone from and push to
//! repositories served by any axum application. Repository lookup, auth
//! policy and push acceptance are delegated to traits supplied by the
//! embedding application.

mod advertise;
mod auth;
mod error;
mod gateway;
mod parse;
mod process;
mod push;
mod rpc;
mod sideband;
mod types;

pub use error::GatewayError;
pub use gateway::{GatewayBuilder, GitGateway, DEFAULT_PUSH_TIMEOUT};
pub use parse::{parse_request, GitRequest, RequestKind, RouteMatch};
pub use push::{parse_push_payload, PushEvent, PushPayload, RefType, RequestInfo};
pub use sideband::Messenger;
pub use types::{
    AuthCredentials, AuthMode, Authorizer, BoxError, PackType, PushHook, RepositoryResolution,
    RepositoryResolver,
};

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
