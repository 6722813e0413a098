//! Core protocol types and the collaborator traits embedders implement.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::push::PushEvent;
use crate::sideband::Messenger;

/// Boxed error type returned by resolver and authorizer implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The two git pack services the smart HTTP protocol exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackType {
    /// `git-upload-pack`, serving fetches and clones.
    Upload,
    /// `git-receive-pack`, serving pushes.
    Receive,
}

impl PackType {
    /// Maps a service name (`git-upload-pack`, `upload-pack`, ...) to a pack
    /// type. The `git-` prefix is stripped case-insensitively; the remainder
    /// must match a known service exactly.
    pub fn from_service(service: &str) -> Option<Self> {
        let name = match service.get(..4) {
            Some(prefix) if prefix.eq_ignore_ascii_case("git-") => &service[4..],
            _ => service,
        };
        match name {
            "upload-pack" => Some(PackType::Upload),
            "receive-pack" => Some(PackType::Receive),
            _ => None,
        }
    }

    /// The git subcommand implementing this service.
    pub fn subcommand(self) -> &'static str {
        match self {
            PackType::Upload => "upload-pack",
            PackType::Receive => "receive-pack",
        }
    }

    /// Content type for `info/refs` advertisement responses.
    pub fn advertisement_content_type(self) -> &'static str {
        match self {
            PackType::Upload => "application/x-git-upload-pack-advertisement",
            PackType::Receive => "application/x-git-receive-pack-advertisement",
        }
    }

    /// Content type for stateless-rpc result responses.
    pub fn result_content_type(self) -> &'static str {
        match self {
            PackType::Upload => "application/x-git-upload-pack-result",
            PackType::Receive => "application/x-git-receive-pack-result",
        }
    }

    /// The pkt-line preamble announcing the service in an advertisement,
    /// followed by a flush packet. The length prefixes are fixed because the
    /// announced text has a fixed length.
    pub(crate) fn advertisement_preamble(self) -> &'static [u8] {
        match self {
            PackType::Upload => b"001e# service=git-upload-pack\n0000",
            PackType::Receive => b"001f# service=git-receive-pack\n0000",
        }
    }
}

/// When a repository demands credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Every request must authenticate.
    Always,
    /// No request authenticates; Authorization headers are ignored.
    Never,
    /// Only pushes (receive-pack) must authenticate.
    PushOnly,
}

impl AuthMode {
    /// Whether a request for the given pack type must carry credentials.
    pub fn requires_auth(self, pack_type: PackType) -> bool {
        match self {
            AuthMode::Always => true,
            AuthMode::Never => false,
            AuthMode::PushOnly => pack_type == PackType::Receive,
        }
    }
}

/// Username and password decoded from a Basic Authorization header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCredentials {
    pub username: String,
    pub password: String,
}

/// What the resolver reports about a repository slug.
#[derive(Debug, Clone)]
pub struct RepositoryResolution {
    /// Authentication policy for this repository.
    pub auth_mode: AuthMode,
    /// Directory the git subcommands run in. Usually a bare repository.
    pub repo_dir: PathBuf,
}

/// Maps a repository slug (`org/repo`) to a directory on disk and an auth
/// policy. An error fails the request with an internal error; "repository
/// unknown" is an error here too, there is no softer not-found signal.
#[async_trait]
pub trait RepositoryResolver: Send + Sync {
    async fn resolve(&self, repo_slug: &str) -> Result<RepositoryResolution, BoxError>;
}

/// Checks credentials for a repository slug. `Ok(false)` rejects the
/// credentials (403); an error fails the request as internal (500).
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, repo_slug: &str, credentials: &AuthCredentials)
        -> Result<bool, BoxError>;
}

/// Observes pushes and may veto them.
///
/// Invoked at most once per receive-pack request, after the subprocess has
/// produced its first output. The messenger's `accept`/`deny` settle the
/// push; returning without calling either accepts it. Only consulted when
/// side-band messages are enabled on the gateway.
#[async_trait]
pub trait PushHook: Send + Sync {
    async fn on_push(&self, event: PushEvent, messenger: Messenger);
}
