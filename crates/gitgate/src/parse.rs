//! Classification of incoming HTTP requests into git operations.
//!
//! Pure string matching, no I/O. The gateway installs a single wildcard
//! route and funnels every path through [`parse_request`], so the exact
//! accept/reject rules (the `.git` suffix included) live here and are
//! directly testable.

use axum::http::Method;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::PackType;

const GIT_INFO_REFS: &str = "info/refs";
const GIT_UPLOAD_PACK: &str = "git-upload-pack";
const GIT_RECEIVE_PACK: &str = "git-receive-pack";

static GIT_PATH_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/([0-9A-Za-z._-]+)/([0-9A-Za-z._-]+)\.git/(.+)$").expect("Invalid regex")
});

/// The three operations a git smart HTTP client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Ref advertisement: `GET <repo>.git/info/refs`.
    InfoRefs,
    /// Fetch negotiation and pack download: `POST <repo>.git/git-upload-pack`.
    UploadPack,
    /// Push: `POST <repo>.git/git-receive-pack`.
    ReceivePack,
}

/// A fully classified git request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRequest {
    pub org: String,
    pub repo: String,
    pub kind: RequestKind,
    /// Pack service to spawn. The `service` query parameter wins over the
    /// path segment, so this can disagree with `kind` when a client asks for
    /// one service on the other's endpoint.
    pub pack_type: PackType,
}

impl GitRequest {
    /// Case-sensitive `org/repo` slug handed to resolver and authorizer.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }
}

/// Outcome of classifying a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatch {
    /// A git operation the gateway serves.
    Git(GitRequest),
    /// The path is not shaped like a git endpoint; the caller should fall
    /// through to whatever else is mounted (normally a 404).
    Unmatched,
    /// The path is git-shaped but the operation is not served: no resolvable
    /// pack type, an unknown trailing segment, or the wrong method for it.
    Unsupported,
}

/// Classifies `method` + `path` (+ optional `service` query parameter).
///
/// `<rest>` (everything after `.git/`) is lower-cased before matching. Pack
/// type resolution prefers the `service` parameter and falls back to the
/// path segment, both via [`PackType::from_service`].
pub fn parse_request(method: &Method, path: &str, service: Option<&str>) -> RouteMatch {
    let captures = match GIT_PATH_REGEX.captures(path) {
        Some(captures) => captures,
        None => return RouteMatch::Unmatched,
    };
    let org = captures[1].to_string();
    let repo = captures[2].to_string();
    let request_type = captures[3].to_ascii_lowercase();

    let pack_type = service
        .and_then(PackType::from_service)
        .or_else(|| PackType::from_service(&request_type));
    let pack_type = match pack_type {
        Some(pack_type) => pack_type,
        None => return RouteMatch::Unsupported,
    };

    let kind = if method == Method::GET && request_type == GIT_INFO_REFS {
        RequestKind::InfoRefs
    } else if method == Method::POST && request_type == GIT_UPLOAD_PACK {
        RequestKind::UploadPack
    } else if method == Method::POST && request_type == GIT_RECEIVE_PACK {
        RequestKind::ReceivePack
    } else {
        return RouteMatch::Unsupported;
    };

    RouteMatch::Git(GitRequest {
        org,
        repo,
        kind,
        pack_type,
    })
}
