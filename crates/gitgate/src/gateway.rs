//! Gateway assembly: configuration, shared state and the axum router.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::advertise::advertise_refs;
use crate::auth::authorize_request;
use crate::error::GatewayError;
use crate::parse::{parse_request, RequestKind, RouteMatch};
use crate::process::GitRunner;
use crate::push::RequestInfo;
use crate::rpc::{stateless_rpc, RpcContext};
use crate::types::{Authorizer, PushHook, RepositoryResolver};

/// Push hooks that have not settled within this window are treated as
/// denials.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state behind the router.
pub(crate) struct GatewayState {
    git: GitRunner,
    side_band_messages: bool,
    push_timeout: Duration,
    resolver: Arc<dyn RepositoryResolver>,
    authorizer: Arc<dyn Authorizer>,
    push_hook: Option<Arc<dyn PushHook>>,
}

/// An embeddable git smart HTTP gateway.
///
/// The gateway owns no socket; [`GitGateway::router`] produces an
/// [`axum::Router`] that the embedding application mounts wherever it
/// likes. Repository lookup and credential checks are delegated to the
/// [`RepositoryResolver`] and [`Authorizer`] it was built with.
#[derive(Clone)]
pub struct GitGateway {
    state: Arc<GatewayState>,
}

impl GitGateway {
    /// Starts a builder from the two required collaborators.
    pub fn builder(
        resolver: impl RepositoryResolver + 'static,
        authorizer: impl Authorizer + 'static,
    ) -> GatewayBuilder {
        GatewayBuilder {
            git_executable: PathBuf::from("git"),
            side_band_messages: true,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
            resolver: Arc::new(resolver),
            authorizer: Arc::new(authorizer),
            push_hook: None,
        }
    }

    /// Builds a router serving the smart HTTP endpoints under
    /// `/{org}/{repo}.git/`.
    pub fn router(&self) -> Router {
        // Route parameters must span whole path segments, so the `.git`
        // suffix cannot live in the pattern; the path parser enforces it
        // and 404s everything else.
        Router::new()
            .route("/{org}/{repo}/{*rest}", any(handle_git))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }
}

/// Configures a [`GitGateway`].
pub struct GatewayBuilder {
    git_executable: PathBuf,
    side_band_messages: bool,
    push_timeout: Duration,
    resolver: Arc<dyn RepositoryResolver>,
    authorizer: Arc<dyn Authorizer>,
    push_hook: Option<Arc<dyn PushHook>>,
}

impl GatewayBuilder {
    /// Overrides the git executable; the default is a bare `git` resolved
    /// through `PATH`.
    pub fn with_git_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.git_executable = path.into();
        self
    }

    /// Enables or disables side-band messages. When disabled the push hook
    /// is never consulted and pack responses are relayed untouched.
    pub fn with_side_band_messages(mut self, enabled: bool) -> Self {
        self.side_band_messages = enabled;
        self
    }

    /// Overrides the push negotiation timeout.
    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    /// Registers a hook consulted before each push is allowed to complete.
    pub fn with_push_hook(mut self, hook: impl PushHook + 'static) -> Self {
        self.push_hook = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> GitGateway {
        GitGateway {
            state: Arc::new(GatewayState {
                git: GitRunner::new(self.git_executable),
                side_band_messages: self.side_band_messages,
                push_timeout: self.push_timeout,
                resolver: self.resolver,
                authorizer: self.authorizer,
                push_hook: self.push_hook,
            }),
        }
    }
}

#[derive(Deserialize)]
struct ServiceQuery {
    service: Option<String>,
}

async fn handle_git(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<ServiceQuery>,
    request: Request,
) -> Response {
    match serve_git(&state, query.service.as_deref(), request).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    }
}

async fn serve_git(
    state: &GatewayState,
    service: Option<&str>,
    request: Request,
) -> Result<Response, GatewayError> {
    let method = request.method().clone();
    let git_request = match parse_request(&method, request.uri().path(), service) {
        RouteMatch::Git(git_request) => git_request,
        RouteMatch::Unmatched => {
            // Not a git path after all; leave it to the embedding app.
            return Ok(StatusCode::NOT_FOUND.into_response());
        }
        RouteMatch::Unsupported => return Err(GatewayError::UnsupportedRequest),
    };

    let slug = git_request.slug();
    debug!(repo_slug = %slug, kind = ?git_request.kind, "handling git request");

    let resolution = state
        .resolver
        .resolve(&slug)
        .await
        .map_err(GatewayError::Resolver)?;

    let username = authorize_request(
        state.authorizer.as_ref(),
        &slug,
        resolution.auth_mode,
        git_request.pack_type,
        request.headers(),
    )
    .await?;

    match git_request.kind {
        RequestKind::InfoRefs => {
            advertise_refs(&state.git, git_request.pack_type, &resolution.repo_dir).await
        }
        RequestKind::UploadPack | RequestKind::ReceivePack => {
            let info = RequestInfo {
                method,
                uri: request.uri().clone(),
                headers: request.headers().clone(),
            };
            let context = RpcContext {
                pack_type: git_request.pack_type,
                repo_slug: slug,
                repo_dir: resolution.repo_dir,
                username,
                request: info,
            };
            let hook = state.push_hook.clone().filter(|_| state.side_band_messages);
            stateless_rpc(
                &state.git,
                hook,
                state.push_timeout,
                context,
                request.into_body(),
            )
            .await
        }
    }
}
