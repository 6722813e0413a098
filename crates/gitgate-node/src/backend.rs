//! Disk-backed collaborators wired into the gateway.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use gitgate::{
    AuthCredentials, AuthMode, Authorizer, BoxError, Messenger, PushEvent, PushHook,
    RepositoryResolution, RepositoryResolver,
};
use tracing::info;

/// Resolves `org/repo` slugs to bare repositories laid out as
/// `<root>/<org>/<repo>.git`.
pub struct DiskResolver {
    root: PathBuf,
    auth_mode: AuthMode,
}

impl DiskResolver {
    pub fn new(root: impl Into<PathBuf>, auth_mode: AuthMode) -> Self {
        Self {
            root: root.into(),
            auth_mode,
        }
    }
}

#[async_trait]
impl RepositoryResolver for DiskResolver {
    async fn resolve(&self, repo_slug: &str) -> Result<RepositoryResolution, BoxError> {
        let (org, repo) = repo_slug
            .split_once('/')
            .ok_or_else(|| BoxError::from(format!("malformed repository slug: {repo_slug}")))?;
        if !valid_name(org) || !valid_name(repo) {
            return Err(format!("invalid repository slug: {repo_slug}").into());
        }
        let repo_dir = self.root.join(org).join(format!("{repo}.git"));
        let is_dir = tokio::fs::metadata(&repo_dir)
            .await
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(format!("no such repository: {repo_slug}").into());
        }
        Ok(RepositoryResolution {
            auth_mode: self.auth_mode,
            repo_dir,
        })
    }
}

/// A leading dot is rejected so a slug can never climb out of the root.
fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Checks credentials against the static user table from the config file.
pub struct StaticAuthorizer {
    users: HashMap<String, String>,
}

impl StaticAuthorizer {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authorize(
        &self,
        _repo_slug: &str,
        credentials: &AuthCredentials,
    ) -> Result<bool, BoxError> {
        Ok(self
            .users
            .get(&credentials.username)
            .is_some_and(|password| *password == credentials.password))
    }
}

/// Acknowledges each push over the side band and records it in the log.
pub struct LoggingPushHook;

#[async_trait]
impl PushHook for LoggingPushHook {
    async fn on_push(&self, event: PushEvent, messenger: Messenger) {
        match &event.payload {
            Some(payload) => {
                info!(
                    repo_slug = %event.repo_slug,
                    ref_name = %payload.ref_name,
                    old_id = %payload.old_id,
                    new_id = %payload.new_id,
                    username = event.username.as_deref().unwrap_or("-"),
                    "push received"
                );
                messenger.write(&format!(
                    "gitgate: updating {} ({:.8}..{:.8})",
                    payload.ref_name, payload.old_id, payload.new_id
                ));
            }
            None => info!(repo_slug = %event.repo_slug, "push received"),
        }
        messenger.accept();
    }
}
