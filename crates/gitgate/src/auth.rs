//! Basic-auth gate in front of the pack services.

use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::debug;

use crate::error::GatewayError;
use crate::types::{AuthCredentials, AuthMode, Authorizer, PackType};

/// Challenge sent with every 401, exactly as git clients expect it.
pub(crate) const BASIC_CHALLENGE: &str = "Basic realm=\"Git\", charset=\"UTF-8\"";

/// Applies the auth policy to a request and, when credentials are required,
/// validates them against the embedder's [`Authorizer`].
///
/// Returns the authenticated username, or `None` when the policy did not ask
/// for credentials (any Authorization header is ignored in that case).
pub(crate) async fn authorize_request(
    authorizer: &dyn Authorizer,
    repo_slug: &str,
    auth_mode: AuthMode,
    pack_type: PackType,
    headers: &HeaderMap,
) -> Result<Option<String>, GatewayError> {
    if !auth_mode.requires_auth(pack_type) {
        return Ok(None);
    }

    let header = match headers.get(header::AUTHORIZATION) {
        Some(value) => value
            .to_str()
            .map_err(|_| GatewayError::MalformedCredentials)?,
        None => return Err(GatewayError::CredentialsRequired),
    };
    let credentials = decode_basic(header).ok_or(GatewayError::MalformedCredentials)?;

    let accepted = authorizer
        .authorize(repo_slug, &credentials)
        .await
        .map_err(GatewayError::Authorizer)?;
    if !accepted {
        debug!(%repo_slug, username = %credentials.username, "authorizer refused credentials");
        return Err(GatewayError::CredentialsRejected);
    }
    Ok(Some(credentials.username))
}

/// Decodes a `Basic <base64>` Authorization header value. The scheme prefix
/// is matched case-insensitively; the payload must decode to UTF-8 and
/// contain a `:`. The password keeps any further colons.
fn decode_basic(header: &str) -> Option<AuthCredentials> {
    let encoded = match header.get(..6) {
        Some(prefix) if prefix.eq_ignore_ascii_case("basic ") => header[6..].trim(),
        _ => return None,
    };
    let decoded = STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (username, password) = text.split_once(':')?;
    Some(AuthCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::types::BoxError;

    struct Accepting;

    #[async_trait]
    impl Authorizer for Accepting {
        async fn authorize(
            &self,
            _repo_slug: &str,
            _credentials: &AuthCredentials,
        ) -> Result<bool, BoxError> {
            Ok(true)
        }
    }

    struct Rejecting;

    #[async_trait]
    impl Authorizer for Rejecting {
        async fn authorize(
            &self,
            _repo_slug: &str,
            _credentials: &AuthCredentials,
        ) -> Result<bool, BoxError> {
            Ok(false)
        }
    }

    struct Failing;

    #[async_trait]
    impl Authorizer for Failing {
        async fn authorize(
            &self,
            _repo_slug: &str,
            _credentials: &AuthCredentials,
        ) -> Result<bool, BoxError> {
            Err("authorizer backend offline".into())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl Authorizer for Unreachable {
        async fn authorize(
            &self,
            _repo_slug: &str,
            _credentials: &AuthCredentials,
        ) -> Result<bool, BoxError> {
            panic!("authorizer must not be consulted");
        }
    }

    fn with_authorization(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, value.parse().unwrap());
        headers
    }

    // "user:pass" in base64.
    const USER_PASS: &str = "Basic dXNlcjpwYXNz";

    #[tokio::test]
    async fn test_auth_not_required_skips_authorizer() {
        let headers = with_authorization(USER_PASS);
        let result = authorize_request(
            &Unreachable,
            "acme/widgets",
            AuthMode::Never,
            PackType::Receive,
            &headers,
        )
        .await
        .unwrap();
        assert_eq!(result, None);

        let result = authorize_request(
            &Unreachable,
            "acme/widgets",
            AuthMode::PushOnly,
            PackType::Upload,
            &HeaderMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_missing_header_requires_credentials() {
        let result = authorize_request(
            &Accepting,
            "acme/widgets",
            AuthMode::Always,
            PackType::Upload,
            &HeaderMap::new(),
        )
        .await;
        assert!(matches!(result, Err(GatewayError::CredentialsRequired)));
    }

    #[tokio::test]
    async fn test_malformed_headers() {
        for value in [
            "Bearer sometoken",
            "Basic",
            "Basic %%%not-base64%%%",
            // "user" without a colon.
            "Basic dXNlcg==",
        ] {
            let headers = with_authorization(value);
            let result = authorize_request(
                &Accepting,
                "acme/widgets",
                AuthMode::Always,
                PackType::Upload,
                &headers,
            )
            .await;
            assert!(
                matches!(result, Err(GatewayError::MalformedCredentials)),
                "{value}"
            );
        }
    }

    #[tokio::test]
    async fn test_accepted_credentials_return_username() {
        let headers = with_authorization(USER_PASS);
        let result = authorize_request(
            &Accepting,
            "acme/widgets",
            AuthMode::Always,
            PackType::Upload,
            &headers,
        )
        .await
        .unwrap();
        assert_eq!(result.as_deref(), Some("user"));
    }

    #[tokio::test]
    async fn test_scheme_prefix_is_case_insensitive() {
        let headers = with_authorization("bAsIc dXNlcjpwYXNz");
        let result = authorize_request(
            &Accepting,
            "acme/widgets",
            AuthMode::PushOnly,
            PackType::Receive,
            &headers,
        )
        .await
        .unwrap();
        assert_eq!(result.as_deref(), Some("user"));
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let headers = with_authorization(USER_PASS);
        let result = authorize_request(
            &Rejecting,
            "acme/widgets",
            AuthMode::Always,
            PackType::Upload,
            &headers,
        )
        .await;
        assert!(matches!(result, Err(GatewayError::CredentialsRejected)));
    }

    #[tokio::test]
    async fn test_authorizer_failure() {
        let headers = with_authorization(USER_PASS);
        let result = authorize_request(
            &Failing,
            "acme/widgets",
            AuthMode::Always,
            PackType::Upload,
            &headers,
        )
        .await;
        assert!(matches!(result, Err(GatewayError::Authorizer(_))));
    }

    #[test]
    fn test_decode_basic_splits_on_first_colon() {
        // "svc:se:cr:et"
        let credentials = decode_basic("Basic c3ZjOnNlOmNyOmV0").unwrap();
        assert_eq!(credentials.username, "svc");
        assert_eq!(credentials.password, "se:cr:et");

        // "user:" with an empty password is legal.
        let credentials = decode_basic("Basic dXNlcjo=").unwrap();
        assert_eq!(credentials.username, "user");
        assert_eq!(credentials.password, "");
    }
}
