//! Pluggable peer authentication.
//!
//! The broker core never inspects credentials. Each authentication method is
//! an [`Authenticator`] registered under a name; the coordinator runs the
//! URL-side check at WebSocket upgrade, and comm-servers run the message-side
//! check on the first reliable-channel frame. Verification answers
//! accept/reject; errors mean the mechanism itself failed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use atoll_wire::Role;

/// Errors from the authentication machinery (not credential rejections).
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unknown authentication method {0:?}")]
    UnknownMethod(String),
    #[error("malformed credential payload: {0}")]
    MalformedCredentials(String),
}

/// An AUTH frame body as produced by an authenticator: the method name plus
/// the opaque credential bytes it wants on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthData {
    pub method: String,
    pub body: Bytes,
}

/// One authentication method.
///
/// `generate_*` run on the peer presenting credentials; `authenticate_*` run
/// on the side verifying them. `query` is the raw query string of the
/// registration request.
pub trait Authenticator: Send + Sync {
    fn generate_auth_url(&self, base_url: &str, role: Role) -> Result<String, AuthError>;
    fn generate_auth_message(&self, role: Role) -> Result<AuthData, AuthError>;
    fn authenticate_from_url(&self, role: Role, query: &str) -> Result<bool, AuthError>;
    fn authenticate_from_message(&self, role: Role, body: &[u8]) -> Result<bool, AuthError>;
}

/// Method-name → authenticator map. Populated at startup, then shared
/// read-only behind an `Arc`.
#[derive(Default, Clone)]
pub struct AuthRegistry {
    methods: HashMap<String, Arc<dyn Authenticator>>,
}

impl AuthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_or_update(&mut self, name: impl Into<String>, auth: Arc<dyn Authenticator>) {
        self.methods.insert(name.into(), auth);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Authenticator>> {
        self.methods.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Message-side verification by method name. Unknown method = rejection
    /// with an [`AuthError::UnknownMethod`] so callers can log the name.
    pub fn authenticate_message(
        &self,
        method: &str,
        role: Role,
        body: &[u8],
    ) -> Result<bool, AuthError> {
        let auth = self
            .get(method)
            .ok_or_else(|| AuthError::UnknownMethod(method.to_owned()))?;
        auth.authenticate_from_message(role, body)
    }

    /// URL-side verification by method name.
    pub fn authenticate_url(
        &self,
        method: &str,
        role: Role,
        query: &str,
    ) -> Result<bool, AuthError> {
        let auth = self
            .get(method)
            .ok_or_else(|| AuthError::UnknownMethod(method.to_owned()))?;
        auth.authenticate_from_url(role, query)
    }
}

impl fmt::Debug for AuthRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRegistry")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Accepts every credential. Used by the simulator and the test suites;
/// deployments register real methods instead.
#[derive(Debug, Clone)]
pub struct AllowAllAuthenticator {
    method: String,
}

impl AllowAllAuthenticator {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
        }
    }
}

impl Authenticator for AllowAllAuthenticator {
    fn generate_auth_url(&self, base_url: &str, _role: Role) -> Result<String, AuthError> {
        let sep = if base_url.contains('?') { '&' } else { '?' };
        Ok(format!("{base_url}{sep}method={}", self.method))
    }

    fn generate_auth_message(&self, _role: Role) -> Result<AuthData, AuthError> {
        Ok(AuthData {
            method: self.method.clone(),
            body: Bytes::new(),
        })
    }

    fn authenticate_from_url(&self, _role: Role, _query: &str) -> Result<bool, AuthError> {
        Ok(true)
    }

    fn authenticate_from_message(&self, _role: Role, _body: &[u8]) -> Result<bool, AuthError> {
        Ok(true)
    }
}
