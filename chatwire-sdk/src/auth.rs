//! Injection seam for the session layer.
//!
//! The SDK never reads token storage itself. Whatever owns the session
//! (admin vs. chat tokens, refresh, logout) resolves one bearer token and
//! hands it over through [`AuthSource`].

/// Supplies the bearer token for each (re)connect and hears about expiry.
pub trait AuthSource: Send + Sync {
    /// Token to attach to the next connection attempt, if any.
    fn token(&self) -> Option<String>;

    /// The server rejected the token. The connection manager stops
    /// reconnecting after calling this; the session layer decides what next.
    fn on_auth_expired(&self) {}
}

/// A fixed token (or none) with no expiry handling.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl AuthSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

impl<F> AuthSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}
