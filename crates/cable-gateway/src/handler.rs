//! Connection authentication for the gateway.

use async_trait::async_trait;
use cable_core::errors::reject_unauthorized_connection;
use cable_core::{GlobalId, Identifiers, Result};
use cable_server::{Connection, ConnectionHandler};
use tracing::info;

/// Identifies each connection as `current_user` from its `?user=` query
/// parameter. Connections without one are refused unless anonymous access
/// is allowed, in which case they carry no identity.
pub struct QueryUserHandler {
    allow_anonymous: bool,
}

impl QueryUserHandler {
    /// Create a handler.
    pub fn new(allow_anonymous: bool) -> Self {
        Self { allow_anonymous }
    }

    fn identify(&self, user: Option<&str>) -> Result<Identifiers> {
        match user.filter(|u| !u.is_empty()) {
            Some(user) => Ok(Identifiers::new().with("current_user", GlobalId::new("User", user))),
            None if self.allow_anonymous => Ok(Identifiers::new()),
            None => reject_unauthorized_connection(),
        }
    }
}

#[async_trait]
impl ConnectionHandler for QueryUserHandler {
    fn identified_by(&self) -> &[&'static str] {
        &["current_user"]
    }

    async fn connect(&self, connection: &Connection) -> Result<Identifiers> {
        self.identify(connection.request().query_param("user"))
    }

    async fn disconnect(&self, connection: &Connection) -> Result<()> {
        info!(identity = %connection.identity(), "user left");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use cable_core::CableError;

    #[test]
    fn user_param_becomes_global_id() {
        let ids = QueryUserHandler::new(false).identify(Some("42")).unwrap();
        assert_eq!(ids.identity(), "User#42");
    }

    #[test]
    fn missing_user_is_unauthorized() {
        let result = QueryUserHandler::new(false).identify(None);
        assert_matches!(result, Err(CableError::Unauthorized));
        let result = QueryUserHandler::new(false).identify(Some(""));
        assert_matches!(result, Err(CableError::Unauthorized));
    }

    #[test]
    fn anonymous_allowed() {
        let ids = QueryUserHandler::new(true).identify(None).unwrap();
        assert!(ids.is_empty());
    }
}
