//! Shared state for the OAuth2 and login routers.

use crate::oauth2::manager::AuthorizationManager;
use std::sync::Arc;

#[derive(Clone)]
pub struct OAuth2State {
    pub manager: Arc<AuthorizationManager>,
    /// Mark the session cookie `Secure`
    pub secure_cookies: bool,
}

impl OAuth2State {
    pub fn new(manager: Arc<AuthorizationManager>, secure_cookies: bool) -> Self {
        Self {
            manager,
            secure_cookies,
        }
    }
}
