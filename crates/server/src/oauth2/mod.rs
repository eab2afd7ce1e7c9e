//! Authorization server core.
//!
//! ## Flow
//!
//! 1. The user signs in at `/login`, which starts a server-side session.
//! 2. `GET /oauth/authorize` issues a one-time code bound to an access and
//!    refresh token signed with the client's secret.
//! 3. `POST /oauth/token` redeems the code once, or mints a new access token
//!    from a refresh token.

pub mod code;
pub mod directory;
pub mod endpoints;
pub mod jwt;
pub mod login;
pub mod manager;
pub mod password;
pub mod session;
mod state;
pub mod store;

pub use directory::{DbDirectory, Directory};
pub use endpoints::router;
pub use manager::AuthorizationManager;
pub use password::{hash_password, verify_password};
pub use state::OAuth2State;
pub use store::{DatabaseStore, KvStore, MemoryStore};

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";
