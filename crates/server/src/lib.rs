//! An OAuth2-style authorization gateway.
//!
//! Users sign in through a browser session; registered clients receive a
//! one-time authorization code which they exchange for HS256 access and
//! refresh tokens signed with their own secret.

pub mod api;
pub mod config;
pub mod entity;
pub mod error;
pub mod oauth2;
