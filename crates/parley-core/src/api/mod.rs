//! REST API client module for the chat service.
//!
//! This module provides:
//! - `AuthApi`: Raw calls to the login, register, refresh, and profile endpoints
//! - `AuthenticatedClient`: Request interceptor that attaches the bearer token
//!   and transparently refreshes it on 401
//! - Conversation endpoints built on the authenticated client
//!
//! The API uses bearer access tokens obtained from the `/token` endpoint and
//! renewed through `/refresh`.

pub mod auth;
pub mod conversations;
pub mod error;
pub mod interceptor;

pub use auth::{AuthApi, AuthEndpoints};
pub use error::{ApiError, AuthError};
pub use interceptor::{AuthenticatedClient, Transport};
