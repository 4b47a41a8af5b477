//! Session core for the parley chat client.
//!
//! Acquires, persists, and refreshes the access/refresh token pair, and sends
//! application requests through a client that keeps the session valid.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use parley_core::{AuthApi, AuthenticatedClient, Config, SessionManager};
//!
//! let config = Config::load()?;
//! let session = SessionManager::new(AuthApi::new(&config)?, config.open_credential_store()?);
//! if !session.is_authenticated() {
//!     session.login("a@b.com", "secret").await?;
//! }
//! let client = AuthenticatedClient::new(session, &config);
//! let conversations = client.list_conversations(&Default::default()).await?;
//! # let _ = conversations;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiError, AuthApi, AuthEndpoints, AuthError, AuthenticatedClient, Transport};
pub use auth::{
    ClearReason, CredentialPair, CredentialStore, FileCredentialStore, KeyringCredentialStore,
    MemoryCredentialStore, SessionManager, SessionState,
};
pub use config::{Config, CredentialBackend};
