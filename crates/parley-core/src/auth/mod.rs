//! Authentication module for managing the user session and its credentials.
//!
//! This module provides:
//! - `CredentialPair`: An access/refresh token pair, never partially present
//! - `SessionManager`: Login, registration, coordinated refresh, and profile
//! - `CredentialStore`: Durable persistence for the pair (file, keyring, memory)
//!
//! At most one refresh exchange is in flight per session; every caller that
//! needs fresh credentials while it runs awaits the same outcome.

pub mod credentials;
pub mod session;
pub mod tokens;

pub use credentials::{
    CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore,
    CREDENTIALS_KEY,
};
pub use session::{ClearReason, SessionManager, SessionState};
pub use tokens::CredentialPair;
