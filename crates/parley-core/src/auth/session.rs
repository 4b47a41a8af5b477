use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::api::{AuthApi, AuthError};
use crate::models::{CreatedAccount, NewAccount, UserProfile};

use super::{CredentialPair, CredentialStore};

/// The one refresh exchange currently outstanding, shared by every waiter.
type RefreshFuture = Shared<BoxFuture<'static, Result<CredentialPair, AuthError>>>;

type SessionListener = Arc<dyn Fn(ClearReason) + Send + Sync>;

/// Why an established session was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    Logout,
    RefreshFailed,
}

/// Snapshot of the session as seen by collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated {
        credentials: CredentialPair,
        profile: Option<UserProfile>,
    },
}

#[derive(Default)]
struct SessionData {
    credentials: Option<CredentialPair>,
    profile: Option<UserProfile>,
}

struct Inner {
    api: AuthApi,
    store: Arc<dyn CredentialStore>,
    data: RwLock<SessionData>,
    /// Serializes store writes so the last one always reflects `data`.
    persist: Mutex<()>,
    in_flight: Mutex<Option<RefreshFuture>>,
    listeners: Mutex<Vec<SessionListener>>,
}

/// Owns the credential pair, its persistence, and the refresh exchange.
///
/// Cloning gives another handle to the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

/// Outcome of asking for fresh credentials after a 401.
enum RefreshTicket {
    /// Someone else already replaced the rejected token.
    Ready(CredentialPair),
    Pending(RefreshFuture),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, SessionData> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionData> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the pair wholesale and mirror it to the store.
    fn install(&self, credentials: CredentialPair) {
        {
            let mut data = self.write();
            data.credentials = Some(credentials);
            data.profile = None;
        }
        self.persist();
    }

    /// Install a refreshed pair only if the session still holds the refresh
    /// token that was exchanged. A logout or new login during the exchange wins.
    fn install_if_current(&self, exchanged: &str, credentials: CredentialPair) -> bool {
        {
            let mut data = self.write();
            let still_current = data
                .credentials
                .as_ref()
                .is_some_and(|c| c.refresh_token() == exchanged);
            if !still_current {
                return false;
            }
            data.credentials = Some(credentials);
            data.profile = None;
        }
        self.persist();
        true
    }

    /// Write whatever pair the session holds right now to the store, or clear
    /// the store if it holds none. Store I/O runs outside the data lock.
    fn persist(&self) {
        let _guard = lock(&self.persist);
        let credentials = self.read().credentials.clone();
        let result = match credentials {
            Some(ref credentials) => self.store.save(credentials),
            None => self.store.clear(),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist credentials");
        }
    }

    /// Drop the session, returning whether there was one to drop.
    fn clear(&self, only_if_refresh_token: Option<&str>) -> bool {
        let had_session = {
            let mut data = self.write();
            let matches = match (only_if_refresh_token, data.credentials.as_ref()) {
                (Some(expected), Some(current)) => current.refresh_token() == expected,
                (Some(_), None) => false,
                (None, current) => current.is_some(),
            };
            if matches {
                data.credentials = None;
                data.profile = None;
            }
            matches
        };
        if only_if_refresh_token.is_none() || had_session {
            self.persist();
        }
        had_session
    }

    fn notify(&self, reason: ClearReason) {
        let listeners: Vec<SessionListener> = lock(&self.listeners).clone();
        debug!(?reason, listeners = listeners.len(), "Session cleared");
        for listener in listeners {
            listener(reason);
        }
    }

    async fn exchange(self: Arc<Self>, refresh_token: String) -> Result<CredentialPair, AuthError> {
        debug!("Exchanging refresh token");
        let result = self.api.exchange_refresh(&refresh_token).await;

        let outcome = match result {
            Ok(credentials) => {
                if self.install_if_current(&refresh_token, credentials.clone()) {
                    info!("Session refreshed");
                    Ok(credentials)
                } else {
                    debug!("Session changed during refresh, discarding new pair");
                    Err(AuthError::Unauthenticated)
                }
            }
            Err(e) => {
                warn!(error = %e, "Refresh failed, clearing session");
                if self.clear(Some(refresh_token.as_str())) {
                    self.notify(ClearReason::RefreshFailed);
                }
                Err(e)
            }
        };

        *lock(&self.in_flight) = None;
        outcome
    }
}

impl SessionManager {
    /// Create a session manager, restoring whatever pair the store holds.
    ///
    /// This is the only time the store is read. An unreadable or partial pair
    /// is discarded.
    pub fn new(api: AuthApi, store: Arc<dyn CredentialStore>) -> Self {
        let credentials = match store.load() {
            Ok(Some(pair)) if pair.is_complete() => {
                debug!(expired = pair.is_expired(), "Restored saved credentials");
                Some(pair)
            }
            Ok(Some(_)) => {
                warn!("Discarding incomplete saved credentials");
                if let Err(e) = store.clear() {
                    warn!(error = %e, "Failed to clear incomplete credentials");
                }
                None
            }
            Ok(None) => {
                debug!("No saved credentials");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to load saved credentials");
                if let Err(e) = store.clear() {
                    warn!(error = %e, "Failed to clear unreadable credentials");
                }
                None
            }
        };

        Self {
            inner: Arc::new(Inner {
                api,
                store,
                data: RwLock::new(SessionData {
                    credentials,
                    profile: None,
                }),
                persist: Mutex::new(()),
                in_flight: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn api(&self) -> &AuthApi {
        &self.inner.api
    }

    /// Log in and persist the resulting pair.
    ///
    /// The profile is fetched afterwards; if that fails the login still stands
    /// and the profile stays empty until [`SessionManager::reload_user`].
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<CredentialPair, AuthError> {
        let credentials = self.inner.api.request_token(identifier, secret).await?;
        self.inner.install(credentials.clone());
        info!(user = identifier, "Logged in");

        if let Err(e) = self.reload_user().await {
            warn!(error = %e, "Failed to fetch profile after login");
        }
        Ok(credentials)
    }

    /// Create an account. Does not log in or touch the current session.
    pub async fn register(&self, account: &NewAccount) -> Result<CreatedAccount, AuthError> {
        let created = self.inner.api.register(account).await?;
        info!(username = %created.username, "Registered account");
        Ok(created)
    }

    /// Exchange the refresh token for a new pair.
    ///
    /// Concurrent callers share a single exchange. Any failure clears the
    /// session before the error is returned; a rejected refresh token is never
    /// tried again.
    pub async fn refresh(&self) -> Result<CredentialPair, AuthError> {
        let pending = {
            let mut slot = lock(&self.inner.in_flight);
            self.join_or_start(&mut slot)?
        };
        pending.await
    }

    /// Fresh credentials after `rejected_access` drew a 401.
    ///
    /// If the session already moved past that token (another request refreshed
    /// first), the current pair is returned without a new exchange.
    pub async fn refresh_rejected(&self, rejected_access: &str) -> Result<CredentialPair, AuthError> {
        let ticket = {
            let mut slot = lock(&self.inner.in_flight);
            if slot.is_some() {
                RefreshTicket::Pending(self.join_or_start(&mut slot)?)
            } else {
                match self.credentials() {
                    Some(current) if current.access_token() != rejected_access => {
                        debug!("Access token already replaced, skipping refresh");
                        RefreshTicket::Ready(current)
                    }
                    Some(_) => RefreshTicket::Pending(self.join_or_start(&mut slot)?),
                    None => return Err(AuthError::Unauthenticated),
                }
            }
        };

        match ticket {
            RefreshTicket::Ready(credentials) => Ok(credentials),
            RefreshTicket::Pending(pending) => pending.await,
        }
    }

    fn join_or_start(&self, slot: &mut Option<RefreshFuture>) -> Result<RefreshFuture, AuthError> {
        if let Some(pending) = slot.as_ref() {
            debug!("Joining in-flight refresh");
            return Ok(pending.clone());
        }

        let refresh_token = self
            .credentials()
            .map(|c| c.refresh_token().to_string())
            .ok_or(AuthError::NoRefreshToken)?;

        let pending = Arc::clone(&self.inner)
            .exchange(refresh_token)
            .boxed()
            .shared();
        *slot = Some(pending.clone());
        Ok(pending)
    }

    /// The authenticated user's profile.
    ///
    /// Served from cache while the pair is unchanged. A 401 here is reported as
    /// `Unauthenticated`; refreshing is the interceptor's job.
    pub async fn current_user(&self) -> Result<UserProfile, AuthError> {
        let access = {
            let data = self.inner.read();
            let credentials = data.credentials.as_ref().ok_or(AuthError::Unauthenticated)?;
            if let Some(ref profile) = data.profile {
                return Ok(profile.clone());
            }
            credentials.access_token().to_string()
        };
        self.fetch_user(access).await
    }

    /// Fetch the profile even if one is cached.
    pub async fn reload_user(&self) -> Result<UserProfile, AuthError> {
        let access = self.access_token().ok_or(AuthError::Unauthenticated)?;
        self.fetch_user(access).await
    }

    async fn fetch_user(&self, access: String) -> Result<UserProfile, AuthError> {
        let profile = self.inner.api.fetch_profile(&access).await?;

        let mut data = self.inner.write();
        let unchanged = data
            .credentials
            .as_ref()
            .is_some_and(|c| c.access_token() == access);
        if unchanged {
            data.profile = Some(profile.clone());
        }
        Ok(profile)
    }

    /// Clear the session in memory and in the store. Safe to call repeatedly.
    pub fn logout(&self) {
        if self.inner.clear(None) {
            info!("Logged out");
            self.inner.notify(ClearReason::Logout);
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.read().credentials.is_some()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner
            .read()
            .credentials
            .as_ref()
            .map(|c| c.access_token().to_string())
    }

    pub fn credentials(&self) -> Option<CredentialPair> {
        self.inner.read().credentials.clone()
    }

    pub fn cached_user(&self) -> Option<UserProfile> {
        self.inner.read().profile.clone()
    }

    pub fn state(&self) -> SessionState {
        let data = self.inner.read();
        match data.credentials {
            Some(ref credentials) => SessionState::Authenticated {
                credentials: credentials.clone(),
                profile: data.profile.clone(),
            },
            None => SessionState::Unauthenticated,
        }
    }

    /// True when the access token is within its expiry buffer.
    pub fn needs_refresh(&self) -> bool {
        self.inner
            .read()
            .credentials
            .as_ref()
            .is_some_and(CredentialPair::needs_refresh)
    }

    pub fn is_refreshing(&self) -> bool {
        lock(&self.inner.in_flight).is_some()
    }

    /// Register a callback for when an established session is discarded,
    /// either by logout or by a failed refresh.
    pub fn on_session_cleared<F>(&self, callback: F)
    where
        F: Fn(ClearReason) + Send + Sync + 'static,
    {
        lock(&self.inner.listeners).push(Arc::new(callback));
    }
}
