#![allow(dead_code)]

use std::sync::Arc;

use parley_core::{
    AuthApi, AuthenticatedClient, Config, CredentialPair, CredentialStore, MemoryCredentialStore,
    SessionManager,
};
use serde_json::{json, Value};
use wiremock::MockServer;

pub struct Harness {
    pub server: MockServer,
    pub config: Config,
    pub store: Arc<MemoryCredentialStore>,
    pub session: SessionManager,
}

impl Harness {
    /// Mock server plus a session, optionally resuming a saved pair.
    pub async fn start(saved: Option<(&str, &str)>) -> Self {
        Self::start_with(saved.map(|(access, refresh)| pair(access, refresh))).await
    }

    pub async fn start_with(saved: Option<CredentialPair>) -> Self {
        let server = MockServer::start().await;
        let config = Config::for_base_url(server.uri());
        let store = Arc::new(match saved {
            Some(pair) => MemoryCredentialStore::with_pair(pair),
            None => MemoryCredentialStore::new(),
        });
        let api = AuthApi::new(&config).expect("auth api builds");
        let session = SessionManager::new(api, store.clone());
        Self {
            server,
            config,
            store,
            session,
        }
    }

    pub fn client(&self) -> AuthenticatedClient {
        AuthenticatedClient::new(self.session.clone(), &self.config)
    }

    /// Tokens currently in the store, as (access, refresh).
    pub fn stored(&self) -> Option<(String, String)> {
        self.store
            .load()
            .expect("memory store never fails")
            .map(|p| (p.access_token().to_string(), p.refresh_token().to_string()))
    }
}

pub fn pair(access: &str, refresh: &str) -> CredentialPair {
    CredentialPair::new(access, refresh).expect("complete pair")
}

pub fn tokens(access: &str, refresh: &str) -> Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer"
    })
}

pub fn profile() -> Value {
    json!({
        "id": "u-1",
        "username": "ada",
        "email": "a@b.com",
        "full_name": "Ada Lovelace",
        "disabled": false
    })
}
