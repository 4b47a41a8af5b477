//! Command implementations and session bootstrap.

use std::io::{self, Write};

use anyhow::{Context, Result};
use parley_core::models::{ConversationQuery, NewAccount, UserProfile};
use parley_core::{
    ApiError, AuthApi, AuthError, AuthenticatedClient, ClearReason, Config, SessionManager,
    SessionState,
};
use tracing::{debug, warn};

const PASSWORD_ENV: &str = "PARLEY_PASSWORD";

const PROFILE_PATH: &str = "/api/users/me";

pub struct App {
    config: Config,
    session: SessionManager,
    client: AuthenticatedClient,
}

impl App {
    pub fn new() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        debug!(base_url = %config.base_url, backend = ?config.credential_backend, "Configuration loaded");

        let store = config
            .open_credential_store()
            .context("Failed to open credential store")?;
        let api = AuthApi::new(&config).context("Failed to build HTTP client")?;
        let session = SessionManager::new(api, store);

        session.on_session_cleared(|reason| {
            if reason == ClearReason::RefreshFailed {
                eprintln!("Session expired. Run `parley login` to sign in again.");
            }
        });

        let client = AuthenticatedClient::new(session.clone(), &config);
        Ok(Self {
            config,
            session,
            client,
        })
    }

    pub async fn login(&mut self, username: Option<String>) -> Result<()> {
        let username = match username {
            Some(username) => username,
            None => self.prompt_username()?,
        };
        if username.is_empty() {
            anyhow::bail!("Username required");
        }

        let password = match std::env::var(PASSWORD_ENV) {
            Ok(password) if !password.is_empty() => password,
            _ => rpassword::prompt_password("Password: ")?,
        };

        println!("Authenticating...");
        match self.session.login(&username, &password).await {
            Ok(_) => {}
            Err(AuthError::InvalidCredentials) => anyhow::bail!("Invalid username or password"),
            Err(e) => return Err(e).context("Login failed"),
        }

        self.config.last_username = Some(username.clone());
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }

        match self.session.cached_user() {
            Some(user) => println!("Logged in as {}", describe(&user)),
            None => println!("Logged in as {} (profile unavailable)", username),
        }
        Ok(())
    }

    fn prompt_username(&self) -> Result<String> {
        match self.config.last_username {
            Some(ref last_user) => print!("Username [{}]: ", last_user),
            None => print!("Username: "),
        }
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim();

        Ok(match (input.is_empty(), self.config.last_username.as_ref()) {
            (true, Some(last_user)) => last_user.clone(),
            _ => input.to_string(),
        })
    }

    pub async fn register(&self, username: &str, email: &str, full_name: Option<String>) -> Result<()> {
        let password = match std::env::var(PASSWORD_ENV) {
            Ok(password) if !password.is_empty() => password,
            _ => {
                let password = rpassword::prompt_password("Choose a password: ")?;
                let confirm = rpassword::prompt_password("Confirm password: ")?;
                if password != confirm {
                    anyhow::bail!("Passwords do not match");
                }
                password
            }
        };

        let account = NewAccount {
            username: username.to_string(),
            email: email.to_string(),
            password,
            full_name,
        };

        match self.session.register(&account).await {
            Ok(created) => {
                println!("Created account {}", describe(&created));
                println!("Run `parley login {}` to sign in.", created.email);
                Ok(())
            }
            Err(AuthError::Conflict(detail)) => anyhow::bail!("Account already exists: {}", detail),
            Err(AuthError::Validation(detail)) => anyhow::bail!("Invalid registration: {}", detail),
            Err(e) => Err(e).context("Registration failed"),
        }
    }

    fn require_session(&self) -> Result<()> {
        if !self.session.is_authenticated() {
            anyhow::bail!("Not logged in. Run `parley login` first.");
        }
        Ok(())
    }

    pub async fn whoami(&self) -> Result<()> {
        self.require_session()?;
        // Through the authenticated client so an expired token gets refreshed
        let user: UserProfile = self
            .client
            .get_json(PROFILE_PATH)
            .await
            .map_err(session_hint)?;
        println!("{}", describe(&user));
        Ok(())
    }

    pub fn status(&self) {
        match self.session.state() {
            SessionState::Unauthenticated => println!("Not logged in"),
            SessionState::Authenticated {
                credentials,
                profile,
            } => {
                match profile {
                    Some(user) => println!("Logged in as {}", describe(&user)),
                    None => println!("Logged in"),
                }
                match credentials.expiry() {
                    Some(expiry) if credentials.is_expired() => {
                        println!("Access token expired at {} (will refresh on next request)", expiry)
                    }
                    Some(expiry) if credentials.needs_refresh() => {
                        println!("Access token expires soon ({})", expiry)
                    }
                    Some(expiry) => println!("Access token valid until {}", expiry),
                    None => println!("Access token expiry unknown"),
                }
            }
        }
        println!("Server: {}", self.config.api_base_url());
    }

    pub async fn refresh(&self) -> Result<()> {
        self.require_session()?;
        match self.session.refresh().await {
            Ok(credentials) => {
                match credentials.expiry() {
                    Some(expiry) => println!("Session refreshed, access token valid until {}", expiry),
                    None => println!("Session refreshed"),
                }
                Ok(())
            }
            Err(e) if e.is_session_ending() => {
                anyhow::bail!("Session is no longer valid ({}). Run `parley login`.", e)
            }
            Err(e) => Err(e).context("Refresh failed"),
        }
    }

    pub async fn conversations(&self, search: Option<String>) -> Result<()> {
        self.require_session()?;
        let query = match search {
            Some(term) => ConversationQuery::search(term),
            None => ConversationQuery::default(),
        };

        let conversations = self
            .client
            .list_conversations(&query)
            .await
            .map_err(session_hint)?;

        if conversations.is_empty() {
            println!("No conversations");
        }
        for conversation in conversations {
            let pin = if conversation.is_pinned { "*" } else { " " };
            println!("{} {}  {}", pin, conversation.id, conversation.title);
        }
        Ok(())
    }

    pub fn logout(&self) {
        self.session.logout();
        println!("Logged out");
    }
}

fn describe(user: &UserProfile) -> String {
    format!("{} <{}>", user.display_name(), user.email)
}

/// Turn a final 401 into an instruction the user can act on.
fn session_hint(err: ApiError) -> anyhow::Error {
    match err {
        ApiError::Unauthorized => anyhow::anyhow!("Session is no longer valid. Run `parley login`."),
        other => other.into(),
    }
}
