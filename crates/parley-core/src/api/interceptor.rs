//! Authenticated request dispatch.
//!
//! `AuthenticatedClient` wraps a [`Transport`] and a [`SessionManager`]. Every
//! request gets the current bearer token attached. When the server answers 401
//! the client obtains fresh credentials from the session (joining a refresh
//! already in flight rather than starting another) and re-issues the request
//! once. If the refresh fails the original 401 response is handed back.

use std::future::Future;

use reqwest::{header, Client, Method, Request, RequestBuilder, Response, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::auth::SessionManager;
use crate::config::Config;

use super::ApiError;

/// Something that can put a request on the wire.
///
/// Implemented for `reqwest::Client`; tests and middleware can wrap or
/// replace it.
pub trait Transport: Send + Sync {
    fn execute(&self, request: Request) -> impl Future<Output = reqwest::Result<Response>> + Send;
}

impl Transport for Client {
    fn execute(&self, request: Request) -> impl Future<Output = reqwest::Result<Response>> + Send {
        Client::execute(self, request)
    }
}

/// Client for application requests that need an authenticated session.
/// Clone is cheap when the transport is; handles share the session.
#[derive(Clone)]
pub struct AuthenticatedClient<T = Client> {
    transport: T,
    session: SessionManager,
    base_url: String,
    refresh_url: Option<Url>,
}

impl AuthenticatedClient<Client> {
    /// Use the session's own HTTP client as transport.
    pub fn new(session: SessionManager, config: &Config) -> Self {
        let transport = session.api().http().clone();
        Self::with_transport(transport, session, config.api_base_url())
    }
}

impl<T: Transport> AuthenticatedClient<T> {
    pub fn with_transport(transport: T, session: SessionManager, base_url: &str) -> Self {
        let refresh_url = Url::parse(&session.api().endpoints().refresh).ok();
        Self {
            transport,
            session,
            base_url: base_url.trim_end_matches('/').to_string(),
            refresh_url,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Start a request against `path` on the API server.
    ///
    /// The builder is only used to assemble the request; it is sent through
    /// [`AuthenticatedClient::send`].
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.session.api().http().request(method, self.url(path))
    }

    fn is_refresh_call(&self, request: &Request) -> bool {
        let Some(ref refresh_url) = self.refresh_url else {
            return false;
        };
        let url = request.url();
        url.scheme() == refresh_url.scheme()
            && url.host_str() == refresh_url.host_str()
            && url.port_or_known_default() == refresh_url.port_or_known_default()
            && url.path().trim_end_matches('/') == refresh_url.path().trim_end_matches('/')
    }

    async fn dispatch(&self, request: Request) -> Result<Response, ApiError> {
        Ok(self.transport.execute(request).await?)
    }

    /// Send a request with the session's credentials, refreshing once on 401.
    ///
    /// Responses other than 401 are returned untouched, whatever their status.
    pub async fn send(&self, mut request: Request) -> Result<Response, ApiError> {
        if self.is_refresh_call(&request) {
            return self.dispatch(request).await;
        }

        let sent_token = self.session.access_token();
        if let Some(ref token) = sent_token {
            attach_bearer(&mut request, token)?;
        }

        let replay = request.try_clone();
        let url = request.url().clone();
        let response = self.dispatch(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let (Some(rejected), Some(mut replay)) = (sent_token, replay) else {
            debug!(url = %url, "Unauthorized without a replayable authenticated request");
            return Ok(response);
        };

        match self.session.refresh_rejected(&rejected).await {
            Ok(credentials) => {
                debug!(url = %url, "Replaying request with refreshed credentials");
                attach_bearer(&mut replay, credentials.access_token())?;
                self.dispatch(replay).await
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Could not refresh session");
                Ok(response)
            }
        }
    }

    async fn send_checked(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let request = builder
            .build()
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        check_response(self.send(request).await?).await
    }

    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, ApiError> {
        let response = self.send_checked(self.request(Method::GET, path)).await?;
        parse_json(response).await
    }

    pub async fn get_json_with_query<Q, R>(&self, path: &str, query: &Q) -> Result<R, ApiError>
    where
        Q: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .send_checked(self.request(Method::GET, path).query(query))
            .await?;
        parse_json(response).await
    }

    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .send_checked(self.request(Method::POST, path).json(body))
            .await?;
        parse_json(response).await
    }

    pub async fn put_json<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .send_checked(self.request(Method::PUT, path).json(body))
            .await?;
        parse_json(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send_checked(self.request(Method::DELETE, path)).await?;
        Ok(())
    }

    pub async fn get_text(&self, path: &str) -> Result<String, ApiError> {
        let response = self.send_checked(self.request(Method::GET, path)).await?;
        Ok(response.text().await?)
    }
}

fn attach_bearer(request: &mut Request, token: &str) -> Result<(), ApiError> {
    let mut value = header::HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| ApiError::InvalidRequest(format!("Access token is not a valid header: {}", e)))?;
    value.set_sensitive(true);
    request.headers_mut().insert(header::AUTHORIZATION, value);
    Ok(())
}

/// Check if response is successful, returning an error with body if not.
async fn check_response(response: Response) -> Result<Response, ApiError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status, &body))
    }
}

async fn parse_json<R: DeserializeOwned>(response: Response) -> Result<R, ApiError> {
    let url = response.url().clone();
    let text = response.text().await?;
    serde_json::from_str(&text)
        .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e)))
}
