use std::sync::Arc;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, info, warn};

use crate::auth::{SessionEvents, TokenStore};

use super::ApiError;

/// HTTP client decorator that authenticates outbound requests from the token
/// store and reacts to 401 by dropping the session.
///
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct AuthorizedClient {
    client: Client,
    tokens: Arc<TokenStore>,
    events: SessionEvents,
}

impl AuthorizedClient {
    pub fn new(client: Client, tokens: Arc<TokenStore>, events: SessionEvents) -> Self {
        Self {
            client,
            tokens,
            events,
        }
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// The undecorated client, for requests that must not carry credentials.
    pub fn plain(&self) -> &Client {
        &self.client
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    /// Send `request` with the current bearer token (if any) and return the
    /// raw response. A 401 clears the session before the response is handed back.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = self.authorize(request).send().await?;
        self.observe_status(response.status());
        Ok(response)
    }

    /// Attach `Authorization: Bearer <token>` when a valid session exists;
    /// otherwise leave the request unauthenticated.
    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.tokens.get_token() {
            Some(token) => request.bearer_auth(token),
            None => {
                debug!("No valid session, sending request unauthenticated");
                request
            }
        }
    }

    /// React to a response status. Returns true if the session was invalidated.
    pub fn observe_status(&self, status: StatusCode) -> bool {
        if status != StatusCode::UNAUTHORIZED {
            return false;
        }
        if let Err(e) = self.tokens.clear() {
            warn!(error = %e, "Failed to clear session after 401");
        }
        let listeners = self.events.notify_expired();
        info!(listeners, "Server rejected token, session cleared");
        true
    }
}
