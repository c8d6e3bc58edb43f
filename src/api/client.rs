//! API client for the game server.
//!
//! The server authenticates with an HTTP-only cookie named `token`. The
//! client captures it from `Set-Cookie` on login, signup and refresh, and
//! sends it back as a `Cookie` header.

use reqwest::header::{HeaderMap, COOKIE, SET_COOKIE};
use reqwest::{Client, RequestBuilder, Response};

use super::types::{ApiError, AuthRequest, PublicGame};
use crate::constants::{self, SESSION_COOKIE};
use crate::endpoints::Endpoints;

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Async client for the game server's HTTP API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    endpoints: Endpoints,
    session: Option<String>,
}

impl ApiClient {
    /// Creates a client without a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoints: Endpoints) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(constants::HTTP_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, endpoints))
    }

    /// Creates a client around a pre-configured HTTP client.
    pub fn with_client(client: Client, endpoints: Endpoints) -> Self {
        Self {
            client,
            endpoints,
            session: None,
        }
    }

    /// Use an existing session cookie value.
    #[must_use]
    pub fn with_session(mut self, session: Option<String>) -> Self {
        self.session = session.filter(|s| !s.is_empty());
        self
    }

    /// Current session cookie value.
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Logs in and captures the session cookie.
    pub async fn login(&mut self, username: &str, password: &str) -> ApiResult<&str> {
        let url = self.endpoints.login();
        self.authenticate(&url, username, password).await
    }

    /// Creates an account and captures the session cookie.
    pub async fn signup(&mut self, username: &str, password: &str) -> ApiResult<&str> {
        let url = self.endpoints.signup();
        self.authenticate(&url, username, password).await
    }

    async fn authenticate(&mut self, url: &str, username: &str, password: &str) -> ApiResult<&str> {
        let response = self
            .client
            .post(url)
            .json(&AuthRequest { username, password })
            .send()
            .await?;
        let response = check_status(response).await?;

        let token = extract_session_cookie(response.headers()).ok_or(ApiError::MissingSession)?;
        log::info!("[api] Authenticated as {username}");
        Ok(self.session.insert(token).as_str())
    }

    /// Ends the session on the server and forgets it locally.
    ///
    /// The local session is dropped even if the request fails.
    pub async fn logout(&mut self) -> ApiResult<()> {
        let request = self.authorized(self.client.post(self.endpoints.logout()));
        self.session = None;
        let response = request.send().await?;
        check_status(response).await?;
        Ok(())
    }

    /// Asks the server for a fresh session cookie.
    ///
    /// Keeps the current session if the server does not rotate it.
    pub async fn refresh(&mut self) -> ApiResult<()> {
        let response = self
            .authorized(self.client.get(self.endpoints.refresh()))
            .send()
            .await?;
        let response = check_status(response).await?;
        if let Some(token) = extract_session_cookie(response.headers()) {
            log::debug!("[api] Session refreshed");
            self.session = Some(token);
        }
        Ok(())
    }

    /// Lists rooms that are open to the public.
    pub async fn public_games(&self) -> ApiResult<Vec<PublicGame>> {
        let response = self
            .authorized(self.client.get(self.endpoints.public_games()))
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.session {
            Some(token) => request.header(COOKIE, format!("{SESSION_COOKIE}={token}")),
            None => request,
        }
    }
}

/// Turn non-success responses into [`ApiError::Status`] with the body as code.
async fn check_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().path().to_string();
    let code = response.text().await.unwrap_or_default().trim().to_string();
    log::debug!("[api] {url} -> {status} {code}");
    Err(ApiError::Status { status, code })
}

/// Value of the session cookie in `Set-Cookie` headers.
///
/// An empty value (the server clearing the cookie) counts as no session.
pub(crate) fn extract_session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| {
            let pair = cookie.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            (name.trim() == SESSION_COOKIE).then(|| value.trim().to_string())
        })
        .last()
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(cookies: &[&str]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for cookie in cookies {
            map.append(SET_COOKIE, HeaderValue::from_str(cookie).unwrap());
        }
        map
    }

    #[test]
    fn test_extracts_token_cookie() {
        let h = headers(&["token=abc.def; Path=/; Max-Age=3600; HttpOnly; Secure"]);
        assert_eq!(extract_session_cookie(&h).as_deref(), Some("abc.def"));
    }

    #[test]
    fn test_ignores_other_cookies() {
        let h = headers(&["theme=dark; Path=/", "token=xyz; Path=/"]);
        assert_eq!(extract_session_cookie(&h).as_deref(), Some("xyz"));
        assert_eq!(extract_session_cookie(&headers(&["theme=dark"])), None);
    }

    #[test]
    fn test_cleared_cookie_is_no_session() {
        let h = headers(&["token=; Path=/; Max-Age=0"]);
        assert_eq!(extract_session_cookie(&h), None);
        assert_eq!(extract_session_cookie(&HeaderMap::new()), None);
    }

    #[test]
    fn test_with_session_ignores_empty() {
        let endpoints = Endpoints::new("http://localhost:5000", "ws://localhost:5000");
        let client = ApiClient::new(endpoints.clone())
            .unwrap()
            .with_session(Some(String::new()));
        assert_eq!(client.session(), None);

        let client = ApiClient::new(endpoints)
            .unwrap()
            .with_session(Some("abc".into()));
        assert_eq!(client.session(), Some("abc"));
    }
}
