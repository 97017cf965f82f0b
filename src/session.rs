//! Cookie-bearing sessions against the archive's login service.
//!
//! The login form carries a `csrf_token` hidden input that must be echoed back with the
//! credentials. The archive reports a rejected login only through the page content, so
//! [`LOGIN_FAILURE_MARKER`] is searched for in the response body.
use regex::Regex;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, Proxy, StatusCode};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};
use url::Url;

use crate::config::{FetchConfig, ProxyConfig};
use crate::credentials::Credentials;
use crate::error::{FetchError, NetworkErrorKind};
use crate::retry::RetryPolicy;

pub const LOGIN_FAILURE_MARKER: &str =
    "You must sign in as a registered user to download data or place orders for USGS EROS products";

static TOKEN_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Anti-forgery token of the login form, if the page has one.
pub fn extract_token(html: &str) -> Option<String> {
    let pattern = TOKEN_PATTERN.get_or_init(|| {
        Regex::new(r#"<input .*?name="csrf_token".*?value="(.*?)""#).expect("valid token pattern")
    });
    pattern
        .captures(html)
        .map(|caps| caps[1].to_string())
        .filter(|token| !token.is_empty())
}

/// An authenticated session. Each worker owns its own; the cookie jar is never shared
/// between sessions.
pub struct DownloadSession {
    client: Client,
    cookies: Arc<Jar>,
    account: String,
}

impl DownloadSession {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// The `Cookie` header this session would send to `url`.
    pub fn cookies_for(&self, url: &Url) -> Option<String> {
        self.cookies
            .cookies(url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }
}

impl std::fmt::Debug for DownloadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadSession")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

/// HTTP client used for every request to the archive, routed through `proxy` when set.
pub fn build_client(
    config: &FetchConfig,
    proxy: Option<&ProxyConfig>,
    cookies: Option<Arc<Jar>>,
) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .user_agent(concat!("landsat-pull/", env!("CARGO_PKG_VERSION")))
        .timeout(config.request_timeout())
        .connect_timeout(config.connect_timeout());
    if let Some(cookies) = cookies {
        builder = builder.cookie_provider(cookies);
    }

    if let Some(proxy) = proxy {
        let address = format!("{}:{}", proxy.host, proxy.port);
        let url = proxy
            .url()
            .map_err(|e| FetchError::network(NetworkErrorKind::Permanent, &address, e))?;
        let proxy = Proxy::all(url.as_str())
            .map_err(|e| FetchError::network(NetworkErrorKind::Permanent, &address, e))?
            .basic_auth(&proxy.user, &proxy.password);
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| FetchError::network(NetworkErrorKind::Permanent, "http client", e))
}

async fn fetch_login_page(
    client: &Client,
    login_url: &str,
    policy: &RetryPolicy,
) -> Result<String, FetchError> {
    let response = client
        .get(login_url)
        .send()
        .await
        .map_err(|e| policy.transport_error(login_url, e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(policy.status_error(login_url, status));
    }
    response
        .text()
        .await
        .map_err(|e| policy.transport_error(login_url, e))
}

/// Log in and return a session whose cookies authorise downloads.
///
/// Fails with [`FetchError::TokenNotFound`] when the login page has no token and with
/// [`FetchError::Authentication`] when the archive rejects the credentials.
pub async fn connect(
    credentials: &Credentials,
    proxy: Option<&ProxyConfig>,
    config: &FetchConfig,
) -> Result<DownloadSession, FetchError> {
    let cookies = Arc::new(Jar::default());
    let client = build_client(config, proxy, Some(cookies.clone()))?;
    let login_url = config.endpoints.login.as_str();
    let policy = &config.retry;

    info!(
        account = credentials.account(),
        proxied = proxy.is_some(),
        "Connecting to archive"
    );

    let page = policy
        .run("Login page request", || {
            fetch_login_page(&client, login_url, policy)
        })
        .await?;
    let token = extract_token(&page).ok_or(FetchError::TokenNotFound)?;
    debug!("Found csrf token on login page");

    let form = [
        ("username", credentials.account()),
        ("password", credentials.password()),
        ("csrf_token", token.as_str()),
    ];
    let response = client
        .post(login_url)
        .form(&form)
        .send()
        .await
        .map_err(|e| policy.transport_error(login_url, e))?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(FetchError::Authentication);
    }
    if !status.is_success() {
        return Err(policy.status_error(login_url, status));
    }
    let body = response
        .text()
        .await
        .map_err(|e| policy.transport_error(login_url, e))?;
    if body.contains(LOGIN_FAILURE_MARKER) {
        return Err(FetchError::Authentication);
    }

    info!(account = credentials.account(), "Archive session established");
    Ok(DownloadSession {
        client,
        cookies,
        account: credentials.account().to_string(),
    })
}
