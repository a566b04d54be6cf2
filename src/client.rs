//! The transport to the GitHub REST API.
//!
//! [`GitHubClient`] attaches the GitHub headers and the bearer credential when one is present,
//! applies a timeout to every call and retries transient failures according to its
//! [`RetryPolicy`]. A `404 Not Found` is returned as a regular [`ApiResponse`] so lookups can
//! report absence without failing; every other unsuccessful status is a [`TransportError`].

#![cfg(feature = "workflow")]

use std::{fmt, time::Duration};

use futures::{Stream, stream};
use reqwest::{
    Method, StatusCode,
    header::{self, HeaderMap},
};
use serde::{Deserialize, de::DeserializeOwned};
use tokio_util::bytes::Bytes;
use tracing::debug;

use crate::{
    error::TransportError,
    framework::{RetryPolicy, retry},
};

const USER_AGENT: &str = concat!("artifact-cache/", env!("CARGO_PKG_VERSION"));

/// Query parameters of a request.
pub type Params = [(&'static str, String)];

/// The body of a request.
#[derive(Debug, Clone)]
pub enum Body {
    /// A JSON document.
    Json(serde_json::Value),
    /// Raw bytes of the given content type.
    Bytes {
        /// The `Content-Type` of the bytes.
        content_type: String,
        /// The bytes to send.
        bytes: Bytes,
    },
}

/// A response with a successful or `404 Not Found` status.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// The url that answered.
    pub url: String,
    /// The returned status.
    pub status: StatusCode,
    /// The returned headers.
    pub headers: HeaderMap,
    /// The whole response body.
    pub body: Bytes,
}

impl ApiResponse {
    /// Returns `true` if the requested resource does not exist.
    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }

    /// Parses the body into a typed record.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Decode`] if the body does not match `T`.
    pub fn json<T>(&self) -> Result<T, TransportError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body).map_err(|source| TransportError::Decode {
            url: self.url.clone(),
            source,
        })
    }

    /// Parses the body into a typed record, mapping `404 Not Found` to [`None`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Decode`] if the body does not match `T`.
    pub fn json_if_found<T>(&self) -> Result<Option<T>, TransportError>
    where
        T: DeserializeOwned,
    {
        if self.is_not_found() {
            Ok(None)
        } else {
            self.json().map(Some)
        }
    }

    /// Returns the url of the next page announced by the `Link` header.
    pub fn next_page(&self) -> Option<String> {
        self.headers
            .get_all(header::LINK)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(next_link)
    }
}

/// Extracts the `rel="next"` target of a `Link` header value.
fn next_link(value: &str) -> Option<String> {
    value.split(',').find_map(|link| {
        let mut parts = link.split(';');
        let target = parts.next()?.trim();
        parts
            .any(|param| matches!(param.trim(), r#"rel="next""# | "rel=next"))
            .then(|| {
                target
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_owned()
            })
    })
}

/// A response collection that can be split into items, e.g. `{ "total_count": 1, "artifacts": [...] }`.
pub trait Page: DeserializeOwned {
    /// The listed record.
    type Item;

    /// Returns the items of the page in listing order.
    fn into_items(self) -> Vec<Self::Item>;
}

impl<T> Page for Vec<T>
where
    T: DeserializeOwned,
{
    type Item = T;

    fn into_items(self) -> Vec<T> {
        self
    }
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: Option<String>,
}

/// An authenticated client of the GitHub REST API.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
    policy: RetryPolicy,
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient")
            .field("api_url", &self.api_url)
            .field("authenticated", &self.token.is_some())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl GitHubClient {
    /// Creates a [`GitHubClient`] talking to `api_url`, authenticated with `token` if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be initialized.
    pub fn new(api_url: &str, token: Option<String>, policy: RetryPolicy) -> reqwest::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().user_agent(USER_AGENT).build()?,
            api_url: api_url.trim_end_matches('/').to_owned(),
            token,
            policy,
        })
    }

    /// Returns `true` if a credential is attached to every request.
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Returns the retry policy of the client.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Resolves a path relative to the API url. Absolute urls are kept as they are.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_owned()
        } else {
            format!("{}/{}", self.api_url, path.trim_start_matches('/'))
        }
    }

    /// Sends a request, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the last [`TransportError`] if the request keeps failing, or fails with a status other
    /// than `404 Not Found` that is not worth retrying.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: &Params,
        body: Option<&Body>,
    ) -> Result<ApiResponse, TransportError> {
        let url = self.url(path);
        let timeout = match body {
            Some(Body::Bytes { .. }) => self.policy.transfer_timeout,
            _ => self.policy.timeout,
        };

        retry(&self.policy, &format!("{method} {url}"), || {
            self.send(method.clone(), &url, params, body, timeout)
        })
        .await
    }

    /// Sends a `GET` request and returns the response unread, for streaming large bodies.
    ///
    /// A `404 Not Found` is an error here since there is nothing to stream. The call is not retried;
    /// the caller retries the whole transfer.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the request fails or the status is unsuccessful.
    pub async fn stream(&self, url: &str) -> Result<reqwest::Response, TransportError> {
        debug!("requesting stream from {url}…");
        let response = self
            .builder(Method::GET, url, self.policy.transfer_timeout)
            .send()
            .await
            .map_err(|source| TransportError::Network {
                method: Method::GET,
                url: url.to_owned(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let headers = response.headers().clone();
            let body = response.bytes().await.unwrap_or_default();
            Err(status_error(Method::GET, url, status, &headers, &body))
        }
    }

    /// Lists a paginated collection lazily, following the `Link` header page by page.
    ///
    /// Pages are only requested when polled, so a consumer can stop early. A `404 Not Found` ends the
    /// listing without an error. The stream cannot be restarted; list again from the first page instead.
    pub fn pages<'a, P>(
        &'a self,
        path: &str,
        params: &Params,
    ) -> impl Stream<Item = Result<Vec<P::Item>, TransportError>> + use<'a, P>
    where
        P: Page + 'a,
    {
        let first = (self.url(path), params.to_vec());

        stream::try_unfold(Some(first), move |next| async move {
            let Some((url, params)) = next else {
                return Ok::<_, TransportError>(None);
            };

            let response = self.request(Method::GET, &url, &params, None).await?;
            if response.is_not_found() {
                debug!("nothing to list at {url}");
                return Ok(None);
            }

            let items = response.json::<P>()?.into_items();
            let next = response.next_page().map(|url| (url, Vec::new()));
            Ok(Some((items, next)))
        })
    }

    fn builder(&self, method: Method, url: &str, timeout: Duration) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .timeout(timeout)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");

        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        params: &Params,
        body: Option<&Body>,
        timeout: Duration,
    ) -> Result<ApiResponse, TransportError> {
        debug!("requesting {method} {url}…");
        let builder = self.builder(method.clone(), url, timeout).query(params);
        let builder = match body {
            Some(Body::Json(json)) => builder.json(json),
            Some(Body::Bytes {
                content_type,
                bytes,
            }) => builder
                .header(header::CONTENT_TYPE, content_type)
                .body(bytes.clone()),
            None => builder,
        };

        let network = |source| TransportError::Network {
            method: method.clone(),
            url: url.to_owned(),
            source,
        };
        let response = builder.send().await.map_err(network)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(network)?;

        if status.is_success() || status == StatusCode::NOT_FOUND {
            debug!("{method} {url} returned {status}");
            Ok(ApiResponse {
                url: url.to_owned(),
                status,
                headers,
                body,
            })
        } else {
            Err(status_error(method, url, status, &headers, &body))
        }
    }
}

/// Builds a [`TransportError::Status`], reading the rate limit hints from the headers.
fn status_error(
    method: Method,
    url: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
) -> TransportError {
    let message = serde_json::from_slice::<ErrorPayload>(body)
        .ok()
        .and_then(|payload| payload.message)
        .or_else(|| status.canonical_reason().map(str::to_owned))
        .unwrap_or_default();

    let header_str = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
    let hinted = header_str(header::RETRY_AFTER.as_str());

    // Secondary rate limits answer 403 with a `Retry-After` while the primary budget is left.
    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || header_str("x-ratelimit-remaining") == Some("0")
        || (status == StatusCode::FORBIDDEN
            && (hinted.is_some() || message.to_ascii_lowercase().contains("rate limit")));

    let retry_after = hinted.and_then(parse_retry_after).or_else(|| {
        let reset = header_str("x-ratelimit-reset")?.trim().parse::<i64>().ok()?;
        rate_limited.then(|| seconds_until(reset))
    });

    TransportError::Status {
        method,
        url: url.to_owned(),
        status,
        message,
        retry_after,
        rate_limited,
    }
}

/// Parses a `Retry-After` value, given either in seconds or as an HTTP date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    match value.parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => chrono::DateTime::parse_from_rfc2822(value)
            .ok()
            .map(|at| seconds_until(at.timestamp())),
    }
}

fn seconds_until(timestamp: i64) -> Duration {
    let secs = timestamp - chrono::Utc::now().timestamp();
    Duration::from_secs(u64::try_from(secs).unwrap_or_default())
}
