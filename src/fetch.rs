//! Safe HTTP fetching with redirect validation.
//!
//! [`SecureTransport`] drives an [`HttpTransport`] one transaction at a time.
//! Every hop of a redirect chain goes back through the [`SsrfEngine`] before
//! it is requested, and the chain length is bounded.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use http::header::{
    HeaderName, HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, COOKIE,
    LOCATION, PROXY_AUTHORIZATION, TRANSFER_ENCODING, WWW_AUTHENTICATE,
};
use http::{HeaderMap, Method, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::engine::{run_blocking, ResolvedTarget, SsrfEngine, Verdict};
use crate::error::Error;
use crate::transport::{HttpTransport, TransportRequest, TransportResponse};

/// Caller-supplied check on the final response status.
#[derive(Clone)]
pub struct StatusPredicate(Arc<dyn Fn(StatusCode) -> bool + Send + Sync>);

impl StatusPredicate {
    pub fn new(f: impl Fn(StatusCode) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Accept 2xx only.
    pub fn success() -> Self {
        Self::new(|status| status.is_success())
    }

    pub fn accepts(&self, status: StatusCode) -> bool {
        (self.0)(status)
    }
}

impl fmt::Debug for StatusPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StatusPredicate(..)")
    }
}

/// What to fetch, and how.
///
/// Unset limits fall back to the engine's [`PolicyConfig`](crate::PolicyConfig).
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Option<String>,
    /// Joined with `url` when both are set.
    pub base_url: Option<String>,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// Covers DNS and every transaction of the whole chain.
    pub timeout: Option<Duration>,
    pub max_redirects: Option<usize>,
    pub max_response_bytes: Option<usize>,
    pub validate_status: Option<StatusPredicate>,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = Some(base.into());
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = Some(max);
        self
    }

    pub fn max_response_bytes(mut self, max: usize) -> Self {
        self.max_response_bytes = Some(max);
        self
    }

    pub fn validate_status(mut self, f: impl Fn(StatusCode) -> bool + Send + Sync + 'static) -> Self {
        self.validate_status = Some(StatusPredicate::new(f));
        self
    }

    /// The URL of the first hop.
    fn effective_url(&self) -> Result<Url, Error> {
        match (&self.base_url, &self.url) {
            (Some(base), Some(path)) => {
                let base_url = Url::parse(base).map_err(|e| Error::invalid_url(base, e.to_string()))?;
                base_url
                    .join(path)
                    .map_err(|e| Error::invalid_url(path, e.to_string()))
            }
            (Some(url), None) | (None, Some(url)) => {
                Url::parse(url).map_err(|e| Error::invalid_url(url, e.to_string()))
            }
            (None, None) => Err(Error::invalid_url("", "request has no URL")),
        }
    }
}

/// The final response of a fetch, including the redirect chain.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,

    /// URL of the final hop.
    pub url: Url,

    /// Number of redirects followed.
    pub redirects: usize,

    /// Validated targets in the order they were requested, including the
    /// original. Hops skipped by a policy with chain validation disabled
    /// do not appear.
    pub chain: Vec<ResolvedTarget>,
}

/// Outcome of one member of [`SecureTransport::fetch_all`].
#[derive(Debug)]
pub struct BatchOutcome {
    pub url: Option<String>,
    pub result: Result<FetchResponse, Error>,
}

/// Per-fetch redirect bookkeeping. Owned by one `fetch` call.
struct RedirectState {
    current_url: Url,
    hop_count: usize,
    method: Method,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    pinned: Option<SocketAddr>,
    chain: Vec<ResolvedTarget>,
}

impl RedirectState {
    /// Credentials never follow a redirect to another origin.
    fn remove_sensitive_headers(&mut self) {
        for name in [AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION, WWW_AUTHENTICATE] {
            self.headers.remove(name);
        }
    }

    fn remove_body_headers(&mut self) {
        for name in [CONTENT_TYPE, CONTENT_LENGTH, CONTENT_ENCODING, TRANSFER_ENCODING] {
            self.headers.remove(name);
        }
    }
}

/// An HTTP client that re-validates every redirect hop.
///
/// # Example
///
/// ```rust,no_run
/// use hopguard::{FetchRequest, PolicyConfig, SecureTransport};
///
/// # async fn example() -> Result<(), hopguard::Error> {
/// let client = SecureTransport::new(PolicyConfig::default());
/// let response = client.fetch(FetchRequest::get("https://httpbin.org/redirect/2")).await?;
/// println!("Final URL: {}", response.url);
/// println!("Followed {} redirects", response.redirects);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SecureTransport {
    engine: SsrfEngine,
    transport: Arc<dyn HttpTransport>,
}

impl fmt::Debug for SecureTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureTransport")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl SecureTransport {
    /// reqwest-backed client using system DNS.
    #[cfg(feature = "fetch")]
    pub fn new(policy: crate::PolicyConfig) -> Self {
        Self::with_transport(SsrfEngine::new(policy), crate::ReqwestTransport::new())
    }

    pub fn with_transport(engine: SsrfEngine, transport: impl HttpTransport + 'static) -> Self {
        Self::from_parts(engine, Arc::new(transport))
    }

    pub fn from_parts(engine: SsrfEngine, transport: Arc<dyn HttpTransport>) -> Self {
        Self { engine, transport }
    }

    pub fn engine(&self) -> &SsrfEngine {
        &self.engine
    }

    /// Validate a URL without fetching it.
    pub async fn validate(&self, url: &str) -> Verdict {
        self.engine.validate(url).await
    }

    /// Fetch a request, following redirects safely.
    ///
    /// The first URL is validated before any I/O. Each redirect target is
    /// resolved against the current URL and validated before it is
    /// requested. A 303 switches the method to `GET` and drops the body
    /// and its headers; 301, 302, 307 and 308 keep both. Credential headers
    /// (`Authorization`, `Cookie`, ...) are dropped once a redirect leaves
    /// the current origin.
    ///
    /// # Errors
    ///
    /// - any rejection from the policy engine, at any hop
    /// - [`Error::MaxRedirectsExceeded`] when the chain is too long
    /// - [`Error::UpstreamStatusRejected`] when the status predicate refuses
    ///   the final response
    /// - [`Error::Timeout`] when the request's timeout fires
    /// - transport failures ([`Error::Http`], [`Error::ResponseTooLarge`])
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, Error> {
        let start = request.effective_url()?;

        match request.timeout {
            Some(after) => {
                let url = start.to_string();
                tokio::time::timeout(after, self.follow(start, &request))
                    .await
                    .map_err(|_| {
                        warn!(url = %url, ?after, "fetch timed out");
                        Error::Timeout { url, after }
                    })?
            }
            None => self.follow(start, &request).await,
        }
    }

    /// Fetch every request concurrently and wait for all of them.
    ///
    /// Outcomes come back in input order. A failing member never cancels
    /// its siblings.
    pub async fn fetch_all<I>(&self, requests: I) -> Vec<BatchOutcome>
    where
        I: IntoIterator<Item = FetchRequest>,
    {
        let fetches = requests.into_iter().map(|request| async move {
            let url = request.url.clone().or_else(|| request.base_url.clone());
            let result = self.fetch(request).await;
            if let Err(e) = &result {
                debug!(url = ?url, error = %e, "batch member failed");
            }
            BatchOutcome { url, result }
        });

        join_all(fetches).await
    }

    /// Blocking version of [`fetch`](Self::fetch).
    ///
    /// Same runtime rules as
    /// [`SsrfEngine::check_blocking`](crate::SsrfEngine::check_blocking).
    pub fn fetch_blocking(&self, request: FetchRequest) -> Result<FetchResponse, Error> {
        run_blocking(self.fetch(request))?
    }

    async fn follow(&self, start: Url, request: &FetchRequest) -> Result<FetchResponse, Error> {
        let policy = self.engine.policy();
        let max_redirects = request.max_redirects.unwrap_or(policy.max_redirects());
        let max_response_bytes = request
            .max_response_bytes
            .unwrap_or(policy.max_response_bytes());

        let initial = self.engine.check(start.as_str()).await?;

        let mut state = RedirectState {
            current_url: start,
            hop_count: 0,
            method: request.method.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            pinned: Some(initial.to_socket_addr()),
            chain: vec![initial],
        };

        loop {
            let response = self
                .transport
                .execute(TransportRequest {
                    method: state.method.clone(),
                    url: state.current_url.clone(),
                    headers: state.headers.clone(),
                    body: state.body.clone(),
                    pinned: state.pinned,
                    max_response_bytes,
                })
                .await?;

            let Some(location) = redirect_location(&response, &state.current_url)? else {
                return finish(response, state, request);
            };

            state.hop_count += 1;
            if state.hop_count > max_redirects {
                warn!(
                    url = %state.chain[0].url,
                    max = max_redirects,
                    "redirect limit exceeded"
                );
                return Err(Error::MaxRedirectsExceeded {
                    url: state.chain[0].url.clone(),
                    max: max_redirects,
                });
            }

            let next = state
                .current_url
                .join(location)
                .map_err(|e| Error::invalid_url(location, e.to_string()))?;

            state.pinned = if policy.validate_redirect_chain() {
                let target = self.engine.check(next.as_str()).await?;
                let addr = target.to_socket_addr();
                state.chain.push(target);
                Some(addr)
            } else {
                None
            };

            if next.origin() != state.current_url.origin() {
                state.remove_sensitive_headers();
            }

            if response.status == StatusCode::SEE_OTHER {
                state.method = Method::GET;
                state.body = None;
                state.remove_body_headers();
            }

            debug!(
                hop = state.hop_count,
                status = response.status.as_u16(),
                from = %state.current_url,
                to = %next,
                method = %state.method,
                "following redirect"
            );
            state.current_url = next;
        }
    }
}

/// The `Location` of a redirect response, or `None` if this response ends
/// the chain.
fn redirect_location<'a>(
    response: &'a TransportResponse,
    current: &Url,
) -> Result<Option<&'a str>, Error> {
    if !is_redirect(response.status) {
        return Ok(None);
    }
    match response.headers.get(LOCATION) {
        None => Ok(None),
        Some(value) => value.to_str().map(Some).map_err(|_| {
            Error::invalid_url(current.as_str(), "redirect Location header is not valid text")
        }),
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn finish(
    response: TransportResponse,
    state: RedirectState,
    request: &FetchRequest,
) -> Result<FetchResponse, Error> {
    let status = response.status;
    let response = FetchResponse {
        status,
        headers: response.headers,
        body: response.body,
        url: state.current_url,
        redirects: state.hop_count,
        chain: state.chain,
    };

    match &request.validate_status {
        Some(predicate) if !predicate.accepts(status) => {
            warn!(url = %response.url, status = status.as_u16(), "upstream status rejected");
            Err(Error::UpstreamStatusRejected {
                status,
                response: Box::new(response),
                request: Box::new(request.clone()),
            })
        }
        _ => Ok(response),
    }
}
