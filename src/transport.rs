//! The single-transaction HTTP primitive.
//!
//! [`SecureTransport`](crate::SecureTransport) owns redirect handling, so any
//! [`HttpTransport`] it drives must perform exactly one request per call and
//! hand back redirect responses untouched.

use std::net::SocketAddr;

use async_trait::async_trait;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use crate::error::Error;

/// One outgoing HTTP transaction.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,

    /// Address the policy engine approved for this hop. Transports that can
    /// should connect to exactly this address instead of resolving again.
    pub pinned: Option<SocketAddr>,

    /// Stop reading the body after this many bytes.
    pub max_response_bytes: usize,
}

/// Status, headers and body of one transaction.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Perform one HTTP transaction.
///
/// Implementations must not follow redirects and must return every status
/// code as a response rather than an error.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, Error>;
}

#[cfg(feature = "fetch")]
pub use self::reqwest_transport::ReqwestTransport;

#[cfg(feature = "fetch")]
mod reqwest_transport {
    use std::time::Duration;

    use reqwest::redirect::Policy as RedirectPolicy;
    use reqwest::Client;

    use super::*;

    /// [`HttpTransport`] over reqwest.
    ///
    /// A client is built per transaction so that the validated address can be
    /// pinned for the request's host. TLS SNI and the Host header still use
    /// the hostname.
    ///
    /// Environment proxies (`HTTP_PROXY`, `HTTPS_PROXY`, ...) are never used:
    /// a proxy resolves the hostname itself and would bypass the pin.
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestTransport {
        connect_timeout: Option<Duration>,
        user_agent: Option<String>,
    }

    impl ReqwestTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn connect_timeout(mut self, timeout: Duration) -> Self {
            self.connect_timeout = Some(timeout);
            self
        }

        pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
            self.user_agent = Some(agent.into());
            self
        }

        fn client_for(&self, request: &TransportRequest) -> Result<Client, Error> {
            let mut builder = Client::builder()
                .redirect(RedirectPolicy::none())
                .no_proxy();

            if let (Some(addr), Some(domain)) = (request.pinned, request.url.domain()) {
                builder = builder.resolve(domain, addr);
            }
            if let Some(timeout) = self.connect_timeout {
                builder = builder.connect_timeout(timeout);
            }
            if let Some(agent) = &self.user_agent {
                builder = builder.user_agent(agent.as_str());
            }

            builder
                .build()
                .map_err(|e| Error::http(request.url.as_str(), e.to_string()))
        }
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, Error> {
            let client = self.client_for(&request)?;
            let url = request.url.to_string();
            let limit = request.max_response_bytes;

            let mut builder = client
                .request(request.method, request.url)
                .headers(request.headers);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let mut response = builder
                .send()
                .await
                .map_err(|e| Error::http(&url, e.to_string()))?;

            let status = response.status();
            let headers = response.headers().clone();

            if response.content_length().is_some_and(|len| len > limit as u64) {
                return Err(Error::ResponseTooLarge { url, limit });
            }

            let mut body = Vec::new();
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| Error::http(&url, e.to_string()))?
            {
                if body.len() + chunk.len() > limit {
                    return Err(Error::ResponseTooLarge { url, limit });
                }
                body.extend_from_slice(&chunk);
            }

            Ok(TransportResponse {
                status,
                headers,
                body,
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use http::header::{HeaderName, HeaderValue};

    use super::*;

    /// Scripted transport that records every request it receives.
    #[derive(Debug, Default)]
    pub struct MockTransport {
        routes: Mutex<HashMap<String, TransportResponse>>,
        requests: Mutex<Vec<TransportRequest>>,
        delay: Option<Duration>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer requests for `url` with `status` and `headers`.
        pub fn respond(self, url: &str, status: u16, headers: &[(&str, &str)]) -> Self {
            self.respond_with_body(url, status, headers, b"")
        }

        pub fn respond_with_body(
            self,
            url: &str,
            status: u16,
            headers: &[(&str, &str)],
            body: &[u8],
        ) -> Self {
            let mut map = HeaderMap::new();
            for (name, value) in headers {
                map.append(
                    HeaderName::from_bytes(name.as_bytes()).unwrap(),
                    HeaderValue::from_str(value).unwrap(),
                );
            }
            let key = Url::parse(url).unwrap().to_string();
            self.routes.lock().unwrap().insert(
                key,
                TransportResponse {
                    status: StatusCode::from_u16(status).unwrap(),
                    headers: map,
                    body: body.to_vec(),
                },
            );
            self
        }

        /// Sleep this long before answering.
        pub fn delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn requests(&self) -> Vec<TransportRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn urls(&self) -> Vec<String> {
            self.requests().iter().map(|r| r.url.to_string()).collect()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, Error> {
            self.requests.lock().unwrap().push(request.clone());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let response = self
                .routes
                .lock()
                .unwrap()
                .get(request.url.as_str())
                .cloned()
                .ok_or_else(|| Error::http(request.url.as_str(), "connection refused"))?;

            if response.body.len() > request.max_response_bytes {
                return Err(Error::ResponseTooLarge {
                    url: request.url.to_string(),
                    limit: request.max_response_bytes,
                });
            }
            Ok(response)
        }
    }

    #[tokio::test]
    async fn test_mock_records_and_answers() {
        let transport = MockTransport::new().respond("http://a.example/", 204, &[]);

        let response = transport
            .execute(TransportRequest {
                method: Method::GET,
                url: Url::parse("http://a.example/").unwrap(),
                headers: HeaderMap::new(),
                body: None,
                pinned: None,
                max_response_bytes: 1024,
            })
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(transport.calls(), 1);
        assert_eq!(transport.urls(), ["http://a.example/"]);
    }
}
