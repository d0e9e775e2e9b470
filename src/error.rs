//! Error types for hopguard.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

use crate::fetch::{FetchRequest, FetchResponse};

/// Why the policy engine turned a URL down.
///
/// This is the closed set of rejection reasons; every [`Error`] produced by
/// [`SsrfEngine::check`](crate::SsrfEngine::check) maps to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    InvalidUrl,
    InvalidScheme,
    HostNotAllowed,
    DnsFailure,
    PrivateIp,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalidUrl",
            Self::InvalidScheme => "invalidScheme",
            Self::HostNotAllowed => "hostNotAllowed",
            Self::DnsFailure => "dnsFailure",
            Self::PrivateIp => "privateIp",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during validation or fetching.
#[derive(Debug, Error)]
pub enum Error {
    /// The input does not parse as an absolute URL with a host.
    #[error("Invalid URL: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The URL scheme is outside the allowed set.
    #[error("Invalid scheme '{scheme}' in {url}")]
    InvalidScheme { url: String, scheme: String },

    /// The host is absent from a non-wildcard allowlist.
    #[error("Host not allowed: {host}")]
    HostNotAllowed { url: String, host: String },

    /// DNS lookup of a non-literal hostname failed.
    #[error("DNS resolution failed for {host}: {message}")]
    DnsResolutionFailed { host: String, message: String },

    /// The resolved or literal address matched a denylist entry.
    #[error("SSRF blocked: {host} resolved to {address} (matched {entry})")]
    PrivateAddressBlocked {
        url: String,
        host: String,
        address: IpAddr,
        entry: String,
    },

    /// The redirect chain is longer than the configured limit.
    #[error("Too many redirects (max {max}) starting at {url}")]
    MaxRedirectsExceeded { url: String, max: usize },

    /// The caller's status predicate refused the final response.
    #[error("Upstream status {status} rejected")]
    UpstreamStatusRejected {
        status: StatusCode,
        response: Box<FetchResponse>,
        request: Box<FetchRequest>,
    },

    /// The response body exceeded the byte cap.
    #[error("Response from {url} exceeds {limit} bytes")]
    ResponseTooLarge { url: String, limit: usize },

    /// The fetch did not complete within its timeout.
    #[error("Fetch of {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    /// The underlying HTTP transaction failed.
    #[error("HTTP error for {url}: {message}")]
    Http { url: String, message: String },

    /// A blocking wrapper could not drive its future.
    #[error("Runtime error: {message}")]
    Runtime { message: String },

    /// The policy configuration is unusable.
    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

impl Error {
    /// The policy-engine reason behind this error, if it is a rejection.
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Self::InvalidUrl { .. } => Some(RejectReason::InvalidUrl),
            Self::InvalidScheme { .. } => Some(RejectReason::InvalidScheme),
            Self::HostNotAllowed { .. } => Some(RejectReason::HostNotAllowed),
            Self::DnsResolutionFailed { .. } => Some(RejectReason::DnsFailure),
            Self::PrivateAddressBlocked { .. } => Some(RejectReason::PrivateIp),
            _ => None,
        }
    }

    pub(crate) fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn dns_failed(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DnsResolutionFailed {
            host: host.into(),
            message: message.into(),
        }
    }

    pub(crate) fn http(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            message: message.into(),
        }
    }

    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
