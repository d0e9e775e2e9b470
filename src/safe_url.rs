//! URL parsing, scheme check and host normalization.

use std::net::IpAddr;

use url::{Host, Url};

use crate::classify::normalize_ipv4;
use crate::error::Error;
use crate::policy::PolicyConfig;

/// A parsed URL whose scheme the policy permits.
///
/// This is the URL after parsing and normalization, but before the allowlist
/// check, DNS resolution and address classification. Use
/// [`SsrfEngine::check`](crate::SsrfEngine::check) for the full validation.
#[derive(Debug, Clone)]
pub struct SafeUrl {
    inner: Url,
    host: String,
    literal: Option<IpAddr>,
}

impl SafeUrl {
    /// Parse `input` as an absolute URL and check its scheme against `policy`.
    ///
    /// The host is lowercased and a trailing dot removed. A host written as an
    /// IPv4 number in any encoding (`2130706433`, `0x7f000001`, `0177.0.0.1`)
    /// comes back as a canonical literal, never as a name to resolve.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidUrl`] if the input is not an absolute URL with a host,
    /// [`Error::InvalidScheme`] if the scheme is not allowed.
    pub fn parse(input: &str, policy: &PolicyConfig) -> Result<Self, Error> {
        let url = Url::parse(input.trim()).map_err(|e| Error::invalid_url(input, e.to_string()))?;

        if !policy.is_scheme_allowed(url.scheme()) {
            return Err(Error::InvalidScheme {
                url: input.to_string(),
                scheme: url.scheme().to_string(),
            });
        }

        let (host, literal) = match url.host() {
            None => return Err(Error::invalid_url(input, "URL must have a host")),
            Some(Host::Ipv4(ip)) => (ip.to_string(), Some(IpAddr::V4(ip))),
            Some(Host::Ipv6(ip)) => (format!("[{ip}]"), Some(IpAddr::V6(ip))),
            Some(Host::Domain(domain)) => {
                let host = normalize_host(domain, input)?;
                // special schemes canonicalize numeric hosts during parsing,
                // other schemes hand them over as plain domains
                match normalize_ipv4(&host) {
                    Some(ip) => (ip.to_string(), Some(IpAddr::V4(ip))),
                    None => (host, None),
                }
            }
        };

        Ok(Self {
            inner: url,
            host,
            literal,
        })
    }

    /// The normalized host. IPv6 literals keep their brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The host as an IP address, when it was written as a literal.
    pub fn literal(&self) -> Option<IpAddr> {
        self.literal
    }

    /// Get the port, defaulting to 80 for http and 443 for https.
    pub fn port(&self) -> u16 {
        self.inner.port_or_known_default().unwrap_or(80)
    }

    pub fn scheme(&self) -> &str {
        self.inner.scheme()
    }

    pub fn path(&self) -> &str {
        self.inner.path()
    }

    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.inner
    }

    pub fn into_url(self) -> Url {
        self.inner
    }
}

/// Normalize a hostname: lowercase, remove trailing dot.
fn normalize_host(host: &str, original_url: &str) -> Result<String, Error> {
    let mut normalized = host.to_lowercase();

    // FQDN notation
    if normalized.ends_with('.') {
        normalized.pop();
    }

    if normalized.is_empty() {
        return Err(Error::invalid_url(original_url, "empty hostname"));
    }

    Ok(normalized)
}
