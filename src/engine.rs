//! The SSRF policy engine: URL in, verdict out.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::runtime::{Handle, Runtime, RuntimeFlavor};

use tracing::{debug, warn};

use crate::classify::find_blocking_entry;
use crate::error::{Error, RejectReason};
use crate::policy::PolicyConfig;
use crate::resolve::{DnsResolver, HickoryResolver};
use crate::safe_url::SafeUrl;

/// IP family of a resolved address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl From<IpAddr> for AddressFamily {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }
}

/// The outcome of host resolution for one accepted URL.
///
/// Computed fresh by every [`SsrfEngine::check`] call and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Normalized hostname (use for Host header / SNI).
    pub host: String,

    /// The address that passed classification.
    pub address: IpAddr,

    pub family: AddressFamily,

    /// True when the host was an IP literal and no lookup happened.
    pub via_literal: bool,

    /// Port number.
    pub port: u16,

    /// Full URL (normalized).
    pub url: String,
}

impl ResolvedTarget {
    /// Get the socket address to connect to.
    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Accept/reject answer for one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(ResolvedTarget),
    Rejected { reason: RejectReason, detail: String },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Self::Accepted(_) => None,
            Self::Rejected { reason, .. } => Some(*reason),
        }
    }
}

impl From<Result<ResolvedTarget, Error>> for Verdict {
    fn from(result: Result<ResolvedTarget, Error>) -> Self {
        match result {
            Ok(target) => Self::Accepted(target),
            Err(e) => Self::Rejected {
                // check() only produces rejection variants
                reason: e.reason().unwrap_or(RejectReason::InvalidUrl),
                detail: e.to_string(),
            },
        }
    }
}

/// Validates URLs against an immutable [`PolicyConfig`].
///
/// The engine holds no per-call state and no memo of past verdicts: every
/// call parses, checks, resolves and classifies from scratch. Clone it
/// freely; clones share the policy and resolver.
///
/// # Example
///
/// ```rust,no_run
/// use hopguard::{PolicyConfig, SsrfEngine};
///
/// # async fn example() -> Result<(), hopguard::Error> {
/// let engine = SsrfEngine::new(PolicyConfig::default());
/// let target = engine.check("https://example.com/api").await?;
/// println!("Safe to connect to {} ({})", target.host, target.address);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SsrfEngine {
    policy: Arc<PolicyConfig>,
    resolver: Arc<dyn DnsResolver>,
}

impl std::fmt::Debug for SsrfEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsrfEngine")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SsrfEngine {
    /// Engine using the system DNS configuration.
    pub fn new(policy: PolicyConfig) -> Self {
        Self::with_resolver(policy, HickoryResolver)
    }

    pub fn with_resolver(policy: PolicyConfig, resolver: impl DnsResolver + 'static) -> Self {
        Self::from_parts(Arc::new(policy), Arc::new(resolver))
    }

    pub fn from_parts(policy: Arc<PolicyConfig>, resolver: Arc<dyn DnsResolver>) -> Self {
        Self { policy, resolver }
    }

    /// The policy this engine enforces.
    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Validate a URL and report the verdict.
    pub async fn validate(&self, url: &str) -> Verdict {
        self.check(url).await.into()
    }

    /// Validate a URL, returning the target to connect to.
    ///
    /// 1. Parse the URL and check its scheme
    /// 2. Check the host against the allowlist
    /// 3. Resolve the host, unless it is an IP literal
    /// 4. Check the first address against the denylist
    ///
    /// # Errors
    ///
    /// One of [`Error::InvalidUrl`], [`Error::InvalidScheme`],
    /// [`Error::HostNotAllowed`], [`Error::DnsResolutionFailed`] or
    /// [`Error::PrivateAddressBlocked`].
    pub async fn check(&self, url: &str) -> Result<ResolvedTarget, Error> {
        let result = self.run_checks(url).await;
        match &result {
            Ok(target) => debug!(
                url = %target.url,
                address = %target.address,
                via_literal = target.via_literal,
                "target accepted"
            ),
            Err(e) => warn!(url = %url, reason = ?e.reason(), error = %e, "target rejected"),
        }
        result
    }

    /// Blocking version of [`check`](Self::check).
    ///
    /// Works outside a Tokio runtime, where it creates a temporary one, and
    /// inside a multi-thread runtime. Called from a current-thread runtime
    /// it fails with [`Error::Runtime`] instead of blocking that thread.
    pub fn check_blocking(&self, url: &str) -> Result<ResolvedTarget, Error> {
        run_blocking(self.check(url))?
    }

    async fn run_checks(&self, url: &str) -> Result<ResolvedTarget, Error> {
        let safe_url = SafeUrl::parse(url, &self.policy)?;

        if !self.policy.is_host_allowed(safe_url.host()) {
            return Err(Error::HostNotAllowed {
                url: url.to_string(),
                host: safe_url.host().to_string(),
            });
        }

        let (address, via_literal) = match safe_url.literal() {
            Some(ip) => (ip, true),
            None => (self.resolve_first(safe_url.host()).await?, false),
        };

        if let Some(entry) = find_blocking_entry(address, self.policy.blocked_ranges()) {
            return Err(Error::PrivateAddressBlocked {
                url: url.to_string(),
                host: safe_url.host().to_string(),
                address,
                entry: entry.to_string(),
            });
        }

        Ok(ResolvedTarget {
            host: safe_url.host().to_string(),
            address,
            family: address.into(),
            via_literal,
            port: safe_url.port(),
            url: safe_url.as_str().to_string(),
        })
    }

    // TODO: classify every answer, not just the first, once callers can pin a set of addresses
    async fn resolve_first(&self, host: &str) -> Result<IpAddr, Error> {
        self.resolver
            .lookup(host)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::dns_failed(host, "no IP addresses found"))
    }
}

/// Drive `future` to completion from synchronous code.
pub(crate) fn run_blocking<F: Future>(future: F) -> Result<F::Output, Error> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::CurrentThread => Err(
            Error::runtime("blocking call made from a current-thread Tokio runtime"),
        ),
        Ok(handle) => Ok(tokio::task::block_in_place(|| handle.block_on(future))),
        Err(_) => {
            let rt = Runtime::new().map_err(|e| Error::runtime(e.to_string()))?;
            Ok(rt.block_on(future))
        }
    }
}
