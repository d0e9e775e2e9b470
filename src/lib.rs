//! # hopguard
//!
//! SSRF defense for outbound HTTP.
//!
//! `hopguard` decides whether a URL may be fetched and, when it may, fetches
//! it while re-validating every redirect hop. A URL passes when its scheme is
//! allowed, its host is on the allowlist, and the address it resolves to (or
//! is written as) matches no denylist entry. Numeric hosts in any IPv4
//! encoding are canonicalized before they are classified.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hopguard::{PolicyConfig, SsrfEngine};
//!
//! # async fn example() -> Result<(), hopguard::Error> {
//! let engine = SsrfEngine::new(PolicyConfig::default());
//! let target = engine.check("https://example.com/api").await?;
//! println!("Safe to connect to {} ({})", target.host, target.address);
//! # Ok(())
//! # }
//! ```
//!
//! ## Fetching
//!
//! ```rust,no_run
//! use hopguard::{FetchRequest, PolicyBuilder, SecureTransport};
//!
//! # async fn example() -> Result<(), hopguard::Error> {
//! let policy = PolicyBuilder::new()
//!     .allow_host("api.example.com")
//!     .max_redirects(3)
//!     .build()?;
//!
//! let client = SecureTransport::new(policy);
//! let response = client
//!     .fetch(FetchRequest::get("https://api.example.com/v1/status").validate_status(|s| s.is_success()))
//!     .await?;
//! println!("{} after {} redirects", response.status, response.redirects);
//! # Ok(())
//! # }
//! ```
//!
//! ## Address classification
//!
//! ```rust
//! use hopguard::classify::{find_blocking_entry, normalize_ipv4};
//! use hopguard::DEFAULT_BLOCKED_RANGES;
//!
//! let ip = normalize_ipv4("0x7f000001").unwrap();
//! assert_eq!(ip.to_string(), "127.0.0.1");
//! assert_eq!(
//!     find_blocking_entry(ip.into(), DEFAULT_BLOCKED_RANGES),
//!     Some("127.0.0.0/8")
//! );
//! ```

pub mod classify;
mod engine;
mod error;
mod fetch;
mod policy;
mod resolve;
mod safe_url;
mod transport;

pub use engine::{AddressFamily, ResolvedTarget, SsrfEngine, Verdict};
pub use error::{Error, RejectReason};
pub use fetch::{BatchOutcome, FetchRequest, FetchResponse, SecureTransport, StatusPredicate};
pub use policy::{
    PolicyBuilder, PolicyConfig, DEFAULT_BLOCKED_RANGES, DEFAULT_MAX_REDIRECTS,
    DEFAULT_MAX_RESPONSE_BYTES, WILDCARD_HOST,
};
pub use resolve::{DnsResolver, HickoryResolver};
pub use safe_url::SafeUrl;
pub use transport::{HttpTransport, TransportRequest, TransportResponse};

#[cfg(feature = "fetch")]
pub use transport::ReqwestTransport;
