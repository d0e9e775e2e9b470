//! Hostname resolution.
//!
//! The engine asks a [`DnsResolver`] for the addresses of every non-literal
//! host it validates, on every call. Nothing here caches answers across
//! calls: the address that gets classified must be the one the next
//! connection uses, even if the name has been re-pointed since.

use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::TokioResolver;

use crate::error::Error;

/// Resolve a hostname to its addresses.
///
/// Implementations return every answer in resolver order. The engine
/// classifies the first one.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, Error>;
}

/// System-configured resolver backed by hickory.
///
/// A fresh resolver is built for each lookup, so no answer outlives the
/// validation that asked for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct HickoryResolver;

#[async_trait]
impl DnsResolver for HickoryResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, Error> {
        let resolver = TokioResolver::builder_tokio()
            .map_err(|e| Error::dns_failed(host, e.to_string()))?
            .build();

        let response = resolver
            .lookup_ip(host)
            .await
            .map_err(|e| Error::dns_failed(host, e.to_string()))?;

        Ok(response.iter().collect())
    }
}
