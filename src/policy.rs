//! Immutable SSRF policy configuration.
//!
//! A [`PolicyConfig`] is built once, either with [`PolicyBuilder`] or loaded
//! from TOML. After that it is only read, so one instance can sit behind an
//! `Arc` and serve any number of concurrent validations.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::classify::is_valid_entry;
use crate::error::Error;

/// Baseline denylist: loopback, RFC 1918, link-local (cloud metadata),
/// multicast, IPv6 loopback, link-local and unique-local.
pub const DEFAULT_BLOCKED_RANGES: &[&str] = &[
    "127.0.0.0/8",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "169.254.0.0/16",
    "224.0.0.0/4",
    "::1/128",
    "fe80::/10",
    "fc00::/7",
];

/// Allowlist entry that admits every host.
pub const WILDCARD_HOST: &str = "*";

pub const DEFAULT_MAX_REDIRECTS: usize = 5;

pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

const DEFAULT_SCHEMES: &[&str] = &["http", "https"];

/// The security policy every validation runs against.
///
/// Field names follow the external option names (`allowedHosts`,
/// `blockedIpRanges`, ...) when serialized. Missing keys take the defaults.
///
/// # Example
///
/// ```
/// use hopguard::PolicyConfig;
///
/// let policy = PolicyConfig::from_toml_str(r#"
///     allowedHosts = ["api.example.com"]
///     maxRedirects = 3
/// "#).unwrap();
///
/// assert!(policy.is_host_allowed("api.example.com"));
/// assert!(!policy.is_host_allowed("example.org"));
/// assert_eq!(policy.max_redirects(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PolicyConfig {
    allowed_hosts: BTreeSet<String>,
    #[serde(rename = "blockedIpRanges")]
    blocked_ranges: Vec<String>,
    max_redirects: usize,
    allowed_schemes: BTreeSet<String>,
    max_response_bytes: usize,
    validate_redirect_chain: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: BTreeSet::from([WILDCARD_HOST.to_string()]),
            blocked_ranges: DEFAULT_BLOCKED_RANGES.iter().map(|s| s.to_string()).collect(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            allowed_schemes: DEFAULT_SCHEMES.iter().map(|s| s.to_string()).collect(),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            validate_redirect_chain: true,
        }
    }
}

impl PolicyConfig {
    /// Parse a policy from TOML text and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::config(format!("failed to parse TOML policy: {e}")))?;
        let config = config.normalized();
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML policy file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read policy file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Check the policy for settings that cannot work, and warn about
    /// settings that weaken SSRF protection.
    pub fn validate(&self) -> Result<(), Error> {
        if self.allowed_schemes.is_empty() {
            return Err(Error::config("allowedSchemes must not be empty"));
        }

        if self.allowed_hosts.is_empty() {
            return Err(Error::config(
                "allowedHosts must not be empty (use \"*\" to allow every host)",
            ));
        }

        if self.max_response_bytes == 0 {
            return Err(Error::config("maxResponseBytes must be greater than zero"));
        }

        if let Some(bad) = self.blocked_ranges.iter().find(|e| !is_valid_entry(e)) {
            return Err(Error::config(format!(
                "blockedIpRanges entry '{bad}' is neither an IP literal nor a CIDR block"
            )));
        }

        if self.blocked_ranges.is_empty() {
            warn!("blockedIpRanges is empty - every resolved address will be accepted");
        }

        if !self.validate_redirect_chain {
            warn!("validateRedirectChain is disabled - redirect targets will not be re-checked");
        }

        for scheme in &self.allowed_schemes {
            if scheme != "http" && scheme != "https" {
                warn!(scheme = %scheme, "non-HTTP scheme allowed by policy");
            }
        }

        Ok(())
    }

    pub fn allowed_hosts(&self) -> &BTreeSet<String> {
        &self.allowed_hosts
    }

    /// Denylist entries in evaluation order.
    pub fn blocked_ranges(&self) -> &[String] {
        &self.blocked_ranges
    }

    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    pub fn allowed_schemes(&self) -> &BTreeSet<String> {
        &self.allowed_schemes
    }

    pub fn max_response_bytes(&self) -> usize {
        self.max_response_bytes
    }

    pub fn validate_redirect_chain(&self) -> bool {
        self.validate_redirect_chain
    }

    /// True when the allowlist contains the `"*"` wildcard.
    pub fn allows_any_host(&self) -> bool {
        self.allowed_hosts.contains(WILDCARD_HOST)
    }

    /// Allowlist check. Hosts are compared verbatim against the stored
    /// (lowercased) entries.
    pub fn is_host_allowed(&self, host: &str) -> bool {
        self.allows_any_host() || self.allowed_hosts.contains(host)
    }

    pub fn is_scheme_allowed(&self, scheme: &str) -> bool {
        self.allowed_schemes.contains(scheme)
    }

    fn normalized(self) -> Self {
        Self {
            allowed_hosts: self
                .allowed_hosts
                .into_iter()
                .map(|h| normalize_host_entry(&h))
                .collect(),
            blocked_ranges: self
                .blocked_ranges
                .into_iter()
                .map(|r| r.trim().to_string())
                .collect(),
            allowed_schemes: self
                .allowed_schemes
                .into_iter()
                .map(|s| s.trim().to_ascii_lowercase())
                .collect(),
            ..self
        }
    }
}

fn normalize_host_entry(host: &str) -> String {
    let mut normalized = host.trim().to_lowercase();
    if normalized.len() > 1 && normalized.ends_with('.') {
        normalized.pop();
    }
    normalized
}

/// Builder for [`PolicyConfig`].
///
/// Starts from the defaults. The first [`allow_host`](Self::allow_host) call
/// replaces the `"*"` wildcard with an explicit allowlist.
///
/// ```
/// use hopguard::PolicyBuilder;
///
/// let policy = PolicyBuilder::new()
///     .allow_host("api.example.com")
///     .block_range("100.64.0.0/10")
///     .max_redirects(3)
///     .build()
///     .unwrap();
///
/// assert!(!policy.allows_any_host());
/// assert!(policy.blocked_ranges().iter().any(|r| r == "100.64.0.0/10"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct PolicyBuilder {
    allowed_hosts: Option<BTreeSet<String>>,
    blocked_ranges: Option<Vec<String>>,
    extra_ranges: Vec<String>,
    allowed_schemes: Option<BTreeSet<String>>,
    max_redirects: Option<usize>,
    max_response_bytes: Option<usize>,
    validate_redirect_chain: Option<bool>,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host to the allowlist.
    pub fn allow_host(mut self, host: &str) -> Self {
        self.allowed_hosts
            .get_or_insert_with(BTreeSet::new)
            .insert(normalize_host_entry(host));
        self
    }

    /// Allow every host past the allowlist check.
    pub fn allow_any_host(mut self) -> Self {
        self.allowed_hosts
            .get_or_insert_with(BTreeSet::new)
            .insert(WILDCARD_HOST.to_string());
        self
    }

    /// Append a literal or CIDR entry after the current denylist.
    pub fn block_range(mut self, entry: &str) -> Self {
        self.extra_ranges.push(entry.trim().to_string());
        self
    }

    /// Replace the default denylist entirely.
    pub fn blocked_ranges<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.blocked_ranges = Some(
            entries
                .into_iter()
                .map(|e| e.as_ref().trim().to_string())
                .collect(),
        );
        self
    }

    /// Restrict URL schemes. The first call replaces `{http, https}`.
    pub fn allow_scheme(mut self, scheme: &str) -> Self {
        self.allowed_schemes
            .get_or_insert_with(BTreeSet::new)
            .insert(scheme.trim().to_ascii_lowercase());
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

    /// Turn per-hop re-validation of redirect targets on or off.
    pub fn validate_redirect_chain(mut self, enabled: bool) -> Self {
        self.validate_redirect_chain = Some(enabled);
        self
    }

    /// Build and validate the policy.
    pub fn build(self) -> Result<PolicyConfig, Error> {
        let defaults = PolicyConfig::default();

        let mut blocked_ranges = self.blocked_ranges.unwrap_or(defaults.blocked_ranges);
        blocked_ranges.extend(self.extra_ranges);

        let config = PolicyConfig {
            allowed_hosts: self.allowed_hosts.unwrap_or(defaults.allowed_hosts),
            blocked_ranges,
            max_redirects: self.max_redirects.unwrap_or(defaults.max_redirects),
            allowed_schemes: self.allowed_schemes.unwrap_or(defaults.allowed_schemes),
            max_response_bytes: self
                .max_response_bytes
                .unwrap_or(defaults.max_response_bytes),
            validate_redirect_chain: self
                .validate_redirect_chain
                .unwrap_or(defaults.validate_redirect_chain),
        };

        config.validate()?;
        Ok(config)
    }
}
