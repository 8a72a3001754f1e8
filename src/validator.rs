use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{net::lookup_host, time::timeout};
use url::{Host, Url};

use crate::error::ValidationError;

/// Network name lookup, kept behind a trait so the blocking part of
/// validation can be swapped out.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Returns `true` if `host` resolves to at least one address.
    async fn resolves(&self, host: &str) -> bool;
}

/// Resolver backed by the system's name service.
pub struct DnsResolver;

#[async_trait]
impl HostResolver for DnsResolver {
    async fn resolves(&self, host: &str) -> bool {
        match lookup_host((host, 0)).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(err) => {
                tracing::debug!(%host, err = ?err, "host lookup failed");
                false
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ValidUrl {
    pub host: String,
}

pub struct Validator {
    resolver: Arc<dyn HostResolver>,
    lookup_timeout: Duration,
}

impl Validator {
    pub fn new(resolver: Arc<dyn HostResolver>, lookup_timeout: Duration) -> Self {
        Self {
            resolver,
            lookup_timeout,
        }
    }

    /// Runs the syntactic checks, then the host lookup.
    pub async fn validate(&self, candidate: &str) -> Result<ValidUrl, ValidationError> {
        let url = check_syntax(candidate)?;

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_owned(),
            // IP literals need no lookup.
            Some(Host::Ipv4(ip)) => return Ok(ValidUrl { host: ip.to_string() }),
            Some(Host::Ipv6(ip)) => return Ok(ValidUrl { host: ip.to_string() }),
            None => return Err(ValidationError::MalformedUri),
        };

        match timeout(self.lookup_timeout, self.resolver.resolves(&host)).await {
            Ok(true) => Ok(ValidUrl { host }),
            Ok(false) => Err(ValidationError::UnresolvableHost(host)),
            Err(_) => Err(ValidationError::LookupTimedOut(host)),
        }
    }
}

/// Pure part of validation: scheme prefix, then URI syntax.
pub fn check_syntax(candidate: &str) -> Result<Url, ValidationError> {
    if !has_http_scheme(candidate) {
        return Err(ValidationError::InvalidScheme);
    }
    if !is_uri(candidate) {
        return Err(ValidationError::MalformedUri);
    }

    let url = Url::parse(candidate).map_err(|_| ValidationError::MalformedUri)?;
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(ValidationError::MalformedUri),
    }
}

fn has_http_scheme(candidate: &str) -> bool {
    let lower = |prefix: &str| {
        candidate
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    };
    lower("http://") || lower("https://")
}

/// Character-level URI rules: RFC 3986 characters only and well-formed
/// percent escapes.
fn is_uri(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'%' {
            let escape = bytes.get(i + 1..i + 3);
            if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
                return false;
            }
            i += 3;
            continue;
        }
        if !(b.is_ascii_alphanumeric() || b":/?#[]@!$&'()*+,;=.-_~".contains(&b)) {
            return false;
        }
        i += 1;
    }
    true
}
