//! DNS-over-TLS probing.
//!
//! [`Resolve`] is the seam the monitor and the manual probe talk to;
//! [`DotResolver`] is the real implementation on top of `hickory-resolver`.

use async_trait::async_trait;
use hickory_resolver::{
    TokioAsyncResolver,
    config::{NameServerConfigGroup, ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    proto::{op::ResponseCode, rr::RecordType},
};
use log::debug;
use std::{net::IpAddr, time::Duration};
use thiserror::Error;
use tokio::time;

use crate::config::Config;
use crate::error::Error;

/// Why a probe did not produce an answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    #[error("DNS query timed out: {0}")]
    Timeout(String),
    #[error("DNS protocol error: {0}")]
    Protocol(String),
    #[error("Domain not found: {0}")]
    NotFound(String),
}

/// Records of a successful lookup, rendered as text.
pub type ProbeResult = Result<Vec<String>, ProbeFailure>;

#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, domain: &str, record_type: RecordType) -> ProbeResult;
}

/// Parses a user supplied record type such as `aaaa` or `MX`.
pub fn parse_record_type(token: &str) -> Result<RecordType, Error> {
    token
        .trim()
        .to_ascii_uppercase()
        .parse::<RecordType>()
        .map_err(|_| Error::Parse(format!("Unknown record type: {token}")))
}

/// Queries one DoT server, bypassing any cache.
pub struct DotResolver {
    inner: Option<TokioAsyncResolver>,
    timeout: Duration,
}

impl DotResolver {
    pub fn new(address: Option<IpAddr>, hostname: &str, port: u16, timeout: Duration) -> Self {
        let inner = address.map(|ip| {
            let servers =
                NameServerConfigGroup::from_ips_tls(&[ip], port, hostname.to_string(), true);
            let config = ResolverConfig::from_parts(None, vec![], servers);

            let mut opts = ResolverOpts::default();
            opts.timeout = timeout;
            opts.attempts = 1;
            opts.cache_size = 0;
            opts.use_hosts_file = false;

            TokioAsyncResolver::tokio(config, opts)
        });

        Self { inner, timeout }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.resolver.address,
            config.resolver.hostname.as_deref().unwrap_or_default(),
            config.resolver.port,
            config.probe_timeout(),
        )
    }
}

#[async_trait]
impl Resolve for DotResolver {
    async fn resolve(&self, domain: &str, record_type: RecordType) -> ProbeResult {
        let Some(resolver) = &self.inner else {
            return Err(ProbeFailure::Protocol(
                "resolver not configured".to_string(),
            ));
        };

        debug!("Querying {domain} {record_type}");
        match time::timeout(self.timeout, resolver.lookup(domain, record_type)).await {
            Ok(Ok(lookup)) => Ok(lookup.record_iter().map(ToString::to_string).collect()),
            Ok(Err(e)) => classify(&e),
            Err(_) => Err(ProbeFailure::Timeout(format!(
                "no answer within {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// An empty NOERROR answer still proves the resolver is working.
fn classify(error: &ResolveError) -> ProbeResult {
    match error.kind() {
        ResolveErrorKind::Timeout => Err(ProbeFailure::Timeout(error.to_string())),
        ResolveErrorKind::NoRecordsFound { response_code, .. } => {
            if *response_code == ResponseCode::NXDomain {
                Err(ProbeFailure::NotFound(error.to_string()))
            } else {
                Ok(Vec::new())
            }
        }
        _ => Err(ProbeFailure::Protocol(error.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record_type() {
        assert_eq!(parse_record_type("A").unwrap(), RecordType::A);
        assert_eq!(parse_record_type("aaaa").unwrap(), RecordType::AAAA);
        assert_eq!(parse_record_type(" mx ").unwrap(), RecordType::MX);
    }

    #[test]
    fn test_parse_record_type_rejects_garbage() {
        let err = parse_record_type("BOGUS").unwrap_err();
        assert!(matches!(err, Error::Parse(ref msg) if msg.contains("BOGUS")));
    }

    #[test]
    fn test_classify_timeout() {
        let err = ResolveError::from(ResolveErrorKind::Timeout);
        assert!(matches!(classify(&err), Err(ProbeFailure::Timeout(_))));
    }

    #[test]
    fn test_classify_other_errors_as_protocol() {
        let err = ResolveError::from("connection reset");
        assert!(matches!(classify(&err), Err(ProbeFailure::Protocol(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_resolver_fails_without_network() {
        let resolver = DotResolver::new(None, "", 853, Duration::from_secs(1));
        let result = resolver.resolve("example.org", RecordType::A).await;
        assert_eq!(
            result,
            Err(ProbeFailure::Protocol("resolver not configured".to_string()))
        );
    }

    #[ignore = "This test requires network access to a public DoT resolver"]
    #[tokio::test]
    async fn test_public_dot_resolver_answers() {
        let resolver = DotResolver::new(
            Some("1.1.1.1".parse().unwrap()),
            "cloudflare-dns.com",
            853,
            Duration::from_secs(5),
        );
        let records = resolver.resolve("google.com", RecordType::A).await.unwrap();
        assert!(!records.is_empty(), "Expected at least one A record");
    }
}
