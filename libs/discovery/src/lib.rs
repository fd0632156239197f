//! # discovery
//!
//! DNS SRV based service discovery. A service name such as
//! `_nats._tcp.cluster.internal` resolves to an ordered list of endpoints.
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::cognitive_complexity)]
#![deny(rustdoc::broken_intra_doc_links)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]
use std::fmt;

use hickory_resolver::config::ResolverOpts;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::rdata::SRV;
use hickory_resolver::{Resolver, TokioResolver};
use thiserror::Error;
use tracing::debug;

/// Errors returned from service discovery
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// the system resolver could not be created
    #[error("failed to create resolver: {0}")]
    Resolver(String),
    /// the SRV lookup for a service failed
    #[error("failed to discover endpoints for '{service}': {reason}")]
    Lookup {
        /// service name that was looked up
        service: String,
        /// resolver error message
        reason: String,
    },
}

/// A discovered service endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// host name of the endpoint, without the trailing root dot
    pub target: String,
    /// port the service listens on
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(target: impl Into<String>, port: u16) -> Self {
        Self {
            target: target.into(),
            port,
        }
    }

    /// format the endpoint as a URL
    /// ex.
    ///     Endpoint::new("nats-0.internal", 4222).url("nats") -> "nats://nats-0.internal:4222"
    pub fn url(&self, scheme: impl AsRef<str>) -> String {
        format!("{}://{}:{}", scheme.as_ref(), self.target, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target, self.port)
    }
}

/// DNS service discovery
#[derive(Debug)]
pub struct DnsServiceDiscovery {
    resolver: TokioResolver,
}

impl DnsServiceDiscovery {
    /// Create a new service using the system resolver configuration
    pub fn new() -> Result<Self, DiscoveryError> {
        Ok(Self {
            resolver: Resolver::builder(TokioConnectionProvider::default())
                .map_err(|e| DiscoveryError::Resolver(e.to_string()))?
                .with_options(ResolverOpts::default())
                .build(),
        })
    }

    /// do a SRV lookup for `service`, returning its endpoints ordered by priority
    /// ex.
    ///     discover_endpoints("_nats._tcp.internal") -> [nats-0.internal:4222, nats-1.internal:4222]
    pub async fn discover_endpoints(
        &self,
        service: impl AsRef<str>,
    ) -> Result<Vec<Endpoint>, DiscoveryError> {
        let service = service.as_ref();
        let lookup = self
            .resolver
            .srv_lookup(service)
            .await
            .map_err(|e| DiscoveryError::Lookup {
                service: service.to_owned(),
                reason: e.to_string(),
            })?;

        let endpoints = endpoints_from_srv(lookup.iter());
        debug!(service, ?endpoints, "discovered endpoints");
        Ok(endpoints)
    }
}

/// sorts records by priority, records with equal priority keep their answer order
fn endpoints_from_srv<'a>(records: impl Iterator<Item = &'a SRV>) -> Vec<Endpoint> {
    let mut records = records.collect::<Vec<_>>();
    records.sort_by_key(|srv| srv.priority());
    records
        .into_iter()
        .map(|srv| {
            let target = srv.target().to_utf8();
            Endpoint::new(target.trim_end_matches('.'), srv.port())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_resolver::proto::rr::Name;

    fn srv(priority: u16, target: &str, port: u16) -> SRV {
        SRV::new(priority, 10, port, Name::from_ascii(target).unwrap())
    }

    #[test]
    fn test_endpoint_url() {
        let ep = Endpoint::new("nats-0.internal", 4222);
        assert_eq!(ep.url("nats"), "nats://nats-0.internal:4222");
        assert_eq!(ep.to_string(), "nats-0.internal:4222");
    }

    #[test]
    fn test_endpoints_from_srv_order() {
        let records = [
            srv(20, "backup.internal.", 4223),
            srv(10, "nats-0.internal.", 4222),
            srv(10, "nats-1.internal.", 4222),
        ];
        let endpoints = endpoints_from_srv(records.iter());
        assert_eq!(
            endpoints,
            vec![
                Endpoint::new("nats-0.internal", 4222),
                Endpoint::new("nats-1.internal", 4222),
                Endpoint::new("backup.internal", 4223),
            ]
        );
    }

    #[test]
    fn test_endpoints_from_srv_relative_name() {
        let records = [srv(0, "nats", 4222)];
        assert_eq!(
            endpoints_from_srv(records.iter()),
            vec![Endpoint::new("nats", 4222)]
        );
    }

    #[test]
    fn test_error_display() {
        let err = DiscoveryError::Lookup {
            service: "_nats._tcp.internal".into(),
            reason: "no record found".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to discover endpoints for '_nats._tcp.internal': no record found"
        );
    }
}
