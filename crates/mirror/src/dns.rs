use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::TokioAsyncResolver;
use std::net::Ipv4Addr;

/// Outcome of a single DNS query that did not produce data.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct LookupError(pub String);

/// Abstraction over the DNS queries a run needs.
///
/// "Name does not exist" and "no data" are not errors: implementations
/// report them as an empty answer.
#[async_trait]
pub trait DnsSource: Send + Sync {
    /// A records for `hostname`, in answer order.
    async fn ipv4_addresses(&self, hostname: &str) -> Result<Vec<Ipv4Addr>, LookupError>;

    /// First character-string of the first TXT record for `name`.
    async fn txt_record(&self, name: &str) -> Result<Option<String>, LookupError>;
}

/// [`DnsSource`] backed by the hickory resolver.
#[derive(Clone)]
pub struct HickoryDns {
    resolver: TokioAsyncResolver,
}

impl HickoryDns {
    /// Build from the host's resolver configuration, falling back to the
    /// resolver defaults when it cannot be read.
    pub fn from_system() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|err| {
            tracing::warn!("system resolver configuration unavailable ({err}), using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }

    /// Wrap an already configured resolver.
    pub fn with_resolver(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }
}

fn is_empty_answer(err: &ResolveError) -> bool {
    matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

#[async_trait]
impl DnsSource for HickoryDns {
    async fn ipv4_addresses(&self, hostname: &str) -> Result<Vec<Ipv4Addr>, LookupError> {
        match self.resolver.ipv4_lookup(hostname).await {
            Ok(answer) => Ok(answer.iter().map(|record| record.0).collect()),
            Err(err) if is_empty_answer(&err) => Ok(Vec::new()),
            Err(err) => Err(LookupError(err.to_string())),
        }
    }

    async fn txt_record(&self, name: &str) -> Result<Option<String>, LookupError> {
        match self.resolver.txt_lookup(name).await {
            Ok(answer) => Ok(answer.iter().next().and_then(|txt| {
                txt.txt_data()
                    .first()
                    .map(|data| String::from_utf8_lossy(data).into_owned())
            })),
            Err(err) if is_empty_answer(&err) => Ok(None),
            Err(err) => Err(LookupError(err.to_string())),
        }
    }
}
