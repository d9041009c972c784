use crate::config::RetryPolicy;
use crate::dns::DnsSource;
use crate::error::{MirrorError, Result};
use std::fmt;
use std::net::Ipv4Addr;

/// Candidate mirror addresses, in failover order.
///
/// Never empty: the only way to obtain one is a successful resolution (or
/// [`MirrorSet::new`] with at least one address).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorSet {
    addrs: Vec<Ipv4Addr>,
}

impl MirrorSet {
    /// Returns `None` when `addrs` is empty.
    pub fn new(addrs: Vec<Ipv4Addr>) -> Option<Self> {
        if addrs.is_empty() {
            None
        } else {
            Some(Self { addrs })
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ipv4Addr> {
        self.addrs.iter()
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

impl fmt::Display for MirrorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.addrs.iter().map(ToString::to_string).collect();
        f.write_str(&joined.join(","))
    }
}

/// Resolve `hostname` into a [`MirrorSet`], retrying empty answers.
///
/// Exhausting the policy is fatal for the run.
pub async fn resolve_mirrors<D>(dns: &D, hostname: &str, policy: &RetryPolicy) -> Result<MirrorSet>
where
    D: DnsSource + ?Sized,
{
    for pass in 1..=policy.attempts {
        tracing::info!("resolving hostname {hostname} (pass {pass})");
        let addrs = match dns.ipv4_addresses(hostname).await {
            Ok(addrs) => addrs,
            Err(err) => {
                tracing::warn!("lookup of {hostname} failed: {err}");
                Vec::new()
            }
        };

        if let Some(mirrors) = MirrorSet::new(addrs) {
            tracing::info!("{hostname} resolved to {mirrors}");
            return Ok(mirrors);
        }

        if pass < policy.attempts {
            tracing::info!("resolution failed, sleeping {:?}", policy.delay);
            policy.pause().await;
        }
    }

    tracing::error!(
        "resolving hostname {hostname} failed after {} tries",
        policy.attempts
    );
    Err(MirrorError::MirrorResolution {
        hostname: hostname.to_string(),
        attempts: policy.attempts,
    })
}
