use crate::config::RetryPolicy;
use crate::dns::DnsSource;
use crate::error::{MirrorError, Result};

/// Fetch the raw version record published under `name`.
///
/// An absent or blank record counts as a failed attempt. Exhausting the
/// policy is fatal for the run.
pub async fn read_version_record<D>(dns: &D, name: &str, policy: &RetryPolicy) -> Result<String>
where
    D: DnsSource + ?Sized,
{
    for pass in 1..=policy.attempts {
        tracing::info!("querying TXT record {name} (pass {pass})");
        match dns.txt_record(name).await {
            Ok(Some(record)) if !record.trim().is_empty() => {
                tracing::info!("query returned {record}");
                return Ok(record);
            }
            Ok(_) => tracing::warn!("TXT record {name} is empty"),
            Err(err) => tracing::warn!("TXT query for {name} failed: {err}"),
        }

        if pass < policy.attempts {
            tracing::info!("TXT record query failed, sleeping {:?}", policy.delay);
            policy.pause().await;
        }
    }

    tracing::error!("TXT record query failed after {} tries", policy.attempts);
    Err(MirrorError::RecordQuery {
        name: name.to_string(),
        attempts: policy.attempts,
    })
}
